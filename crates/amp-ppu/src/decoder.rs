//! PPU instruction field extraction.
//!
//! Dispatch is table-driven (see the interpreter), so there is no form
//! classification here. Handlers call the extractor matching the form
//! they expect.

/// PPU instruction decoder
pub struct PpuDecoder;

impl PpuDecoder {
    /// Primary opcode (bits 0-5 in ISA numbering)
    #[inline]
    pub fn primary(opcode: u32) -> u8 {
        ((opcode >> 26) & 0x3F) as u8
    }

    /// Extract D-form fields
    #[inline]
    pub fn d_form(opcode: u32) -> (u8, u8, i16) {
        let rt = ((opcode >> 21) & 0x1F) as u8;
        let ra = ((opcode >> 16) & 0x1F) as u8;
        let d = (opcode & 0xFFFF) as i16;
        (rt, ra, d)
    }

    /// Extract DS-form fields (64-bit load/store). The low two bits
    /// select the instruction, so the displacement is a multiple of 4.
    #[inline]
    pub fn ds_form(opcode: u32) -> (u8, u8, i16, u8) {
        let rt = ((opcode >> 21) & 0x1F) as u8;
        let ra = ((opcode >> 16) & 0x1F) as u8;
        let ds = (opcode & 0xFFFC) as i16;
        let xo = (opcode & 0x3) as u8;
        (rt, ra, ds, xo)
    }

    /// Extract X-form fields
    #[inline]
    pub fn x_form(opcode: u32) -> (u8, u8, u8, u16, bool) {
        let rt = ((opcode >> 21) & 0x1F) as u8;
        let ra = ((opcode >> 16) & 0x1F) as u8;
        let rb = ((opcode >> 11) & 0x1F) as u8;
        let xo = ((opcode >> 1) & 0x3FF) as u16;
        let rc = (opcode & 1) != 0;
        (rt, ra, rb, xo, rc)
    }

    /// Extract XO-form fields (integer arithmetic)
    #[inline]
    pub fn xo_form(opcode: u32) -> (u8, u8, u8, bool, u16, bool) {
        let rt = ((opcode >> 21) & 0x1F) as u8;
        let ra = ((opcode >> 16) & 0x1F) as u8;
        let rb = ((opcode >> 11) & 0x1F) as u8;
        let oe = ((opcode >> 10) & 1) != 0;
        let xo = ((opcode >> 1) & 0x1FF) as u16;
        let rc = (opcode & 1) != 0;
        (rt, ra, rb, oe, xo, rc)
    }

    /// Extract I-form fields (branch)
    #[inline]
    pub fn i_form(opcode: u32) -> (i32, bool, bool) {
        let li = ((opcode >> 2) & 0xFFFFFF) as i32;
        // Sign extend from 24 bits
        let li = if li & 0x800000 != 0 {
            li | !0xFFFFFF
        } else {
            li
        } << 2;
        let aa = ((opcode >> 1) & 1) != 0;
        let lk = (opcode & 1) != 0;
        (li, aa, lk)
    }

    /// Extract B-form fields (conditional branch)
    #[inline]
    pub fn b_form(opcode: u32) -> (u8, u8, i16, bool, bool) {
        let bo = ((opcode >> 21) & 0x1F) as u8;
        let bi = ((opcode >> 16) & 0x1F) as u8;
        let bd = ((opcode >> 2) & 0x3FFF) as i16;
        // Sign extend from 14 bits
        let bd = if bd & 0x2000 != 0 {
            bd | !0x3FFF
        } else {
            bd
        } << 2;
        let aa = ((opcode >> 1) & 1) != 0;
        let lk = (opcode & 1) != 0;
        (bo, bi, bd, aa, lk)
    }

    /// Extract M-form fields (32-bit rotate)
    #[inline]
    pub fn m_form(opcode: u32) -> (u8, u8, u8, u8, u8, bool) {
        let rs = ((opcode >> 21) & 0x1F) as u8;
        let ra = ((opcode >> 16) & 0x1F) as u8;
        let rb = ((opcode >> 11) & 0x1F) as u8;
        let mb = ((opcode >> 6) & 0x1F) as u8;
        let me = ((opcode >> 1) & 0x1F) as u8;
        let rc = (opcode & 1) != 0;
        (rs, ra, rb, mb, me, rc)
    }

    /// Extract MD-form fields (64-bit rotate). The 6-bit shift and mask
    /// fields are stored split, high bit last.
    #[inline]
    pub fn md_form(opcode: u32) -> (u8, u8, u8, u8, u8, bool) {
        let rs = ((opcode >> 21) & 0x1F) as u8;
        let ra = ((opcode >> 16) & 0x1F) as u8;
        let sh = (((opcode >> 11) & 0x1F) | ((opcode >> 1) & 1) << 5) as u8;
        let mb = (((opcode >> 6) & 0x1F) | ((opcode >> 5) & 1) << 5) as u8;
        let xo = ((opcode >> 2) & 0x7) as u8;
        let rc = (opcode & 1) != 0;
        (rs, ra, sh, mb, xo, rc)
    }

    /// Extract the SPR number from mfspr/mtspr. The two 5-bit halves are
    /// stored swapped in the encoding.
    #[inline]
    pub fn spr_field(opcode: u32) -> u32 {
        ((opcode >> 16) & 0x1F) | (((opcode >> 11) & 0x1F) << 5)
    }

    /// Get a human-readable mnemonic for the instruction (best effort)
    pub fn get_mnemonic(opcode: u32) -> &'static str {
        let op = Self::primary(opcode);

        match op {
            2 => "tdi",
            3 => "twi",
            4 => "vector",
            7 => "mulli",
            8 => "subfic",
            10 => "cmpli",
            11 => "cmpi",
            12 => "addic",
            13 => "addic.",
            14 => "addi",
            15 => "addis",
            16 => "bc",
            17 => "sc",
            18 => "b",
            19 => match (opcode >> 1) & 0x3FF {
                0 => "mcrf",
                16 => "bclr",
                33 => "crnor",
                129 => "crandc",
                150 => "isync",
                193 => "crxor",
                225 => "crnand",
                257 => "crand",
                289 => "creqv",
                417 => "crorc",
                449 => "cror",
                528 => "bcctr",
                _ => "xl-form",
            },
            20 => "rlwimi",
            21 => "rlwinm",
            23 => "rlwnm",
            24 => "ori",
            25 => "oris",
            26 => "xori",
            27 => "xoris",
            28 => "andi.",
            29 => "andis.",
            30 => match (opcode >> 2) & 0x7 {
                0 => "rldicl",
                1 => "rldicr",
                2 => "rldic",
                3 => "rldimi",
                _ => "md-form",
            },
            31 => Self::fx_mnemonic(opcode),
            32 => "lwz",
            33 => "lwzu",
            34 => "lbz",
            35 => "lbzu",
            36 => "stw",
            37 => "stwu",
            38 => "stb",
            39 => "stbu",
            40 => "lhz",
            41 => "lhzu",
            42 => "lha",
            43 => "lhau",
            44 => "sth",
            45 => "sthu",
            46 => "lmw",
            47 => "stmw",
            48 => "lfs",
            49 => "lfsu",
            50 => "lfd",
            51 => "lfdu",
            52 => "stfs",
            53 => "stfsu",
            54 => "stfd",
            55 => "stfdu",
            58 => match opcode & 0x3 {
                0 => "ld",
                1 => "ldu",
                2 => "lwa",
                _ => "ds-form",
            },
            59 => "fp-single",
            62 => match opcode & 0x3 {
                0 => "std",
                1 => "stdu",
                _ => "ds-form",
            },
            63 => "fp-double",
            _ => "unknown",
        }
    }

    fn fx_mnemonic(opcode: u32) -> &'static str {
        // XO-form arithmetic uses a 9-bit extended opcode, everything
        // else in the fixed-point group a 10-bit one.
        match (opcode >> 1) & 0x1FF {
            8 => return "subfc",
            9 => return "mulhdu",
            10 => return "addc",
            11 => return "mulhwu",
            40 => return "subf",
            73 => return "mulhd",
            75 => return "mulhw",
            104 => return "neg",
            136 => return "subfe",
            138 => return "adde",
            200 => return "subfze",
            202 => return "addze",
            232 => return "subfme",
            233 => return "mulld",
            234 => return "addme",
            235 => return "mullw",
            266 => return "add",
            457 => return "divdu",
            459 => return "divwu",
            489 => return "divd",
            491 => return "divw",
            _ => {}
        }
        match (opcode >> 1) & 0x3FF {
            0 => "cmp",
            4 => "tw",
            19 => "mfcr",
            20 => "lwarx",
            21 => "ldx",
            23 => "lwzx",
            24 => "slw",
            26 => "cntlzw",
            27 => "sld",
            28 => "and",
            32 => "cmpl",
            60 => "andc",
            68 => "td",
            87 => "lbzx",
            124 => "nor",
            144 => "mtcrf",
            149 => "stdx",
            150 => "stwcx.",
            151 => "stwx",
            214 => "stdcx.",
            215 => "stbx",
            246 => "dcbtst",
            278 => "dcbt",
            279 => "lhzx",
            284 => "eqv",
            316 => "xor",
            339 => "mfspr",
            341 => "lwax",
            343 => "lhax",
            407 => "sthx",
            412 => "orc",
            444 => "or",
            467 => "mtspr",
            476 => "nand",
            536 => "srw",
            539 => "srd",
            598 => "sync",
            792 => "sraw",
            824 => "srawi",
            922 => "extsh",
            954 => "extsb",
            982 => "icbi",
            986 => "extsw",
            1014 => "dcbz",
            _ => "x-form",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_d_form_extract() {
        // addi r3, r1, 8
        let opcode = 0x38610008u32;
        assert_eq!(PpuDecoder::primary(opcode), 14);
        let (rt, ra, d) = PpuDecoder::d_form(opcode);
        assert_eq!(rt, 3);
        assert_eq!(ra, 1);
        assert_eq!(d, 8);
    }

    #[test]
    fn test_d_form_negative_displacement() {
        // stw r0, -4(r1)
        let opcode = 0x9001FFFCu32;
        let (rt, ra, d) = PpuDecoder::d_form(opcode);
        assert_eq!(rt, 0);
        assert_eq!(ra, 1);
        assert_eq!(d, -4);
    }

    #[test]
    fn test_i_form_branch() {
        // b 0x100
        let opcode = 0x48000100u32;
        let (li, aa, lk) = PpuDecoder::i_form(opcode);
        assert_eq!(li, 0x100);
        assert!(!aa);
        assert!(!lk);
    }

    #[test]
    fn test_i_form_backwards() {
        // b -8 (0x4BFFFFF8)
        let (li, aa, lk) = PpuDecoder::i_form(0x4BFFFFF8);
        assert_eq!(li, -8);
        assert!(!aa);
        assert!(!lk);
    }

    #[test]
    fn test_b_form_extract() {
        // bne cr0, -16  (bo=4, bi=2, bd=-16)
        let opcode = 0x4082FFF0u32;
        let (bo, bi, bd, aa, lk) = PpuDecoder::b_form(opcode);
        assert_eq!(bo, 4);
        assert_eq!(bi, 2);
        assert_eq!(bd, -16);
        assert!(!aa);
        assert!(!lk);
    }

    #[test]
    fn test_ds_form_extract() {
        // ld r4, 16(r1): op 58, ds=16, xo=0
        let opcode = (58u32 << 26) | (4 << 21) | (1 << 16) | 16;
        let (rt, ra, ds, xo) = PpuDecoder::ds_form(opcode);
        assert_eq!(rt, 4);
        assert_eq!(ra, 1);
        assert_eq!(ds, 16);
        assert_eq!(xo, 0);

        // Negative displacement keeps the low bits clear
        let opcode = (62u32 << 26) | (3 << 21) | (1 << 16) | (0xFFF0 | 1);
        let (rt, _, ds, xo) = PpuDecoder::ds_form(opcode);
        assert_eq!(rt, 3);
        assert_eq!(ds, -16);
        assert_eq!(xo, 1);
    }

    #[test]
    fn test_md_form_split_fields() {
        // rldicl r4, r3, 32, 16: sh=32 sets the split high bit
        let sh = 32u32;
        let mb = 16u32;
        let opcode = (30u32 << 26)
            | (3 << 21)
            | (4 << 16)
            | ((sh & 0x1F) << 11)
            | ((mb & 0x1F) << 6)
            | ((mb >> 5) << 5)
            | ((sh >> 5) << 1);
        let (rs, ra, sh2, mb2, xo, rc) = PpuDecoder::md_form(opcode);
        assert_eq!(rs, 3);
        assert_eq!(ra, 4);
        assert_eq!(sh2, 32);
        assert_eq!(mb2, 16);
        assert_eq!(xo, 0);
        assert!(!rc);
    }

    #[test]
    fn test_spr_field_swaps_halves() {
        // mfspr r0, LR encodes as 0x7C0802A6; SPR 8 sits in the upper half
        let opcode = 0x7C0802A6u32;
        assert_eq!(PpuDecoder::spr_field(opcode), 8);
        assert_eq!(PpuDecoder::get_mnemonic(opcode), "mfspr");

        // mtspr CTR, r0 is 0x7C0903A6
        assert_eq!(PpuDecoder::spr_field(0x7C0903A6), 9);
        assert_eq!(PpuDecoder::get_mnemonic(0x7C0903A6), "mtspr");
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(PpuDecoder::get_mnemonic(0x38600064), "addi");
        assert_eq!(PpuDecoder::get_mnemonic(0x48000100), "b");
        assert_eq!(PpuDecoder::get_mnemonic(0x44000002), "sc");
        assert_eq!(PpuDecoder::get_mnemonic(0x7C632214), "add");
        assert_eq!(PpuDecoder::get_mnemonic(0x4E800020), "bclr");
        assert_eq!(PpuDecoder::get_mnemonic(0xE8610010), "ld");
    }
}
