//! Integer arithmetic, logical, rotate, and shift instructions.
//!
//! Primary opcodes 2-15 and 20-31 land here. The fixed-point group
//! (primary 31) is the largest single entry: it folds the XO-form
//! arithmetic set together with the X-form logic, shift, compare, and
//! indexed load/store instructions.

use amp_core::error::PpuError;
use amp_memory::MemoryImage;

use crate::decoder::PpuDecoder;
use crate::interpreter::StepOutcome;
use crate::thread::{add_with_flags, AddResult, PpuThread};

use super::{load_store, system, unimplemented};

/// Signed overflow of an add, derived from the operand and result sign
/// bits. Valid for the carrying forms too since carry-in only enters
/// through the result.
#[inline]
pub fn add_overflow(a: u64, b: u64, result: u64) -> bool {
    ((!(a ^ b) & (a ^ result)) >> 63) != 0
}

/// Generate the mask for rotate instructions: bits mb through me
/// inclusive in IBM numbering, wrapping when mb > me
#[inline]
pub fn generate_mask_64(mb: u8, me: u8) -> u64 {
    let mb = mb as u32;
    let me = me as u32;
    let x = u64::MAX >> mb;
    let y = u64::MAX << (63 - me);
    if mb <= me {
        x & y
    } else {
        x | y
    }
}

/// Rotate for the word forms: the low word is duplicated into the high
/// word before rotating, as the ISA specifies
#[inline]
pub fn rotate_word(value: u32, sh: u32) -> u64 {
    let doubled = ((value as u64) << 32) | value as u64;
    doubled.rotate_left(sh & 0x1F)
}

#[inline]
fn finish(thread: &mut PpuThread, rt: usize, value: u64, rc: bool) {
    thread.set_gpr(rt, value);
    if rc {
        thread.update_cr0(value);
    }
}

// tdi - Trap Doubleword Immediate
pub(crate) fn tdi(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (to, ra, si) = PpuDecoder::d_form(opcode);
    let a = thread.gpr(ra as usize) as i64;
    if thread.evaluate_trap_condition(to as u32, a, si as i64) {
        return Err(PpuError::Trap { addr: thread.pc() });
    }
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// twi - Trap Word Immediate
pub(crate) fn twi(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (to, ra, si) = PpuDecoder::d_form(opcode);
    let a = thread.gpr(ra as usize) as i32 as i64;
    if thread.evaluate_trap_condition(to as u32, a, si as i64) {
        return Err(PpuError::Trap { addr: thread.pc() });
    }
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// mulli - Multiply Low Immediate
pub(crate) fn mulli(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rt, ra, si) = PpuDecoder::d_form(opcode);
    let value = (thread.gpr(ra as usize) as i64).wrapping_mul(si as i64);
    thread.set_gpr(rt as usize, value as u64);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// subfic - Subtract From Immediate Carrying
pub(crate) fn subfic(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rt, ra, si) = PpuDecoder::d_form(opcode);
    let AddResult { value, carry: ca, .. } =
        add_with_flags(!thread.gpr(ra as usize), si as i64 as u64, true);
    thread.set_gpr(rt as usize, value);
    thread.set_xer_ca(ca);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// cmpli - Compare Logical Immediate
pub(crate) fn cmpli(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let bf = ((opcode >> 23) & 0x7) as usize;
    let l = (opcode >> 21) & 1;
    let ra = ((opcode >> 16) & 0x1F) as usize;
    let a = if l == 0 {
        thread.gpr(ra) as u32 as u64
    } else {
        thread.gpr(ra)
    };
    thread.set_cr_compare_unsigned(bf, a, u64::from(opcode as u16));
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// cmpi - Compare Immediate
pub(crate) fn cmpi(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let bf = ((opcode >> 23) & 0x7) as usize;
    let l = (opcode >> 21) & 1;
    let ra = ((opcode >> 16) & 0x1F) as usize;
    let a = if l == 0 {
        thread.gpr(ra) as i32 as i64
    } else {
        thread.gpr(ra) as i64
    };
    thread.set_cr_compare_signed(bf, a, (opcode as u16 as i16) as i64);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// addic - Add Immediate Carrying
pub(crate) fn addic(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rt, ra, si) = PpuDecoder::d_form(opcode);
    let AddResult { value, carry: ca, .. } =
        add_with_flags(thread.gpr(ra as usize), si as i64 as u64, false);
    thread.set_gpr(rt as usize, value);
    thread.set_xer_ca(ca);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// addic. - Add Immediate Carrying and Record
pub(crate) fn addic_record(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rt, ra, si) = PpuDecoder::d_form(opcode);
    let AddResult { value, carry: ca, .. } =
        add_with_flags(thread.gpr(ra as usize), si as i64 as u64, false);
    thread.set_xer_ca(ca);
    finish(thread, rt as usize, value, true);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// addi - Add Immediate. With ra = 0 this is li.
pub(crate) fn addi(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rt, ra, si) = PpuDecoder::d_form(opcode);
    let value = if ra == 0 {
        si as i64 as u64
    } else {
        thread.gpr(ra as usize).wrapping_add(si as i64 as u64)
    };
    thread.set_gpr(rt as usize, value);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// addis - Add Immediate Shifted. With ra = 0 this is lis.
pub(crate) fn addis(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rt, ra, si) = PpuDecoder::d_form(opcode);
    let shifted = ((si as i64) << 16) as u64;
    let value = if ra == 0 {
        shifted
    } else {
        thread.gpr(ra as usize).wrapping_add(shifted)
    };
    thread.set_gpr(rt as usize, value);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// rlwimi - Rotate Left Word Immediate then Mask Insert
pub(crate) fn rlwimi(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, sh, mb, me, rc) = PpuDecoder::m_form(opcode);
    let rotated = rotate_word(thread.gpr(rs as usize) as u32, sh as u32);
    let mask = generate_mask_64(mb + 32, me + 32);
    let value = (rotated & mask) | (thread.gpr(ra as usize) & !mask);
    finish(thread, ra as usize, value, rc);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// rlwinm - Rotate Left Word Immediate then AND with Mask
pub(crate) fn rlwinm(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, sh, mb, me, rc) = PpuDecoder::m_form(opcode);
    let rotated = rotate_word(thread.gpr(rs as usize) as u32, sh as u32);
    let value = rotated & generate_mask_64(mb + 32, me + 32);
    finish(thread, ra as usize, value, rc);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// rlwnm - Rotate Left Word then AND with Mask
pub(crate) fn rlwnm(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, rb, mb, me, rc) = PpuDecoder::m_form(opcode);
    let sh = (thread.gpr(rb as usize) & 0x1F) as u32;
    let rotated = rotate_word(thread.gpr(rs as usize) as u32, sh);
    let value = rotated & generate_mask_64(mb + 32, me + 32);
    finish(thread, ra as usize, value, rc);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// ori - OR Immediate. ori r0, r0, 0 is the preferred no-op.
pub(crate) fn ori(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, _) = PpuDecoder::d_form(opcode);
    let value = thread.gpr(rs as usize) | u64::from(opcode as u16);
    thread.set_gpr(ra as usize, value);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// oris - OR Immediate Shifted
pub(crate) fn oris(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, _) = PpuDecoder::d_form(opcode);
    let value = thread.gpr(rs as usize) | (u64::from(opcode as u16) << 16);
    thread.set_gpr(ra as usize, value);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// xori - XOR Immediate
pub(crate) fn xori(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, _) = PpuDecoder::d_form(opcode);
    let value = thread.gpr(rs as usize) ^ u64::from(opcode as u16);
    thread.set_gpr(ra as usize, value);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// xoris - XOR Immediate Shifted
pub(crate) fn xoris(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, _) = PpuDecoder::d_form(opcode);
    let value = thread.gpr(rs as usize) ^ (u64::from(opcode as u16) << 16);
    thread.set_gpr(ra as usize, value);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// andi. - AND Immediate, always records
pub(crate) fn andi_record(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, _) = PpuDecoder::d_form(opcode);
    let value = thread.gpr(rs as usize) & u64::from(opcode as u16);
    finish(thread, ra as usize, value, true);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// andis. - AND Immediate Shifted, always records
pub(crate) fn andis_record(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, _) = PpuDecoder::d_form(opcode);
    let value = thread.gpr(rs as usize) & (u64::from(opcode as u16) << 16);
    finish(thread, ra as usize, value, true);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

/// 64-bit rotate group (primary 30): rldicl, rldicr, rldic, rldimi.
/// The MDS register-shift forms are not implemented.
pub(crate) fn rotate64_group(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, sh, mb, xo, rc) = PpuDecoder::md_form(opcode);
    let rotated = thread.gpr(rs as usize).rotate_left(sh as u32);
    let value = match xo {
        // rldicl - Rotate Left Doubleword Immediate then Clear Left
        0 => rotated & generate_mask_64(mb, 63),
        // rldicr - Rotate Left Doubleword Immediate then Clear Right
        // (the split field is the mask end here)
        1 => rotated & generate_mask_64(0, mb),
        // rldic - Rotate Left Doubleword Immediate then Clear
        2 => rotated & generate_mask_64(mb, 63 - sh),
        // rldimi - Rotate Left Doubleword Immediate then Mask Insert
        3 => {
            let mask = generate_mask_64(mb, 63 - sh);
            (rotated & mask) | (thread.gpr(ra as usize) & !mask)
        }
        _ => return Err(unimplemented(thread, opcode)),
    };
    finish(thread, ra as usize, value, rc);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

/// XO-form arithmetic inside the fixed-point group. Returns false when
/// the 9-bit extended opcode is not an arithmetic instruction and the
/// caller should decode the full 10-bit field instead.
fn xo_arithmetic(thread: &mut PpuThread, opcode: u32) -> bool {
    let (rt, ra, rb, oe, xo, rc) = PpuDecoder::xo_form(opcode);
    let rt = rt as usize;
    let a = thread.gpr(ra as usize);
    let b = thread.gpr(rb as usize);

    match xo {
        // subfc - Subtract From Carrying
        8 => {
            let AddResult { value, carry: ca, .. } = add_with_flags(!a, b, true);
            thread.set_xer_ca(ca);
            if oe {
                thread.set_xer_ov(add_overflow(!a, b, value));
            }
            finish(thread, rt, value, rc);
        }
        // mulhdu - Multiply High Doubleword Unsigned
        9 => {
            let value = ((a as u128 * b as u128) >> 64) as u64;
            finish(thread, rt, value, rc);
        }
        // addc - Add Carrying
        10 => {
            let AddResult { value, carry: ca, .. } = add_with_flags(a, b, false);
            thread.set_xer_ca(ca);
            if oe {
                thread.set_xer_ov(add_overflow(a, b, value));
            }
            finish(thread, rt, value, rc);
        }
        // mulhwu - Multiply High Word Unsigned
        11 => {
            let value = ((a as u32 as u64) * (b as u32 as u64)) >> 32;
            finish(thread, rt, value, rc);
        }
        // subf - Subtract From
        40 => {
            let value = (!a).wrapping_add(b).wrapping_add(1);
            if oe {
                thread.set_xer_ov(add_overflow(!a, b, value));
            }
            finish(thread, rt, value, rc);
        }
        // mulhd - Multiply High Doubleword
        73 => {
            let value = (((a as i64 as i128) * (b as i64 as i128)) >> 64) as u64;
            finish(thread, rt, value, rc);
        }
        // mulhw - Multiply High Word
        75 => {
            let product = (a as i32 as i64) * (b as i32 as i64);
            let value = (product >> 32) as i32 as i64 as u64;
            finish(thread, rt, value, rc);
        }
        // neg - Negate
        104 => {
            let value = (!a).wrapping_add(1);
            if oe {
                thread.set_xer_ov(a == 0x8000_0000_0000_0000);
            }
            finish(thread, rt, value, rc);
        }
        // subfe - Subtract From Extended
        136 => {
            let carry_in = thread.get_xer_ca();
            let AddResult { value, carry: ca, .. } = add_with_flags(!a, b, carry_in);
            thread.set_xer_ca(ca);
            if oe {
                thread.set_xer_ov(add_overflow(!a, b, value));
            }
            finish(thread, rt, value, rc);
        }
        // adde - Add Extended
        138 => {
            let carry_in = thread.get_xer_ca();
            let AddResult { value, carry: ca, .. } = add_with_flags(a, b, carry_in);
            thread.set_xer_ca(ca);
            if oe {
                thread.set_xer_ov(add_overflow(a, b, value));
            }
            finish(thread, rt, value, rc);
        }
        // subfze - Subtract From Zero Extended
        200 => {
            let carry_in = thread.get_xer_ca();
            let AddResult { value, carry: ca, .. } = add_with_flags(!a, 0, carry_in);
            thread.set_xer_ca(ca);
            if oe {
                thread.set_xer_ov(add_overflow(!a, 0, value));
            }
            finish(thread, rt, value, rc);
        }
        // addze - Add to Zero Extended
        202 => {
            let carry_in = thread.get_xer_ca();
            let AddResult { value, carry: ca, .. } = add_with_flags(a, 0, carry_in);
            thread.set_xer_ca(ca);
            if oe {
                thread.set_xer_ov(add_overflow(a, 0, value));
            }
            finish(thread, rt, value, rc);
        }
        // subfme - Subtract From Minus One Extended
        232 => {
            let carry_in = thread.get_xer_ca();
            let AddResult { value, carry: ca, .. } = add_with_flags(!a, u64::MAX, carry_in);
            thread.set_xer_ca(ca);
            if oe {
                thread.set_xer_ov(add_overflow(!a, u64::MAX, value));
            }
            finish(thread, rt, value, rc);
        }
        // mulld - Multiply Low Doubleword
        233 => {
            let value = (a as i64).wrapping_mul(b as i64) as u64;
            if oe {
                let full = (a as i64 as i128) * (b as i64 as i128);
                thread.set_xer_ov(full != value as i64 as i128);
            }
            finish(thread, rt, value, rc);
        }
        // addme - Add to Minus One Extended
        234 => {
            let carry_in = thread.get_xer_ca();
            let AddResult { value, carry: ca, .. } = add_with_flags(a, u64::MAX, carry_in);
            thread.set_xer_ca(ca);
            if oe {
                thread.set_xer_ov(add_overflow(a, u64::MAX, value));
            }
            finish(thread, rt, value, rc);
        }
        // mullw - Multiply Low Word. The full 64-bit product lands in
        // rt; the high half is architecturally undefined.
        235 => {
            let product = (a as i32 as i64) * (b as i32 as i64);
            if oe {
                thread.set_xer_ov(product != product as i32 as i64);
            }
            finish(thread, rt, product as u64, rc);
        }
        // add
        266 => {
            let value = a.wrapping_add(b);
            if oe {
                thread.set_xer_ov(add_overflow(a, b, value));
            }
            finish(thread, rt, value, rc);
        }
        // divdu - Divide Doubleword Unsigned
        457 => {
            let value = if b == 0 {
                if oe {
                    thread.set_xer_ov(true);
                }
                0
            } else {
                if oe {
                    thread.set_xer_ov(false);
                }
                a / b
            };
            finish(thread, rt, value, rc);
        }
        // divwu - Divide Word Unsigned
        459 => {
            let divisor = b as u32;
            let value = if divisor == 0 {
                if oe {
                    thread.set_xer_ov(true);
                }
                0
            } else {
                if oe {
                    thread.set_xer_ov(false);
                }
                u64::from(a as u32 / divisor)
            };
            finish(thread, rt, value, rc);
        }
        // divd - Divide Doubleword
        489 => {
            let dividend = a as i64;
            let divisor = b as i64;
            let value = if divisor == 0 || (dividend == i64::MIN && divisor == -1) {
                if oe {
                    thread.set_xer_ov(true);
                }
                0
            } else {
                if oe {
                    thread.set_xer_ov(false);
                }
                (dividend / divisor) as u64
            };
            finish(thread, rt, value, rc);
        }
        // divw - Divide Word
        491 => {
            let dividend = a as i32;
            let divisor = b as i32;
            let value = if divisor == 0 || (dividend == i32::MIN && divisor == -1) {
                if oe {
                    thread.set_xer_ov(true);
                }
                0
            } else {
                if oe {
                    thread.set_xer_ov(false);
                }
                (dividend / divisor) as u32 as u64
            };
            finish(thread, rt, value, rc);
        }
        _ => return false,
    }
    true
}

/// Fixed-point group (primary 31).
pub(crate) fn fx_group(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    // The arithmetic set decodes a 9-bit extended opcode with the OE bit
    // above it; everything else in the group uses the full 10-bit field.
    if xo_arithmetic(thread, opcode) {
        thread.advance_pc();
        return Ok(StepOutcome::Executed);
    }

    let (rt, ra, rb, xo, rc) = PpuDecoder::x_form(opcode);
    let rt = rt as usize;
    let ra_idx = ra as usize;
    let rb_idx = rb as usize;

    match xo {
        // cmp
        0 => {
            let bf = ((opcode >> 23) & 0x7) as usize;
            let l = (opcode >> 21) & 1;
            let (a, b) = if l == 0 {
                (
                    thread.gpr(ra_idx) as i32 as i64,
                    thread.gpr(rb_idx) as i32 as i64,
                )
            } else {
                (thread.gpr(ra_idx) as i64, thread.gpr(rb_idx) as i64)
            };
            thread.set_cr_compare_signed(bf, a, b);
        }
        // tw - Trap Word
        4 => {
            let a = thread.gpr(ra_idx) as i32 as i64;
            let b = thread.gpr(rb_idx) as i32 as i64;
            if thread.evaluate_trap_condition(rt as u32, a, b) {
                return Err(PpuError::Trap { addr: thread.pc() });
            }
        }
        // mfcr
        19 => {
            let value = u64::from(thread.regs.cr);
            thread.set_gpr(rt, value);
        }
        // lwarx / lwzx - with a single PPU thread the reservation
        // always succeeds, so both are plain loads
        20 | 23 => {
            let ea = load_store::calc_ea_x(thread, ra, rb);
            let value = memory.read_be32(ea).map_err(|e| load_store::fault(ea, e))?;
            thread.set_gpr(rt, u64::from(value));
        }
        // ldx
        21 => {
            let ea = load_store::calc_ea_x(thread, ra, rb);
            let value = memory.read_be64(ea).map_err(|e| load_store::fault(ea, e))?;
            thread.set_gpr(rt, value);
        }
        // slw - Shift Left Word
        24 => {
            let sh = (thread.gpr(rb_idx) & 0x3F) as u32;
            let value = if sh & 0x20 != 0 {
                0
            } else {
                u64::from((thread.gpr(rt) as u32) << sh)
            };
            finish(thread, ra_idx, value, rc);
        }
        // cntlzw - Count Leading Zeros Word
        26 => {
            let value = u64::from((thread.gpr(rt) as u32).leading_zeros());
            finish(thread, ra_idx, value, rc);
        }
        // sld - Shift Left Doubleword
        27 => {
            let sh = (thread.gpr(rb_idx) & 0x7F) as u32;
            let value = if sh & 0x40 != 0 {
                0
            } else {
                thread.gpr(rt) << (sh & 0x3F)
            };
            finish(thread, ra_idx, value, rc);
        }
        // and
        28 => {
            let value = thread.gpr(rt) & thread.gpr(rb_idx);
            finish(thread, ra_idx, value, rc);
        }
        // cmpl - Compare Logical
        32 => {
            let bf = ((opcode >> 23) & 0x7) as usize;
            let l = (opcode >> 21) & 1;
            let (a, b) = if l == 0 {
                (
                    u64::from(thread.gpr(ra_idx) as u32),
                    u64::from(thread.gpr(rb_idx) as u32),
                )
            } else {
                (thread.gpr(ra_idx), thread.gpr(rb_idx))
            };
            thread.set_cr_compare_unsigned(bf, a, b);
        }
        // andc - AND with Complement
        60 => {
            let value = thread.gpr(rt) & !thread.gpr(rb_idx);
            finish(thread, ra_idx, value, rc);
        }
        // td - Trap Doubleword
        68 => {
            let a = thread.gpr(ra_idx) as i64;
            let b = thread.gpr(rb_idx) as i64;
            if thread.evaluate_trap_condition(rt as u32, a, b) {
                return Err(PpuError::Trap { addr: thread.pc() });
            }
        }
        // lbzx
        87 => {
            let ea = load_store::calc_ea_x(thread, ra, rb);
            let value = memory.read::<u8>(ea).map_err(|e| load_store::fault(ea, e))?;
            thread.set_gpr(rt, u64::from(value));
        }
        // nor
        124 => {
            let value = !(thread.gpr(rt) | thread.gpr(rb_idx));
            finish(thread, ra_idx, value, rc);
        }
        // mtcrf
        144 => {
            let fxm = ((opcode >> 12) & 0xFF) as u8;
            let value = thread.gpr(rt);
            system::mtcrf(thread, fxm, value);
        }
        // stdx
        149 => {
            let ea = load_store::calc_ea_x(thread, ra, rb);
            memory
                .write_be64(ea, thread.gpr(rt))
                .map_err(|e| load_store::fault(ea, e))?;
        }
        // stwcx. - the store always succeeds on a single thread, so CR0
        // reports EQ plus the SO shadow
        150 => {
            let ea = load_store::calc_ea_x(thread, ra, rb);
            memory
                .write_be32(ea, thread.gpr(rt) as u32)
                .map_err(|e| load_store::fault(ea, e))?;
            let so = if thread.get_xer_so() { 1 } else { 0 };
            thread.set_cr_field(0, 0b0010 | so);
        }
        // stwx
        151 => {
            let ea = load_store::calc_ea_x(thread, ra, rb);
            memory
                .write_be32(ea, thread.gpr(rt) as u32)
                .map_err(|e| load_store::fault(ea, e))?;
        }
        // stdcx.
        214 => {
            let ea = load_store::calc_ea_x(thread, ra, rb);
            memory
                .write_be64(ea, thread.gpr(rt))
                .map_err(|e| load_store::fault(ea, e))?;
            let so = if thread.get_xer_so() { 1 } else { 0 };
            thread.set_cr_field(0, 0b0010 | so);
        }
        // stbx
        215 => {
            let ea = load_store::calc_ea_x(thread, ra, rb);
            memory
                .write::<u8>(ea, thread.gpr(rt) as u8)
                .map_err(|e| load_store::fault(ea, e))?;
        }
        // dcbtst / dcbt - cache touch hints
        246 | 278 => {}
        // lhzx
        279 => {
            let ea = load_store::calc_ea_x(thread, ra, rb);
            let value = memory.read_be16(ea).map_err(|e| load_store::fault(ea, e))?;
            thread.set_gpr(rt, u64::from(value));
        }
        // eqv - Equivalent
        284 => {
            let value = !(thread.gpr(rt) ^ thread.gpr(rb_idx));
            finish(thread, ra_idx, value, rc);
        }
        // xor
        316 => {
            let value = thread.gpr(rt) ^ thread.gpr(rb_idx);
            finish(thread, ra_idx, value, rc);
        }
        // mfspr
        339 => {
            let value = system::mfspr(thread, PpuDecoder::spr_field(opcode));
            thread.set_gpr(rt, value);
        }
        // lwax - Load Word Algebraic Indexed
        341 => {
            let ea = load_store::calc_ea_x(thread, ra, rb);
            let value = memory.read_be32(ea).map_err(|e| load_store::fault(ea, e))?;
            thread.set_gpr(rt, value as i32 as i64 as u64);
        }
        // lhax - Load Halfword Algebraic Indexed
        343 => {
            let ea = load_store::calc_ea_x(thread, ra, rb);
            let value = memory.read_be16(ea).map_err(|e| load_store::fault(ea, e))?;
            thread.set_gpr(rt, value as i16 as i64 as u64);
        }
        // sthx
        407 => {
            let ea = load_store::calc_ea_x(thread, ra, rb);
            memory
                .write_be16(ea, thread.gpr(rt) as u16)
                .map_err(|e| load_store::fault(ea, e))?;
        }
        // orc - OR with Complement
        412 => {
            let value = thread.gpr(rt) | !thread.gpr(rb_idx);
            finish(thread, ra_idx, value, rc);
        }
        // or - also mr when rs == rb
        444 => {
            let value = thread.gpr(rt) | thread.gpr(rb_idx);
            finish(thread, ra_idx, value, rc);
        }
        // mtspr
        467 => {
            let value = thread.gpr(rt);
            system::mtspr(thread, PpuDecoder::spr_field(opcode), value);
        }
        // nand
        476 => {
            let value = !(thread.gpr(rt) & thread.gpr(rb_idx));
            finish(thread, ra_idx, value, rc);
        }
        // srw - Shift Right Word
        536 => {
            let sh = (thread.gpr(rb_idx) & 0x3F) as u32;
            let value = if sh & 0x20 != 0 {
                0
            } else {
                u64::from((thread.gpr(rt) as u32) >> sh)
            };
            finish(thread, ra_idx, value, rc);
        }
        // srd - Shift Right Doubleword
        539 => {
            let sh = (thread.gpr(rb_idx) & 0x7F) as u32;
            let value = if sh & 0x40 != 0 {
                0
            } else {
                thread.gpr(rt) >> (sh & 0x3F)
            };
            finish(thread, ra_idx, value, rc);
        }
        // sync - memory barrier, nothing to order here
        598 => {}
        // sraw - Shift Right Algebraic Word
        792 => {
            let source = thread.gpr(rt) as i32;
            let sh = (thread.gpr(rb_idx) & 0x3F) as u32;
            let (value, ca) = if sh & 0x20 != 0 {
                let filled = (source >> 31) as i64 as u64;
                (filled, source < 0)
            } else {
                let shifted = (source >> sh) as i64 as u64;
                let lost = sh > 0 && (source as u32) & ((1u32 << sh) - 1) != 0;
                (shifted, source < 0 && lost)
            };
            thread.set_xer_ca(ca);
            finish(thread, ra_idx, value, rc);
        }
        // srawi - Shift Right Algebraic Word Immediate
        824 => {
            let source = thread.gpr(rt) as i32;
            let sh = rb as u32;
            let shifted = (source >> sh) as i64 as u64;
            let lost = sh > 0 && (source as u32) & ((1u32 << sh) - 1) != 0;
            thread.set_xer_ca(source < 0 && lost);
            finish(thread, ra_idx, shifted, rc);
        }
        // extsh - Extend Sign Halfword
        922 => {
            let value = thread.gpr(rt) as i16 as i64 as u64;
            finish(thread, ra_idx, value, rc);
        }
        // extsb - Extend Sign Byte
        954 => {
            let value = thread.gpr(rt) as i8 as i64 as u64;
            finish(thread, ra_idx, value, rc);
        }
        // icbi - instruction cache invalidate, nothing cached here
        982 => {}
        // extsw - Extend Sign Word
        986 => {
            let value = thread.gpr(rt) as i32 as i64 as u64;
            finish(thread, ra_idx, value, rc);
        }
        // dcbz - Data Cache Block Zero
        1014 => {
            let ea = load_store::calc_ea_x(thread, ra, rb);
            load_store::dcbz(memory, ea)?;
        }
        _ => return Err(unimplemented(thread, opcode)),
    }

    thread.advance_pc();
    Ok(StepOutcome::Executed)
}
