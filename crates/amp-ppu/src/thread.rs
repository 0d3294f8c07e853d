//! PPU thread state

/// XER Summary Overflow bit
pub const XER_SO: u64 = 0x8000_0000;
/// XER Overflow bit
pub const XER_OV: u64 = 0x4000_0000;
/// XER Carry bit
pub const XER_CA: u64 = 0x2000_0000;

/// Result of a flag-producing 64-bit add
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddResult {
    pub value: u64,
    /// Carry out of bit 63
    pub carry: bool,
    pub zero: bool,
    /// Bit 63 of the result
    pub sign: bool,
}

/// Add with carry-in, the one place carry/zero/sign are derived for the
/// whole arithmetic instruction set. The carry-in is folded in with a
/// second overflow check so `MAX + 0 + 1` still reports carry.
#[inline]
pub fn add_with_flags(l: u64, r: u64, carry_in: bool) -> AddResult {
    let (partial, c1) = l.overflowing_add(r);
    let (value, c2) = partial.overflowing_add(carry_in as u64);
    AddResult {
        value,
        carry: c1 || c2,
        zero: value == 0,
        sign: (value >> 63) != 0,
    }
}

/// PPU register set
#[derive(Debug, Clone)]
pub struct PpuRegisters {
    /// General Purpose Registers (64-bit)
    pub gpr: [u64; 32],
    /// Floating Point Registers (64-bit)
    pub fpr: [f64; 32],
    /// Current instruction address
    pub pc: u32,
    /// Link Register
    pub lr: u64,
    /// Count Register
    pub ctr: u64,
    /// Condition Register
    pub cr: u32,
    /// Fixed-Point Exception Register
    pub xer: u64,
}

impl Default for PpuRegisters {
    fn default() -> Self {
        Self {
            gpr: [0; 32],
            fpr: [0.0; 32],
            pc: 0,
            lr: 0,
            ctr: 0,
            cr: 0,
            xer: 0,
        }
    }
}

/// A single PPU hardware thread.
///
/// The register file is public so the session layer can snapshot it for
/// inspection. Memory is not owned here; the interpreter borrows the
/// memory image alongside the thread on every step.
#[derive(Debug, Clone)]
pub struct PpuThread {
    /// Thread ID
    pub id: u32,
    /// Thread name, used in logs
    pub name: String,
    /// Register state
    pub regs: PpuRegisters,
}

impl PpuThread {
    /// Create a new PPU thread with zeroed registers
    pub fn new(id: u32) -> Self {
        Self {
            id,
            name: format!("PPU[{id}]"),
            regs: PpuRegisters::default(),
        }
    }

    /// Get the current instruction address
    #[inline]
    pub fn pc(&self) -> u32 {
        self.regs.pc
    }

    /// Set the program counter
    #[inline]
    pub fn set_pc(&mut self, addr: u32) {
        self.regs.pc = addr;
    }

    /// Advance the program counter by one instruction
    #[inline]
    pub fn advance_pc(&mut self) {
        self.regs.pc = self.regs.pc.wrapping_add(4);
    }

    /// Read a GPR
    #[inline]
    pub fn gpr(&self, index: usize) -> u64 {
        self.regs.gpr[index]
    }

    /// Write a GPR. Unlike some RISC ISAs, r0 is a real register on the
    /// PPU; it only reads as zero in the address computation of certain
    /// instructions, which the handlers deal with themselves.
    #[inline]
    pub fn set_gpr(&mut self, index: usize, value: u64) {
        self.regs.gpr[index] = value;
    }

    /// Read an FPR
    #[inline]
    pub fn fpr(&self, index: usize) -> f64 {
        self.regs.fpr[index]
    }

    /// Write an FPR
    #[inline]
    pub fn set_fpr(&mut self, index: usize, value: f64) {
        self.regs.fpr[index] = value;
    }

    /// Get CR field value (0-7)
    pub fn get_cr_field(&self, field: usize) -> u32 {
        (self.regs.cr >> (28 - field * 4)) & 0xF
    }

    /// Set CR field value (0-7)
    pub fn set_cr_field(&mut self, field: usize, value: u32) {
        let shift = 28 - field * 4;
        self.regs.cr = (self.regs.cr & !(0xF << shift)) | ((value & 0xF) << shift);
    }

    /// Read a single CR bit (0 = MSB, 31 = LSB, ISA numbering)
    #[inline]
    pub fn cr_bit(&self, bit: u32) -> u32 {
        (self.regs.cr >> (31 - bit)) & 1
    }

    /// Write a single CR bit (ISA numbering)
    #[inline]
    pub fn set_cr_bit(&mut self, bit: u32, value: u32) {
        let mask = 1 << (31 - bit);
        if value != 0 {
            self.regs.cr |= mask;
        } else {
            self.regs.cr &= !mask;
        }
    }

    /// Update CR0 from a 64-bit result, as the record forms do
    pub fn update_cr0(&mut self, value: u64) {
        let signed = value as i64;
        let mut field = match signed.cmp(&0) {
            std::cmp::Ordering::Less => 0b1000,
            std::cmp::Ordering::Greater => 0b0100,
            std::cmp::Ordering::Equal => 0b0010,
        };
        if self.get_xer_so() {
            field |= 0b0001;
        }
        self.set_cr_field(0, field);
    }

    /// Set a CR field from a signed comparison
    pub fn set_cr_compare_signed(&mut self, field: usize, a: i64, b: i64) {
        let mut bits = match a.cmp(&b) {
            std::cmp::Ordering::Less => 0b1000,
            std::cmp::Ordering::Greater => 0b0100,
            std::cmp::Ordering::Equal => 0b0010,
        };
        if self.get_xer_so() {
            bits |= 0b0001;
        }
        self.set_cr_field(field, bits);
    }

    /// Set a CR field from an unsigned comparison
    pub fn set_cr_compare_unsigned(&mut self, field: usize, a: u64, b: u64) {
        let mut bits = match a.cmp(&b) {
            std::cmp::Ordering::Less => 0b1000,
            std::cmp::Ordering::Greater => 0b0100,
            std::cmp::Ordering::Equal => 0b0010,
        };
        if self.get_xer_so() {
            bits |= 0b0001;
        }
        self.set_cr_field(field, bits);
    }

    /// Get XER CA (Carry) bit
    pub fn get_xer_ca(&self) -> bool {
        (self.regs.xer & XER_CA) != 0
    }

    /// Set XER CA (Carry) bit
    pub fn set_xer_ca(&mut self, value: bool) {
        if value {
            self.regs.xer |= XER_CA;
        } else {
            self.regs.xer &= !XER_CA;
        }
    }

    /// Get XER OV (Overflow) bit
    pub fn get_xer_ov(&self) -> bool {
        (self.regs.xer & XER_OV) != 0
    }

    /// Set XER OV (Overflow) bit. SO is sticky: it latches whenever OV
    /// is set and only mtspr can clear it.
    pub fn set_xer_ov(&mut self, value: bool) {
        if value {
            self.regs.xer |= XER_OV | XER_SO;
        } else {
            self.regs.xer &= !XER_OV;
        }
    }

    /// Get XER SO (Summary Overflow) bit
    pub fn get_xer_so(&self) -> bool {
        (self.regs.xer & XER_SO) != 0
    }

    /// Evaluate a trap condition (used by tw, td, twi, tdi).
    /// Returns true if the trap should be taken.
    pub fn evaluate_trap_condition(&self, to: u32, a: i64, b: i64) -> bool {
        ((to & 0x10) != 0 && a < b)
            || ((to & 0x08) != 0 && a > b)
            || ((to & 0x04) != 0 && a == b)
            || ((to & 0x02) != 0 && (a as u64) < (b as u64))
            || ((to & 0x01) != 0 && (a as u64) > (b as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_with_flags() {
        let r = add_with_flags(1, 2, false);
        assert_eq!((r.value, r.carry, r.zero, r.sign), (3, false, false, false));

        // Wrap to zero carries and is zero but not negative
        let r = add_with_flags(u64::MAX, 1, false);
        assert_eq!((r.value, r.carry, r.zero, r.sign), (0, true, true, false));

        // Carry-in alone can produce the wrap
        let r = add_with_flags(u64::MAX, 0, true);
        assert_eq!((r.value, r.carry, r.zero, r.sign), (0, true, true, false));

        let r = add_with_flags(u64::MAX, u64::MAX, true);
        assert_eq!((r.value, r.carry, r.sign), (u64::MAX, true, true));

        let r = add_with_flags(0, 0, false);
        assert!(r.zero && !r.carry && !r.sign);
    }

    #[test]
    fn test_thread_creation() {
        let thread = PpuThread::new(0);

        assert_eq!(thread.id, 0);
        assert_eq!(thread.pc(), 0);
        assert_eq!(thread.regs.cr, 0);
        assert!(thread.name.contains('0'));
    }

    #[test]
    fn test_gpr_operations() {
        let mut thread = PpuThread::new(0);

        thread.set_gpr(1, 0x12345678);
        assert_eq!(thread.gpr(1), 0x12345678);

        // r0 is a normal register on the PPU
        thread.set_gpr(0, 0xDEADBEEF);
        assert_eq!(thread.gpr(0), 0xDEADBEEF);
    }

    #[test]
    fn test_pc_operations() {
        let mut thread = PpuThread::new(0);

        thread.set_pc(0x10000);
        assert_eq!(thread.pc(), 0x10000);

        thread.advance_pc();
        assert_eq!(thread.pc(), 0x10004);
    }

    #[test]
    fn test_cr_fields() {
        let mut thread = PpuThread::new(0);

        thread.set_cr_field(0, 0b1010);
        assert_eq!(thread.get_cr_field(0), 0b1010);

        thread.set_cr_field(7, 0b0101);
        assert_eq!(thread.get_cr_field(7), 0b0101);
        assert_eq!(thread.get_cr_field(0), 0b1010);
    }

    #[test]
    fn test_cr_bits() {
        let mut thread = PpuThread::new(0);

        // CR0.EQ is bit 2 in ISA numbering
        thread.set_cr_field(0, 0b0010);
        assert_eq!(thread.cr_bit(2), 1);
        assert_eq!(thread.cr_bit(0), 0);

        thread.set_cr_bit(0, 1);
        assert_eq!(thread.get_cr_field(0), 0b1010);
        thread.set_cr_bit(2, 0);
        assert_eq!(thread.get_cr_field(0), 0b1000);
    }

    #[test]
    fn test_update_cr0() {
        let mut thread = PpuThread::new(0);

        thread.update_cr0(0);
        assert_eq!(thread.get_cr_field(0), 0b0010);

        thread.update_cr0(5);
        assert_eq!(thread.get_cr_field(0), 0b0100);

        thread.update_cr0((-5i64) as u64);
        assert_eq!(thread.get_cr_field(0), 0b1000);
    }

    #[test]
    fn test_so_is_sticky() {
        let mut thread = PpuThread::new(0);

        thread.set_xer_ov(true);
        assert!(thread.get_xer_ov());
        assert!(thread.get_xer_so());

        // Clearing OV leaves SO latched
        thread.set_xer_ov(false);
        assert!(!thread.get_xer_ov());
        assert!(thread.get_xer_so());

        // And SO is mirrored into CR0 by the record forms
        thread.update_cr0(1);
        assert_eq!(thread.get_cr_field(0), 0b0101);
    }

    #[test]
    fn test_compare_helpers() {
        let mut thread = PpuThread::new(0);

        thread.set_cr_compare_signed(7, -1, 1);
        assert_eq!(thread.get_cr_field(7), 0b1000);

        // Same operands compared unsigned flip the ordering
        thread.set_cr_compare_unsigned(7, (-1i64) as u64, 1);
        assert_eq!(thread.get_cr_field(7), 0b0100);

        thread.set_cr_compare_unsigned(3, 4, 4);
        assert_eq!(thread.get_cr_field(3), 0b0010);
    }

    #[test]
    fn test_trap_conditions() {
        let thread = PpuThread::new(0);

        // TO=0x10: signed less-than
        assert!(thread.evaluate_trap_condition(0x10, -1, 0));
        assert!(!thread.evaluate_trap_condition(0x10, 1, 0));
        // TO=0x08: signed greater-than
        assert!(thread.evaluate_trap_condition(0x08, 1, 0));
        // TO=0x04: equal
        assert!(thread.evaluate_trap_condition(0x04, 7, 7));
        // TO=0x02: unsigned less-than sees -1 as huge
        assert!(!thread.evaluate_trap_condition(0x02, -1, 0));
        assert!(thread.evaluate_trap_condition(0x01, -1, 0));
        // TO=0x1F traps unconditionally
        assert!(thread.evaluate_trap_condition(0x1F, 0, 0));
        assert!(!thread.evaluate_trap_condition(0, 0, 0));
    }
}
