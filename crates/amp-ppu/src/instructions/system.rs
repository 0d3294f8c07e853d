//! System instructions: sc, SPR and CR field moves, and the stub
//! entries for the vector and floating-point arithmetic groups.

use amp_core::error::PpuError;
use amp_memory::MemoryImage;
use tracing::{debug, warn};

use crate::interpreter::StepOutcome;
use crate::thread::PpuThread;

use super::unimplemented;

/// Special Purpose Register numbers
pub mod spr {
    pub const XER: u32 = 1;
    pub const LR: u32 = 8;
    pub const CTR: u32 = 9;
}

// sc - System Call. The syscall number rides in r11 under the lv2
// calling convention; the caller decides what to do with it. PC has
// already advanced, so resuming continues after the sc.
pub(crate) fn sc(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    _opcode: u32,
) -> Result<StepOutcome, PpuError> {
    thread.advance_pc();
    let id = thread.gpr(11);
    debug!(id, "system call");
    Ok(StepOutcome::Syscall { id })
}

/// Reserved or unassigned primary opcodes
pub(crate) fn illegal(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    Err(unimplemented(thread, opcode))
}

/// VMX group (primary 4); AltiVec is not implemented
pub(crate) fn vector_stub(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    Err(unimplemented(thread, opcode))
}

/// Floating-point arithmetic groups (primary 59 and 63). FPR loads and
/// stores work; the arithmetic set does not.
pub(crate) fn float_stub(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    Err(unimplemented(thread, opcode))
}

/// Read a Special Purpose Register
pub fn mfspr(thread: &PpuThread, spr_num: u32) -> u64 {
    match spr_num {
        spr::XER => thread.regs.xer,
        spr::LR => thread.regs.lr,
        spr::CTR => thread.regs.ctr,
        _ => {
            warn!(spr = spr_num, "mfspr: unimplemented SPR, reading zero");
            0
        }
    }
}

/// Write a Special Purpose Register
pub fn mtspr(thread: &mut PpuThread, spr_num: u32, value: u64) {
    match spr_num {
        spr::XER => thread.regs.xer = value,
        spr::LR => thread.regs.lr = value,
        spr::CTR => thread.regs.ctr = value,
        _ => {
            warn!(
                spr = spr_num,
                value = format_args!("{value:#x}"),
                "mtspr: unimplemented SPR, write ignored"
            );
        }
    }
}

/// Move to Condition Register Fields
pub fn mtcrf(thread: &mut PpuThread, crm: u8, value: u64) {
    for i in 0..8usize {
        if (crm >> (7 - i)) & 1 != 0 {
            let field = ((value >> (28 - i * 4)) & 0xF) as u32;
            thread.set_cr_field(i, field);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sc_returns_syscall_id() {
        let mut thread = PpuThread::new(0);
        let mut memory = MemoryImage::new(0x100);
        thread.set_pc(0x10000);
        thread.set_gpr(11, 0x141);

        let outcome = sc(&mut thread, &mut memory, 0x44000002).unwrap();
        assert_eq!(outcome, StepOutcome::Syscall { id: 0x141 });
        // PC already points past the sc
        assert_eq!(thread.pc(), 0x10004);
    }

    #[test]
    fn test_spr_roundtrip() {
        let mut thread = PpuThread::new(0);

        mtspr(&mut thread, spr::LR, 0x1234);
        mtspr(&mut thread, spr::CTR, 0x5678);
        mtspr(&mut thread, spr::XER, 0x2000_0000);

        assert_eq!(mfspr(&thread, spr::LR), 0x1234);
        assert_eq!(mfspr(&thread, spr::CTR), 0x5678);
        assert_eq!(mfspr(&thread, spr::XER), 0x2000_0000);
        assert!(thread.get_xer_ca());
    }

    #[test]
    fn test_unknown_spr_reads_zero() {
        let mut thread = PpuThread::new(0);
        mtspr(&mut thread, 256, 0xFFFF);
        assert_eq!(mfspr(&thread, 256), 0);
    }

    #[test]
    fn test_mtcrf_partial_mask() {
        let mut thread = PpuThread::new(0);
        thread.set_cr_field(0, 0b1111);
        thread.set_cr_field(7, 0b1111);

        // Write only field 7
        mtcrf(&mut thread, 0x01, 0x0000_0005);
        assert_eq!(thread.get_cr_field(7), 0b0101);
        assert_eq!(thread.get_cr_field(0), 0b1111);

        // Write only field 0
        mtcrf(&mut thread, 0x80, 0xA000_0000);
        assert_eq!(thread.get_cr_field(0), 0b1010);
        assert_eq!(thread.get_cr_field(7), 0b0101);
    }

    #[test]
    fn test_illegal_reports_unimplemented() {
        let mut thread = PpuThread::new(0);
        let mut memory = MemoryImage::new(0x100);
        thread.set_pc(0x10000);

        let err = illegal(&mut thread, &mut memory, 0x0000_0000).unwrap_err();
        assert!(matches!(
            err,
            PpuError::UnimplementedOpcode {
                addr: 0x10000,
                opcode: 0
            }
        ));
    }
}
