//! Branch and condition-register instructions.
//!
//! Covers the unconditional branch (primary 18), conditional branch
//! (primary 16), and the primary 19 group: branch to LR/CTR, the CR
//! logical set, mcrf, and isync.

use amp_core::error::PpuError;
use amp_memory::MemoryImage;

use crate::decoder::PpuDecoder;
use crate::interpreter::StepOutcome;
use crate::thread::PpuThread;

use super::unimplemented;

/// Evaluate the BO/BI branch condition, decrementing CTR when BO asks
/// for it
pub fn evaluate_branch_condition(thread: &mut PpuThread, bo: u8, bi: u8) -> bool {
    let ctr_ok = if (bo & 0b00100) != 0 {
        true
    } else {
        thread.regs.ctr = thread.regs.ctr.wrapping_sub(1);
        let ctr_zero = thread.regs.ctr == 0;
        // BO[1] set branches on CTR == 0, clear on CTR != 0
        if (bo >> 1) & 1 != 0 {
            ctr_zero
        } else {
            !ctr_zero
        }
    };

    let cond_ok = if (bo & 0b10000) != 0 {
        true
    } else {
        let bit = thread.cr_bit(u32::from(bi)) != 0;
        // BO[3] selects the polarity of the tested CR bit
        if (bo >> 3) & 1 != 0 {
            bit
        } else {
            !bit
        }
    };

    ctr_ok && cond_ok
}

#[inline]
fn link(thread: &mut PpuThread) {
    thread.regs.lr = u64::from(thread.pc().wrapping_add(4));
}

// b - Branch (also ba, bl, bla)
pub(crate) fn b(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (li, aa, lk) = PpuDecoder::i_form(opcode);
    if lk {
        link(thread);
    }
    let target = if aa {
        li as u32
    } else {
        thread.pc().wrapping_add(li as u32)
    };
    thread.set_pc(target);
    Ok(StepOutcome::Executed)
}

// bc - Branch Conditional. LR is written whenever LK is set, whether or
// not the branch is taken.
pub(crate) fn bc(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (bo, bi, bd, aa, lk) = PpuDecoder::b_form(opcode);
    let taken = evaluate_branch_condition(thread, bo, bi);
    let target = if aa {
        bd as i32 as u32
    } else {
        thread.pc().wrapping_add(bd as i32 as u32)
    };
    if lk {
        link(thread);
    }
    if taken {
        thread.set_pc(target);
    } else {
        thread.advance_pc();
    }
    Ok(StepOutcome::Executed)
}

fn cr_logical(thread: &mut PpuThread, opcode: u32, op: fn(u32, u32) -> u32) {
    let bt = (opcode >> 21) & 0x1F;
    let ba = (opcode >> 16) & 0x1F;
    let bb = (opcode >> 11) & 0x1F;
    let value = op(thread.cr_bit(ba), thread.cr_bit(bb)) & 1;
    thread.set_cr_bit(bt, value);
    thread.advance_pc();
}

/// Condition-register group (primary 19).
pub(crate) fn cr_group(
    thread: &mut PpuThread,
    _memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let xo = (opcode >> 1) & 0x3FF;
    match xo {
        // mcrf - Move CR Field
        0 => {
            let bf = ((opcode >> 23) & 0x7) as usize;
            let bfa = ((opcode >> 18) & 0x7) as usize;
            let value = thread.get_cr_field(bfa);
            thread.set_cr_field(bf, value);
            thread.advance_pc();
        }
        // bclr - Branch Conditional to LR. The return target is read
        // before LK can overwrite it.
        16 => {
            let (bo, bi, _, _, lk) = PpuDecoder::b_form(opcode);
            let taken = evaluate_branch_condition(thread, bo, bi);
            let target = (thread.regs.lr as u32) & !3;
            if lk {
                link(thread);
            }
            if taken {
                thread.set_pc(target);
            } else {
                thread.advance_pc();
            }
        }
        33 => cr_logical(thread, opcode, |a, b| !(a | b)), // crnor
        129 => cr_logical(thread, opcode, |a, b| a & !b),  // crandc
        // isync - no speculation to discard
        150 => thread.advance_pc(),
        193 => cr_logical(thread, opcode, |a, b| a ^ b), // crxor
        225 => cr_logical(thread, opcode, |a, b| !(a & b)), // crnand
        257 => cr_logical(thread, opcode, |a, b| a & b), // crand
        289 => cr_logical(thread, opcode, |a, b| !(a ^ b)), // creqv
        417 => cr_logical(thread, opcode, |a, b| a | !b), // crorc
        449 => cr_logical(thread, opcode, |a, b| a | b), // cror
        // bcctr - Branch Conditional to CTR. CTR is never decremented
        // in this form.
        528 => {
            let (bo, bi, _, _, lk) = PpuDecoder::b_form(opcode);
            let cond_ok = if (bo & 0b10000) != 0 {
                true
            } else {
                let bit = thread.cr_bit(u32::from(bi)) != 0;
                if (bo >> 3) & 1 != 0 {
                    bit
                } else {
                    !bit
                }
            };
            let target = (thread.regs.ctr as u32) & !3;
            if lk {
                link(thread);
            }
            if cond_ok {
                thread.set_pc(target);
            } else {
                thread.advance_pc();
            }
        }
        _ => return Err(unimplemented(thread, opcode)),
    }
    Ok(StepOutcome::Executed)
}
