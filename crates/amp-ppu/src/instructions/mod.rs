//! PPU instruction handlers.
//!
//! Handlers are grouped by the class of the primary opcode that reaches
//! them: integer arithmetic and logic, loads and stores, branches, and
//! system instructions. The dispatch table in the interpreter maps each
//! primary opcode to one handler; group opcodes (19, 30, 31, 58, 62)
//! decode their extended opcode inside the handler.

pub mod branch;
pub mod integer;
pub mod load_store;
pub mod system;

use amp_core::error::PpuError;
use tracing::debug;

use crate::decoder::PpuDecoder;
use crate::thread::PpuThread;

/// Build the error for an opcode the interpreter cannot execute.
pub(crate) fn unimplemented(thread: &PpuThread, opcode: u32) -> PpuError {
    debug!(
        addr = format_args!("{:#010x}", thread.pc()),
        opcode = format_args!("{opcode:#010x}"),
        mnemonic = PpuDecoder::get_mnemonic(opcode),
        "unimplemented instruction"
    );
    PpuError::UnimplementedOpcode {
        addr: thread.pc(),
        opcode,
    }
}
