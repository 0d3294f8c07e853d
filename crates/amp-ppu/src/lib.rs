//! PPU (PowerPC Processing Unit) interpreter for ampere
//!
//! This crate implements the user-mode subset of the Cell BE PPU, a
//! 64-bit PowerPC core running in big-endian mode. Execution is a
//! table-driven interpreter: one handler per primary opcode, with the
//! extended-opcode groups (19, 30, 31, 58, 62) decoded inside their
//! group handlers.
//!
//! ## Usage
//!
//! ```ignore
//! use amp_memory::MemoryImage;
//! use amp_ppu::{PpuInterpreter, PpuThread, StepOutcome};
//!
//! let interpreter = PpuInterpreter::new();
//! let mut thread = PpuThread::new(0);
//! let mut memory = MemoryImage::new(256 * 1024 * 1024);
//!
//! thread.set_pc(entry_point);
//! loop {
//!     match interpreter.step(&mut thread, &mut memory)? {
//!         StepOutcome::Executed => {}
//!         StepOutcome::Syscall { id } => handle_syscall(&mut thread, id)?,
//!         other => break,
//!     }
//! }
//! ```

pub mod decoder;
pub mod instructions;
pub mod interpreter;
pub mod thread;

pub use decoder::PpuDecoder;
pub use interpreter::{PpuInterpreter, StepOutcome};
pub use thread::{PpuRegisters, PpuThread};
