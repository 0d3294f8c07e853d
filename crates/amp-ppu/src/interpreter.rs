//! Table-driven PPU interpreter.
//!
//! A single dispatch table maps the 6-bit primary opcode to a handler;
//! group opcodes decode their extended opcode inside the handler. The
//! interpreter owns no thread or memory state, so one interpreter can
//! drive any number of thread/image pairs. Breakpoints and the stop
//! flag are checked before the fetch, which makes both of them pauses
//! rather than faults.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use amp_core::error::{MemoryError, PpuError};
use amp_memory::MemoryImage;

use crate::decoder::PpuDecoder;
use crate::instructions::{branch, integer, load_store, system};
use crate::thread::PpuThread;

/// What a single interpreter step produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The instruction retired normally
    Executed,
    /// Execution paused on a breakpoint before fetching. The PC still
    /// points at the breakpoint address; the step is reported again
    /// until the breakpoint is removed.
    Breakpoint { addr: u32 },
    /// The stop flag was raised. Observing it consumes it.
    Stopped,
    /// An sc instruction executed. The ID is the lv2 syscall number
    /// from r11, and the PC already points past the sc.
    Syscall { id: u64 },
}

/// Instruction handler. Handlers advance the PC themselves, which lets
/// branches set it directly.
type Handler = fn(&mut PpuThread, &mut MemoryImage, u32) -> Result<StepOutcome, PpuError>;

/// Dispatch table indexed by the 6-bit primary opcode.
static PRIMARY: [Handler; 64] = [
    system::illegal,            //  0
    system::illegal,            //  1
    integer::tdi,               //  2
    integer::twi,               //  3
    system::vector_stub,        //  4
    system::illegal,            //  5
    system::illegal,            //  6
    integer::mulli,             //  7
    integer::subfic,            //  8
    system::illegal,            //  9
    integer::cmpli,             // 10
    integer::cmpi,              // 11
    integer::addic,             // 12
    integer::addic_record,      // 13
    integer::addi,              // 14
    integer::addis,             // 15
    branch::bc,                 // 16
    system::sc,                 // 17
    branch::b,                  // 18
    branch::cr_group,           // 19
    integer::rlwimi,            // 20
    integer::rlwinm,            // 21
    system::illegal,            // 22
    integer::rlwnm,             // 23
    integer::ori,               // 24
    integer::oris,              // 25
    integer::xori,              // 26
    integer::xoris,             // 27
    integer::andi_record,       // 28
    integer::andis_record,      // 29
    integer::rotate64_group,    // 30
    integer::fx_group,          // 31
    load_store::lwz,            // 32
    load_store::lwzu,           // 33
    load_store::lbz,            // 34
    load_store::lbzu,           // 35
    load_store::stw,            // 36
    load_store::stwu,           // 37
    load_store::stb,            // 38
    load_store::stbu,           // 39
    load_store::lhz,            // 40
    load_store::lhzu,           // 41
    load_store::lha,            // 42
    load_store::lhau,           // 43
    load_store::sth,            // 44
    load_store::sthu,           // 45
    load_store::lmw,            // 46
    load_store::stmw,           // 47
    load_store::lfs,            // 48
    load_store::lfsu,           // 49
    load_store::lfd,            // 50
    load_store::lfdu,           // 51
    load_store::stfs,           // 52
    load_store::stfsu,          // 53
    load_store::stfd,           // 54
    load_store::stfdu,          // 55
    system::illegal,            // 56
    system::illegal,            // 57
    load_store::ds_load_group,  // 58
    system::float_stub,         // 59
    system::illegal,            // 60
    system::illegal,            // 61
    load_store::ds_store_group, // 62
    system::float_stub,         // 63
];

/// PPU interpreter.
///
/// Shared between the run loop and whoever wants to interrupt it: the
/// breakpoint set and stop flag can be poked from another thread while
/// stepping.
pub struct PpuInterpreter {
    breakpoints: RwLock<HashSet<u32>>,
    stop: Arc<AtomicBool>,
    instructions: AtomicU64,
}

impl PpuInterpreter {
    pub fn new() -> Self {
        Self {
            breakpoints: RwLock::new(HashSet::new()),
            stop: Arc::new(AtomicBool::new(false)),
            instructions: AtomicU64::new(0),
        }
    }

    /// Execute one instruction at the thread's PC.
    ///
    /// The order of checks: stop flag, breakpoint, PC alignment, fetch,
    /// dispatch. Stop and breakpoint are outcomes, not errors; nothing
    /// has been fetched or executed when they are reported.
    pub fn step(
        &self,
        thread: &mut PpuThread,
        memory: &mut MemoryImage,
    ) -> Result<StepOutcome, PpuError> {
        if self.stop.swap(false, Ordering::AcqRel) {
            return Ok(StepOutcome::Stopped);
        }

        let pc = thread.pc();
        if self.breakpoints.read().contains(&pc) {
            return Ok(StepOutcome::Breakpoint { addr: pc });
        }

        if pc % 4 != 0 {
            return Err(PpuError::MemoryFault {
                addr: pc,
                source: MemoryError::AlignmentError { addr: pc, align: 4 },
            });
        }

        let opcode = memory
            .read_be32(pc)
            .map_err(|source| PpuError::MemoryFault { addr: pc, source })?;

        trace!(
            pc = format_args!("{pc:#010x}"),
            opcode = format_args!("{opcode:#010x}"),
            mnemonic = PpuDecoder::get_mnemonic(opcode),
            "step"
        );

        let outcome = PRIMARY[((opcode >> 26) & 0x3F) as usize](thread, memory, opcode)?;
        self.instructions.fetch_add(1, Ordering::Relaxed);
        Ok(outcome)
    }

    /// Pause execution whenever the PC reaches this address
    pub fn add_breakpoint(&self, addr: u32) {
        self.breakpoints.write().insert(addr);
    }

    /// Remove a breakpoint; returns whether it existed
    pub fn remove_breakpoint(&self, addr: u32) -> bool {
        self.breakpoints.write().remove(&addr)
    }

    pub fn has_breakpoint(&self, addr: u32) -> bool {
        self.breakpoints.read().contains(&addr)
    }

    /// Handle for interrupting a run loop from another thread. Storing
    /// true makes the next step return Stopped and clears the flag.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Raise the stop flag from this thread
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Instructions retired since construction
    pub fn instructions_executed(&self) -> u64 {
        self.instructions.load(Ordering::Relaxed)
    }
}

impl Default for PpuInterpreter {
    fn default() -> Self {
        Self::new()
    }
}
