//! Execution sessions
//!
//! A session owns one loaded program, its guest memory and its main PPU
//! thread, and drives the interpreter over them. Sessions move from
//! `Ready` through `Running` to `Halted` as the program executes and
//! pauses; `Faulted` is terminal and entered when the interpreter
//! reports an error. Each session owns its state outright, so a fault
//! in one never disturbs another.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use amp_core::{Config, EmulatorError, Result};
use amp_memory::MemoryImage;
use amp_ppu::{PpuInterpreter, PpuRegisters, PpuThread, StepOutcome};
use tracing::{debug, error, info};

use crate::loader::{LoadedProgram, ProgramLoader};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Loaded, nothing executed yet
    Ready,
    /// Instructions are being dispatched
    Running,
    /// Paused by a breakpoint, stop request, syscall or budget limit.
    /// Stepping again resumes.
    Halted,
    /// An execution error ended the session; further stepping is refused
    Faulted,
}

/// Why `run_until_halt` stopped dispatching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// The step budget ran out before the program paused on its own
    BudgetExhausted,
    /// Execution reached a breakpoint
    Breakpoint { addr: u32 },
    /// The stop flag was raised from another thread
    Stopped,
    /// The program issued a system call for the host to handle
    Syscall { id: u64 },
}

/// One program under execution
pub struct Session {
    program: LoadedProgram,
    memory: MemoryImage,
    thread: PpuThread,
    interpreter: PpuInterpreter,
    state: SessionState,
}

impl Session {
    /// Load raw executable bytes and prepare the main thread.
    ///
    /// The thread starts at the resolved entry point with the stack
    /// pointer, TOC and empty argument registers set up per the ABI.
    /// Breakpoints from the debug config are installed before the first
    /// step.
    pub fn load(bytes: &[u8], config: &Config) -> Result<Self> {
        let loader = ProgramLoader::new();
        let (program, memory) = loader.load(bytes, config)?;

        let mut thread = PpuThread::new(0);
        thread.set_pc(program.entry_point);
        thread.set_gpr(1, u64::from(program.stack_pointer));
        thread.set_gpr(2, program.toc);
        // argc, argv, envp: nothing to pass
        thread.set_gpr(3, 0);
        thread.set_gpr(4, 0);
        thread.set_gpr(5, 0);

        let interpreter = PpuInterpreter::new();
        for &addr in &config.debug.breakpoints {
            interpreter.add_breakpoint(addr);
        }

        info!(
            entry = format_args!("{:#010x}", program.entry_point),
            breakpoints = config.debug.breakpoints.len(),
            "session ready"
        );

        Ok(Self {
            program,
            memory,
            thread,
            interpreter,
            state: SessionState::Ready,
        })
    }

    /// Execute at most one instruction.
    ///
    /// Pause outcomes move the session to `Halted`; interpreter errors
    /// move it to `Faulted` and are returned. A faulted session refuses
    /// further steps.
    pub fn step(&mut self) -> Result<StepOutcome> {
        if self.state == SessionState::Faulted {
            return Err(EmulatorError::Session(
                "cannot step a faulted session".into(),
            ));
        }
        self.state = SessionState::Running;

        match self.interpreter.step(&mut self.thread, &mut self.memory) {
            Ok(outcome) => {
                match outcome {
                    StepOutcome::Executed => {}
                    StepOutcome::Breakpoint { addr } => {
                        info!(addr = format_args!("{addr:#010x}"), "halted at breakpoint");
                        self.state = SessionState::Halted;
                    }
                    StepOutcome::Stopped => {
                        info!("halted by stop request");
                        self.state = SessionState::Halted;
                    }
                    StepOutcome::Syscall { id } => {
                        debug!(id, "halted at syscall");
                        self.state = SessionState::Halted;
                    }
                }
                Ok(outcome)
            }
            Err(e) => {
                error!(
                    pc = format_args!("{:#010x}", self.thread.pc()),
                    "session faulted: {e}"
                );
                self.state = SessionState::Faulted;
                Err(e.into())
            }
        }
    }

    /// Step until the program pauses or the budget runs out
    pub fn run_until_halt(&mut self, step_budget: u64) -> Result<HaltReason> {
        for _ in 0..step_budget {
            match self.step()? {
                StepOutcome::Executed => {}
                StepOutcome::Breakpoint { addr } => {
                    return Ok(HaltReason::Breakpoint { addr })
                }
                StepOutcome::Stopped => return Ok(HaltReason::Stopped),
                StepOutcome::Syscall { id } => return Ok(HaltReason::Syscall { id }),
            }
        }

        debug!(step_budget, "step budget exhausted");
        self.state = SessionState::Halted;
        Ok(HaltReason::BudgetExhausted)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Snapshot of the main thread registers
    pub fn registers(&self) -> PpuRegisters {
        self.thread.regs.clone()
    }

    pub fn program(&self) -> &LoadedProgram {
        &self.program
    }

    pub fn memory(&self) -> &MemoryImage {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryImage {
        &mut self.memory
    }

    pub fn add_breakpoint(&self, addr: u32) {
        self.interpreter.add_breakpoint(addr);
    }

    pub fn remove_breakpoint(&self, addr: u32) -> bool {
        self.interpreter.remove_breakpoint(addr)
    }

    /// Shared flag that pauses the session when set from another thread
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.interpreter.stop_handle()
    }

    /// Instructions retired over the life of the session
    pub fn instructions_executed(&self) -> u64 {
        self.interpreter.instructions_executed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::USER_BASE;
    use std::sync::atomic::Ordering;

    /// A SELF container with a single plain segment holding `words`
    fn plain_container(words: &[u32]) -> Vec<u8> {
        let payload: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        let payload_offset = 152u64;
        let mut out = Vec::with_capacity(152 + payload.len());

        // SCE header
        out.extend_from_slice(b"SCE\0");
        out.extend_from_slice(&2u32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // key revision
        out.extend_from_slice(&1u16.to_be_bytes()); // category SELF
        out.extend_from_slice(&48u32.to_be_bytes()); // extended header size
        out.extend_from_slice(&payload_offset.to_be_bytes());
        out.extend_from_slice(&(payload.len() as u64).to_be_bytes());

        // extended header, no metadata
        out.extend_from_slice(&3u64.to_be_bytes());
        out.extend_from_slice(&80u64.to_be_bytes());
        out.extend_from_slice(&112u64.to_be_bytes());
        out.extend_from_slice(&0u64.to_be_bytes());
        out.extend_from_slice(&0u64.to_be_bytes());
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());

        // application info, program type 4 (application)
        out.extend_from_slice(&0x1070_0005_0000_0001u64.to_be_bytes());
        out.extend_from_slice(&0x0100_0002u32.to_be_bytes());
        out.extend_from_slice(&4u32.to_be_bytes());
        out.extend_from_slice(&0x0001_0000_0000_0000u64.to_be_bytes());
        out.extend_from_slice(&[0u8; 8]);

        // one plain uncompressed segment
        out.extend_from_slice(&payload_offset.to_be_bytes());
        out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(&2u32.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());

        assert_eq!(out.len(), 152);
        out.extend(payload);
        out
    }

    #[test]
    fn test_container_to_first_instruction() {
        // addi r3, 0, 5
        let container = plain_container(&[0x3860_0005]);
        let config = Config::default();

        let mut session = Session::load(&container, &config).unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.program().was_self);
        assert_eq!(session.program().entry_point, USER_BASE);

        let outcome = session.step().unwrap();
        assert_eq!(outcome, StepOutcome::Executed);

        let regs = session.registers();
        assert_eq!(regs.gpr[3], 5);
        assert_eq!(regs.pc, USER_BASE + 4);
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.instructions_executed(), 1);
    }

    #[test]
    fn test_initial_register_setup() {
        let container = plain_container(&[0x3860_0005]);
        let session = Session::load(&container, &Config::default()).unwrap();

        let regs = session.registers();
        assert_eq!(regs.pc, session.program().entry_point);
        assert_eq!(regs.gpr[1], u64::from(session.program().stack_pointer));
        assert_eq!(regs.gpr[2], session.program().toc);
        assert_eq!(regs.gpr[3], 0);
    }

    #[test]
    fn test_budget_exhaustion_halts() {
        // Four harmless adds, budget covers three
        let container = plain_container(&[
            0x3863_0001, // addi r3, r3, 1
            0x3863_0001,
            0x3863_0001,
            0x3863_0001,
        ]);
        let mut session = Session::load(&container, &Config::default()).unwrap();

        let reason = session.run_until_halt(3).unwrap();
        assert_eq!(reason, HaltReason::BudgetExhausted);
        assert_eq!(session.state(), SessionState::Halted);
        assert_eq!(session.registers().gpr[3], 3);
        assert_eq!(session.registers().pc, USER_BASE + 12);

        // Halted is resumable
        let reason = session.run_until_halt(1).unwrap();
        assert_eq!(reason, HaltReason::BudgetExhausted);
        assert_eq!(session.registers().gpr[3], 4);
    }

    #[test]
    fn test_breakpoint_halts_and_resumes() {
        let container = plain_container(&[
            0x3860_0001, // addi r3, 0, 1
            0x3880_0002, // addi r4, 0, 2
        ]);
        let mut session = Session::load(&container, &Config::default()).unwrap();
        session.add_breakpoint(USER_BASE + 4);

        let reason = session.run_until_halt(10).unwrap();
        assert_eq!(
            reason,
            HaltReason::Breakpoint {
                addr: USER_BASE + 4
            }
        );
        assert_eq!(session.state(), SessionState::Halted);
        assert_eq!(session.registers().gpr[3], 1);
        assert_eq!(session.registers().gpr[4], 0);

        assert!(session.remove_breakpoint(USER_BASE + 4));
        let reason = session.run_until_halt(1).unwrap();
        assert_eq!(reason, HaltReason::BudgetExhausted);
        assert_eq!(session.registers().gpr[4], 2);
    }

    #[test]
    fn test_config_breakpoints_installed() {
        let container = plain_container(&[0x3860_0001, 0x3880_0002]);
        let mut config = Config::default();
        config.debug.breakpoints = vec![USER_BASE];

        let mut session = Session::load(&container, &config).unwrap();
        let reason = session.run_until_halt(10).unwrap();
        assert_eq!(reason, HaltReason::Breakpoint { addr: USER_BASE });
        assert_eq!(session.instructions_executed(), 0);
    }

    #[test]
    fn test_syscall_halts_with_id() {
        let container = plain_container(&[
            0x3960_0030, // addi r11, 0, 0x30
            0x4400_0002, // sc
        ]);
        let mut session = Session::load(&container, &Config::default()).unwrap();

        let reason = session.run_until_halt(10).unwrap();
        assert_eq!(reason, HaltReason::Syscall { id: 0x30 });
        assert_eq!(session.state(), SessionState::Halted);
        // The syscall instruction itself retired
        assert_eq!(session.registers().pc, USER_BASE + 8);
    }

    #[test]
    fn test_stop_handle_pauses() {
        let container = plain_container(&[0x3863_0001, 0x3863_0001]);
        let mut session = Session::load(&container, &Config::default()).unwrap();

        session.stop_handle().store(true, Ordering::Release);
        let reason = session.run_until_halt(10).unwrap();
        assert_eq!(reason, HaltReason::Stopped);
        assert_eq!(session.registers().gpr[3], 0);

        // The flag is consumed, execution continues afterwards
        let reason = session.run_until_halt(2).unwrap();
        assert_eq!(reason, HaltReason::BudgetExhausted);
        assert_eq!(session.registers().gpr[3], 2);
    }

    #[test]
    fn test_fault_is_terminal() {
        // All-zero word is not a valid instruction
        let container = plain_container(&[0x0000_0000]);
        let mut session = Session::load(&container, &Config::default()).unwrap();

        let err = session.step().unwrap_err();
        assert!(matches!(
            err,
            EmulatorError::Ppu(amp_core::PpuError::UnimplementedOpcode { .. })
        ));
        assert_eq!(session.state(), SessionState::Faulted);

        // Stepping a faulted session is refused without touching state
        let err = session.step().unwrap_err();
        assert!(matches!(err, EmulatorError::Session(_)));
        assert_eq!(session.state(), SessionState::Faulted);
        assert_eq!(session.instructions_executed(), 0);
    }

    #[test]
    fn test_faulted_session_refuses_run() {
        let container = plain_container(&[0x0000_0000]);
        let mut session = Session::load(&container, &Config::default()).unwrap();

        assert!(session.step().is_err());
        let err = session.run_until_halt(5).unwrap_err();
        assert!(matches!(err, EmulatorError::Session(_)));
    }
}
