//! Integration layer for the ampere emulator
//!
//! Connects the loader, memory and PPU crates: [`ProgramLoader`] takes
//! raw SELF or ELF bytes to a mapped guest image, and [`Session`] runs
//! that image on an interpreter-driven main thread with breakpoints,
//! step budgets and a cross-thread stop flag.

pub mod loader;
pub mod session;

pub use loader::{LoadedProgram, ProgramLoader};
pub use session::{HaltReason, Session, SessionState};
