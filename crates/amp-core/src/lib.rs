//! Core support for the ampere PS3 emulator
//!
//! This crate provides the foundational types, error handling,
//! configuration, and logging infrastructure for the emulator.

pub mod config;
pub mod error;
pub mod logging;

pub use config::Config;
pub use error::{EmulatorError, LoaderError, MemoryError, PpuError, Result};
