//! Guest memory for the ampere PS3 emulator
//!
//! Provides the flat, bounds-checked address space the interpreter
//! executes against. The backing buffer is owned; there are no raw
//! pointers and no memory-mapped regions.

pub mod image;

pub use image::{BeValue, MemoryImage};
