//! Error types for the ampere emulator

use thiserror::Error;

/// Main error type for the emulator
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("PPU error: {0}")]
    Ppu(#[from] PpuError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Session error: {0}")]
    Session(String),
}

/// Container parsing and decryption errors
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Header or segment table failed validation. Fatal for the file,
    /// nothing was decrypted.
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    /// No key in the store matches the container's selection metadata.
    #[error("No key for type {key_type}, revision 0x{revision:04x}, version 0x{version:x}")]
    KeyNotFound {
        key_type: String,
        revision: u16,
        version: u64,
    },

    /// An OMAC or digest check over decrypted data did not match.
    #[error("Integrity error: {0}")]
    IntegrityError(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid ELF: {0}")]
    InvalidElf(String),
}

/// Memory-image access errors
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Out of bounds: {len} byte access at 0x{addr:08x} (image size 0x{size:x})")]
    OutOfBounds { addr: u32, len: usize, size: usize },

    #[error("Alignment error: address 0x{addr:08x} not aligned to {align}")]
    AlignmentError { addr: u32, align: u32 },
}

/// PPU (PowerPC Processing Unit) errors
#[derive(Error, Debug)]
pub enum PpuError {
    /// Opcode decoded to a table entry with no implemented semantics.
    /// The raw word is carried for diagnostics; this is never a no-op.
    #[error("Unimplemented opcode 0x{opcode:08x} at 0x{addr:08x}")]
    UnimplementedOpcode { addr: u32, opcode: u32 },

    #[error("Memory fault at 0x{addr:08x}: {source}")]
    MemoryFault { addr: u32, source: MemoryError },

    #[error("Trap at 0x{addr:08x}")]
    Trap { addr: u32 },
}

/// Result type alias for emulator operations
pub type Result<T> = std::result::Result<T, EmulatorError>;
