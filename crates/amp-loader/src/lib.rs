//! Executable loading for the ampere emulator
//!
//! Takes a SELF container or a bare ELF from raw bytes to a guest
//! memory image: container parsing, key resolution, segment
//! decryption and ELF mapping, plus the PARAM.SFO sidecar format.

pub mod crypto;
pub mod elf;
pub mod keys;
pub mod self_file;
pub mod sfo;

#[cfg(test)]
mod testutil;

pub use crypto::{rap_to_klic, DecryptedImage, Decryptor};
pub use elf::{ElfLoader, LoadedSegment, SegmentPerms};
pub use keys::{Key, KeyStore, KeyType};
pub use self_file::{AppInfo, ContainerReader, ParsedSelf, SceHeader, Segment};
pub use sfo::{Sfo, SfoValue};
