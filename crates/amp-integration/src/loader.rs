//! Program loader for bringing executables into guest memory
//!
//! Takes raw file bytes through the full pipeline: SELF containers are
//! parsed, their key resolved and their segments decrypted; the
//! resulting (or directly supplied) image is mapped as an ELF when it
//! carries the magic, or flat at the user base otherwise. The loader
//! also computes the initial stack and TOC values for the main thread.

use amp_core::{Config, Result};
use amp_loader::{ContainerReader, Decryptor, ElfLoader, KeyStore, LoadedSegment};
use amp_memory::MemoryImage;
use tracing::{debug, info, warn};

/// Guest address space size (256 MB of main memory)
const MEMORY_SIZE: usize = 0x1000_0000;

/// Load address for images without ELF structure, matching the lowest
/// mapped address of PS3 user processes
pub(crate) const USER_BASE: u32 = 0x0001_0000;

/// Top of the main thread stack, just under the end of the image
const STACK_TOP: u32 = 0x0FFF_0000;

/// Default stack size for the main thread (1 MB)
const DEFAULT_STACK_SIZE: u32 = 0x0010_0000;

/// Initial stack frame reservation below the stack top, per the PS3 ABI
const STACK_FRAME_OFFSET: u32 = 0x70;

/// A program mapped into guest memory, ready to run
#[derive(Debug, Clone)]
pub struct LoadedProgram {
    /// Resolved entry point, past any function descriptor
    pub entry_point: u32,
    /// TOC pointer for r2, zero when the image carries none
    pub toc: u64,
    /// Initial r1 value
    pub stack_pointer: u32,
    pub stack_size: u32,
    /// Whether the input was a SELF container
    pub was_self: bool,
    /// Mapped segments, empty for flat images
    pub segments: Vec<LoadedSegment>,
}

/// Orchestrates parse, key resolution, decryption and mapping
pub struct ProgramLoader {
    keys: KeyStore,
}

impl ProgramLoader {
    pub fn new() -> Self {
        Self {
            keys: KeyStore::new(),
        }
    }

    /// The key store backing SELF decryption
    pub fn key_store(&self) -> &KeyStore {
        &self.keys
    }

    /// Load raw executable bytes into a fresh memory image
    pub fn load(&self, bytes: &[u8], config: &Config) -> Result<(LoadedProgram, MemoryImage)> {
        let mut image = MemoryImage::new(MEMORY_SIZE);
        let program = self.load_into(bytes, config, &mut image)?;
        Ok((program, image))
    }

    fn load_into(
        &self,
        bytes: &[u8],
        config: &Config,
        image: &mut MemoryImage,
    ) -> Result<LoadedProgram> {
        let (plain, was_self) = if ContainerReader::is_self(bytes) {
            info!("input is a SELF container");
            let parsed = ContainerReader::parse(bytes)?;

            // Keys are only touched for containers that carry a
            // metadata block
            let key = if parsed.needs_key() {
                let (key_type, revision, version) = parsed.key_selection();
                Some(self.keys.resolve(key_type, revision, version)?)
            } else {
                None
            };

            let decryptor = Decryptor::new(config.loader.strict_integrity);
            let decrypted = decryptor.decrypt(&parsed, key, bytes)?;
            for warning in decrypted.warnings() {
                warn!("integrity: {warning}");
            }

            if let Some(path) = &config.loader.dump_decrypted {
                // A failed dump never fails the load
                match std::fs::write(path, decrypted.as_bytes()) {
                    Ok(()) => info!(path = %path.display(), "wrote decrypted image"),
                    Err(e) => warn!(path = %path.display(), "dump failed: {e}"),
                }
            }

            (decrypted.into_bytes(), true)
        } else {
            (bytes.to_vec(), false)
        };

        let (entry_point, toc, segments) = if ElfLoader::is_elf(&plain) {
            let elf = ElfLoader::parse(&plain)?;
            let segments = elf.load_segments(&plain, image)?;
            let (entry_point, toc) = resolve_entry(image, elf.entry_point());
            (entry_point, toc, segments)
        } else {
            // No ELF structure: map the image flat at the user base and
            // start executing from its first word
            debug!(len = plain.len(), "image has no ELF header, mapping flat");
            image.write_bytes(USER_BASE, &plain)?;
            (USER_BASE, 0, Vec::new())
        };

        let stack_pointer = STACK_TOP - STACK_FRAME_OFFSET;

        info!(
            entry = format_args!("{entry_point:#010x}"),
            toc = format_args!("{toc:#x}"),
            sp = format_args!("{stack_pointer:#010x}"),
            was_self,
            "program loaded"
        );

        Ok(LoadedProgram {
            entry_point,
            toc,
            stack_pointer,
            stack_size: DEFAULT_STACK_SIZE,
            was_self,
            segments,
        })
    }
}

impl Default for ProgramLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the raw ELF entry through a function descriptor when one is
/// present.
///
/// PowerPC64 entry points conventionally name an OPD entry: a pair of
/// words holding the code address and the TOC value. Some images point
/// straight at code instead, so the pair is only taken as a descriptor
/// when both words look like mapped user addresses.
fn resolve_entry(image: &MemoryImage, raw_entry: u64) -> (u32, u64) {
    let addr = raw_entry as u32;

    let reads = (image.read_be32(addr), image.read_be32(addr.wrapping_add(4)));
    if let (Ok(first), Ok(second)) = reads {
        let code_ok =
            first >= USER_BASE && (first as usize) < MEMORY_SIZE && first % 4 == 0;
        let toc_ok = second >= USER_BASE && (second as usize) < MEMORY_SIZE;
        if code_ok && toc_ok {
            debug!(
                opd = format_args!("{addr:#010x}"),
                code = format_args!("{first:#010x}"),
                toc = format_args!("{second:#010x}"),
                "entry resolves through a function descriptor"
            );
            return (first, u64::from(second));
        }
    }

    (addr, 0)
}
