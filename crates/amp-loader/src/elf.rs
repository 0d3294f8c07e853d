//! Big-endian ELF64 loading
//!
//! The decrypted SELF image (or a bare executable) is a PowerPC ELF.
//! Only the pieces needed to run are handled here: the file header and
//! the PT_LOAD program headers, mapped into the guest memory image.

use amp_core::error::LoaderError;
use amp_memory::MemoryImage;
use bitflags::bitflags;
use tracing::{debug, info, warn};

/// ELF file magic
pub const ELF_MAGIC: [u8; 4] = [0x7F, 0x45, 0x4C, 0x46];

/// PowerPC64 machine type
pub const EM_PPC64: u16 = 21;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const PT_LOAD: u32 = 1;

bitflags! {
    /// Segment permissions from the program header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentPerms: u32 {
        const EXECUTE = 0x1;
        const WRITE = 0x2;
        const READ = 0x4;
    }
}

/// The fields of the ELF header the emulator cares about
#[derive(Debug, Clone, Copy)]
pub struct ElfHeader {
    pub elf_type: u16,
    pub machine: u16,
    pub entry: u64,
    pub phoff: u64,
    pub phnum: u16,
}

/// One program header
#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub flags: SegmentPerms,
    pub offset: u64,
    pub vaddr: u64,
    pub filesz: u64,
    pub memsz: u64,
}

/// Summary of one segment mapped into guest memory
#[derive(Debug, Clone, Copy)]
pub struct LoadedSegment {
    pub vaddr: u32,
    pub memsz: u32,
    pub perms: SegmentPerms,
}

fn invalid(msg: impl Into<String>) -> LoaderError {
    LoaderError::InvalidElf(msg.into())
}

fn be16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn be32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn be64(data: &[u8], offset: usize) -> u64 {
    u64::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
        data[offset + 4],
        data[offset + 5],
        data[offset + 6],
        data[offset + 7],
    ])
}

/// ELF64 executable loader
pub struct ElfLoader {
    header: ElfHeader,
    phdrs: Vec<ProgramHeader>,
}

impl ElfLoader {
    /// Check if data starts with the ELF magic
    pub fn is_elf(data: &[u8]) -> bool {
        data.len() >= 4 && data[0..4] == ELF_MAGIC
    }

    /// Parse and validate the ELF header and program header table
    pub fn parse(data: &[u8]) -> Result<Self, LoaderError> {
        if data.len() < EHDR_SIZE {
            return Err(invalid(format!("file too small: {} bytes", data.len())));
        }
        if data[0..4] != ELF_MAGIC {
            return Err(invalid("bad ELF magic"));
        }
        if data[4] != 2 {
            return Err(invalid(format!("not a 64-bit ELF (class {})", data[4])));
        }
        if data[5] != 2 {
            return Err(invalid(format!(
                "not a big-endian ELF (encoding {})",
                data[5]
            )));
        }

        let header = ElfHeader {
            elf_type: be16(data, 16),
            machine: be16(data, 18),
            entry: be64(data, 24),
            phoff: be64(data, 32),
            phnum: be16(data, 56),
        };

        if header.machine != EM_PPC64 {
            warn!(machine = header.machine, "unexpected ELF machine type");
        }
        if header.phnum == 0 {
            return Err(invalid("no program headers"));
        }

        let phentsize = be16(data, 54) as usize;
        if phentsize != PHDR_SIZE {
            return Err(invalid(format!("unsupported phentsize {phentsize}")));
        }

        let table_len = header.phnum as u64 * PHDR_SIZE as u64;
        let table_end = header
            .phoff
            .checked_add(table_len)
            .ok_or_else(|| invalid("program header table overflows"))?;
        if table_end > data.len() as u64 {
            return Err(invalid(format!(
                "program header table at {:#x}+{table_len:#x} exceeds file size {:#x}",
                header.phoff,
                data.len()
            )));
        }

        let mut phdrs = Vec::with_capacity(header.phnum as usize);
        for i in 0..header.phnum as usize {
            let base = header.phoff as usize + i * PHDR_SIZE;
            phdrs.push(ProgramHeader {
                p_type: be32(data, base),
                flags: SegmentPerms::from_bits_truncate(be32(data, base + 4)),
                offset: be64(data, base + 8),
                vaddr: be64(data, base + 16),
                filesz: be64(data, base + 32),
                memsz: be64(data, base + 40),
            });
        }

        debug!(
            entry = format_args!("{:#x}", header.entry),
            phnum = header.phnum,
            "parsed ELF header"
        );

        Ok(Self { header, phdrs })
    }

    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    /// Raw entry point from the ELF header. On PowerPC64 this usually
    /// names a function descriptor rather than code.
    pub fn entry_point(&self) -> u64 {
        self.header.entry
    }

    pub fn program_headers(&self) -> &[ProgramHeader] {
        &self.phdrs
    }

    /// Map all PT_LOAD segments into the guest memory image. File
    /// bytes are copied and the BSS tail of each segment is zeroed.
    pub fn load_segments(
        &self,
        data: &[u8],
        image: &mut MemoryImage,
    ) -> Result<Vec<LoadedSegment>, LoaderError> {
        let mut loaded = Vec::new();

        for (i, phdr) in self.phdrs.iter().enumerate() {
            if phdr.p_type != PT_LOAD {
                continue;
            }
            if phdr.filesz > phdr.memsz {
                return Err(invalid(format!(
                    "segment {i}: file size {:#x} exceeds memory size {:#x}",
                    phdr.filesz, phdr.memsz
                )));
            }

            let end = phdr
                .offset
                .checked_add(phdr.filesz)
                .ok_or_else(|| invalid(format!("segment {i}: file range overflows")))?;
            let bytes = data
                .get(phdr.offset as usize..end as usize)
                .ok_or_else(|| {
                    invalid(format!(
                        "segment {i}: file range {:#x}+{:#x} exceeds image size {:#x}",
                        phdr.offset,
                        phdr.filesz,
                        data.len()
                    ))
                })?;

            let vaddr = u32::try_from(phdr.vaddr)
                .map_err(|_| invalid(format!("segment {i}: vaddr {:#x} exceeds guest space", phdr.vaddr)))?;

            image
                .write_bytes(vaddr, bytes)
                .map_err(|e| invalid(format!("segment {i}: {e}")))?;

            // Zero the BSS portion explicitly so reloading an image is
            // deterministic even into dirty memory
            let bss_len = (phdr.memsz - phdr.filesz) as usize;
            if bss_len > 0 {
                let bss_start = vaddr.wrapping_add(phdr.filesz as u32);
                image
                    .fill_zero(bss_start, bss_len)
                    .map_err(|e| invalid(format!("segment {i} bss: {e}")))?;
            }

            info!(
                vaddr = format_args!("{vaddr:#x}"),
                filesz = phdr.filesz,
                memsz = phdr.memsz,
                flags = ?phdr.flags,
                "mapped segment"
            );

            loaded.push(LoadedSegment {
                vaddr,
                memsz: phdr.memsz as u32,
                perms: phdr.flags,
            });
        }

        if loaded.is_empty() {
            return Err(invalid("no loadable segments"));
        }

        Ok(loaded)
    }
}
