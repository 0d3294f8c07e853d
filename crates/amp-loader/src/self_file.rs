//! SELF container parsing
//!
//! Reads the signed executable container format: SCE header, extended
//! header, application info and the segment table. Parsing performs no
//! decryption and no key lookups, so a malformed file is rejected
//! before any key material is touched.

use amp_core::error::LoaderError;
use tracing::{debug, info};

use crate::keys::KeyType;

/// SELF file magic ("SCE\0")
pub const SELF_MAGIC: [u8; 4] = [0x53, 0x43, 0x45, 0x00];

/// Supported SCE header version
pub const SCE_VERSION: u32 = 2;

/// SCE category for signed executables
pub const CATEGORY_SELF: u16 = 1;

/// Supported extended header version
pub const EXT_VERSION: u64 = 3;

pub(crate) const SCE_HEADER_SIZE: usize = 32;
pub(crate) const EXT_HEADER_SIZE: usize = 48;
pub(crate) const APP_INFO_SIZE: usize = 32;
pub(crate) const SEGMENT_ENTRY_SIZE: usize = 40;

/// SCE file header, 32 bytes at offset 0
#[derive(Debug, Clone, Copy)]
pub struct SceHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub key_revision: u16,
    pub category: u16,
    pub ext_header_size: u32,
    pub file_offset: u64,
    pub file_size: u64,
}

/// SELF extended header, 48 bytes following the SCE header
#[derive(Debug, Clone, Copy)]
pub struct ExtendedHeader {
    pub version: u64,
    pub app_info_offset: u64,
    pub segment_table_offset: u64,
    pub metadata_offset: u64,
    pub metadata_size: u64,
    pub segment_count: u32,
}

/// Application info, 32 bytes
#[derive(Debug, Clone, Copy)]
pub struct AppInfo {
    pub auth_id: u64,
    pub vendor_id: u32,
    pub program_type: u32,
    pub version: u64,
}

/// Segment compression flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Plain,
    Zlib,
}

/// Segment encryption flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    Encrypted,
    Plain,
}

/// One entry of the segment table, 40 bytes on the wire
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    /// Position in the segment table
    pub index: usize,
    /// Offset of the segment data within the file
    pub offset: u64,
    /// Size of the stored (possibly compressed and encrypted) data
    pub stored_size: u64,
    /// Size after decryption and decompression
    pub decrypted_size: u64,
    pub compression: Compression,
    pub encryption: Encryption,
    /// Index into the metadata key vault
    pub key_index: u32,
    /// Index into the metadata key vault
    pub iv_index: u32,
}

/// A fully parsed container, ready for key resolution and decryption
#[derive(Debug, Clone)]
pub struct ParsedSelf {
    pub header: SceHeader,
    pub ext: ExtendedHeader,
    pub app_info: AppInfo,
    pub segments: Vec<Segment>,
    pub key_type: KeyType,
}

impl ParsedSelf {
    /// The (type, revision, version) triple that selects the key
    pub fn key_selection(&self) -> (KeyType, u16, u64) {
        (self.key_type, self.header.key_revision, self.app_info.version)
    }

    /// Whether decryption requires key material. Containers without a
    /// metadata block carry only plain segments.
    pub fn needs_key(&self) -> bool {
        self.ext.metadata_offset != 0
    }

    /// Total size of the decrypted image
    pub fn decrypted_len(&self) -> u64 {
        self.segments.iter().map(|s| s.decrypted_size).sum()
    }
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

fn malformed(msg: impl Into<String>) -> LoaderError {
    LoaderError::MalformedContainer(msg.into())
}

/// Checked absolute range within the file
fn check_range(data: &[u8], offset: u64, len: u64, what: &str) -> Result<usize, LoaderError> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| malformed(format!("{what} range overflows at offset {offset:#x}")))?;
    if end > data.len() as u64 {
        return Err(malformed(format!(
            "{what} at {offset:#x}+{len:#x} exceeds file size {:#x}",
            data.len()
        )));
    }
    Ok(offset as usize)
}

/// SELF container reader
pub struct ContainerReader;

impl ContainerReader {
    /// Check if data starts with the SCE magic
    pub fn is_self(data: &[u8]) -> bool {
        data.len() >= 4 && data[0..4] == SELF_MAGIC
    }

    /// Parse and validate a SELF container
    pub fn parse(data: &[u8]) -> Result<ParsedSelf, LoaderError> {
        let header = Self::parse_header(data)?;
        let ext = Self::parse_ext_header(data)?;
        let app_info = Self::parse_app_info(data, &ext)?;

        let key_type = KeyType::from_program_type(app_info.program_type).ok_or_else(|| {
            malformed(format!(
                "unknown program type {:#x}",
                app_info.program_type
            ))
        })?;

        let segments = Self::parse_segments(data, &ext)?;

        let decrypted_len: u64 = segments.iter().map(|s| s.decrypted_size).sum();
        if decrypted_len != header.file_size {
            return Err(malformed(format!(
                "segment sizes total {decrypted_len:#x} but header declares {:#x}",
                header.file_size
            )));
        }

        if ext.metadata_offset == 0 {
            // No metadata means no key vault, so nothing can be encrypted
            if let Some(seg) = segments.iter().find(|s| s.encryption == Encryption::Encrypted) {
                return Err(malformed(format!(
                    "segment {} is encrypted but the container has no metadata",
                    seg.index
                )));
            }
        } else {
            check_range(data, ext.metadata_offset, ext.metadata_size, "metadata")?;
        }

        info!(
            program_type = ?key_type,
            key_revision = format_args!("{:#06x}", header.key_revision),
            version = format_args!("{:#x}", app_info.version),
            segments = segments.len(),
            "parsed SELF container"
        );

        Ok(ParsedSelf {
            header,
            ext,
            app_info,
            segments,
            key_type,
        })
    }

    fn parse_header(data: &[u8]) -> Result<SceHeader, LoaderError> {
        if data.len() < SCE_HEADER_SIZE {
            return Err(malformed(format!(
                "file too small for SCE header: {} bytes",
                data.len()
            )));
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[0..4]);
        if magic != SELF_MAGIC {
            return Err(malformed(format!(
                "bad magic {:02x}{:02x}{:02x}{:02x}",
                magic[0], magic[1], magic[2], magic[3]
            )));
        }

        let version = be32(data, 4);
        if version != SCE_VERSION {
            return Err(malformed(format!("unsupported SCE version {version}")));
        }

        let key_revision = be16(data, 8);
        let category = be16(data, 10);
        if category != CATEGORY_SELF {
            return Err(malformed(format!("unsupported category {category}")));
        }

        let header = SceHeader {
            magic,
            version,
            key_revision,
            category,
            ext_header_size: be32(data, 12),
            file_offset: be64(data, 16),
            file_size: be64(data, 24),
        };

        debug!(
            key_revision = header.key_revision,
            file_size = header.file_size,
            "SCE header"
        );

        Ok(header)
    }

    fn parse_ext_header(data: &[u8]) -> Result<ExtendedHeader, LoaderError> {
        if data.len() < SCE_HEADER_SIZE + EXT_HEADER_SIZE {
            return Err(malformed("file too small for extended header"));
        }
        let base = SCE_HEADER_SIZE;

        let version = be64(data, base);
        if version != EXT_VERSION {
            return Err(malformed(format!(
                "unsupported extended header version {version}"
            )));
        }

        Ok(ExtendedHeader {
            version,
            app_info_offset: be64(data, base + 8),
            segment_table_offset: be64(data, base + 16),
            metadata_offset: be64(data, base + 24),
            metadata_size: be64(data, base + 32),
            segment_count: be32(data, base + 40),
        })
    }

    fn parse_app_info(data: &[u8], ext: &ExtendedHeader) -> Result<AppInfo, LoaderError> {
        let base = check_range(
            data,
            ext.app_info_offset,
            APP_INFO_SIZE as u64,
            "application info",
        )?;

        Ok(AppInfo {
            auth_id: be64(data, base),
            vendor_id: be32(data, base + 8),
            program_type: be32(data, base + 12),
            version: be64(data, base + 16),
        })
    }

    fn parse_segments(data: &[u8], ext: &ExtendedHeader) -> Result<Vec<Segment>, LoaderError> {
        if ext.segment_count == 0 {
            return Err(malformed("container has no segments"));
        }

        let table_len = (ext.segment_count as u64)
            .checked_mul(SEGMENT_ENTRY_SIZE as u64)
            .ok_or_else(|| malformed("segment table size overflows"))?;
        let base = check_range(data, ext.segment_table_offset, table_len, "segment table")?;

        let mut segments = Vec::with_capacity(ext.segment_count as usize);
        for index in 0..ext.segment_count as usize {
            let entry = base + index * SEGMENT_ENTRY_SIZE;

            let offset = be64(data, entry);
            let stored_size = be64(data, entry + 8);
            let decrypted_size = be64(data, entry + 16);

            let compression = match be32(data, entry + 24) {
                1 => Compression::Plain,
                2 => Compression::Zlib,
                other => {
                    return Err(malformed(format!(
                        "segment {index}: unknown compression flag {other}"
                    )))
                }
            };
            let encryption = match be32(data, entry + 28) {
                1 => Encryption::Encrypted,
                2 => Encryption::Plain,
                other => {
                    return Err(malformed(format!(
                        "segment {index}: unknown encryption flag {other}"
                    )))
                }
            };

            // Segment data must live entirely inside the file
            check_range(data, offset, stored_size, "segment data")?;

            if compression == Compression::Plain && stored_size != decrypted_size {
                return Err(malformed(format!(
                    "segment {index}: stored size {stored_size:#x} differs from decrypted \
                     size {decrypted_size:#x} without compression"
                )));
            }
            if compression == Compression::Zlib && decrypted_size == 0 {
                return Err(malformed(format!(
                    "segment {index}: compressed segment with zero decrypted size"
                )));
            }

            segments.push(Segment {
                index,
                offset,
                stored_size,
                decrypted_size,
                compression,
                encryption,
                key_index: be32(data, entry + 32),
                iv_index: be32(data, entry + 36),
            });
        }

        // Reject overlapping segment data ranges
        let mut ranges: Vec<(u64, u64, usize)> = segments
            .iter()
            .map(|s| (s.offset, s.offset + s.stored_size, s.index))
            .collect();
        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            if pair[1].0 < pair[0].1 {
                return Err(malformed(format!(
                    "segments {} and {} overlap",
                    pair[0].2, pair[1].2
                )));
            }
        }

        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{build_plain_self, put32, put64};

    #[test]
    fn test_is_self() {
        let container = build_plain_self(&[b"hello"]);
        assert!(ContainerReader::is_self(&container));
        assert!(!ContainerReader::is_self(b"\x7fELF"));
        assert!(!ContainerReader::is_self(b"SC"));
    }

    #[test]
    fn test_parse_plain_container() {
        let container = build_plain_self(&[b"first segment!!!", b"second"]);
        let parsed = ContainerReader::parse(&container).unwrap();

        assert_eq!(parsed.header.key_revision, 0x0004);
        assert_eq!(parsed.key_type, KeyType::App);
        assert_eq!(parsed.app_info.version, 0x0001_0200_0000_0000);
        assert_eq!(parsed.segments.len(), 2);
        assert_eq!(parsed.segments[0].decrypted_size, 16);
        assert_eq!(parsed.segments[1].decrypted_size, 6);
        assert!(!parsed.needs_key());
        assert_eq!(
            parsed.key_selection(),
            (KeyType::App, 0x0004, 0x0001_0200_0000_0000)
        );
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut container = build_plain_self(&[b"data"]);
        container[0] = 0x7F;
        let err = ContainerReader::parse(&container).unwrap_err();
        assert!(matches!(err, LoaderError::MalformedContainer(_)));
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut container = build_plain_self(&[b"data"]);
        put32(&mut container, 4, 9);
        assert!(ContainerReader::parse(&container).is_err());
    }

    #[test]
    fn test_unknown_program_type_rejected() {
        let mut container = build_plain_self(&[b"data"]);
        let app = SCE_HEADER_SIZE + EXT_HEADER_SIZE;
        put32(&mut container, app + 12, 9);
        let err = ContainerReader::parse(&container).unwrap_err();
        assert!(err.to_string().contains("program type"));
    }

    #[test]
    fn test_segment_out_of_bounds_rejected() {
        let mut container = build_plain_self(&[b"data"]);
        let table = SCE_HEADER_SIZE + EXT_HEADER_SIZE + APP_INFO_SIZE;
        // point the segment past the end of the file
        let file_len = container.len() as u64;
        put64(&mut container, table, file_len);
        let err = ContainerReader::parse(&container).unwrap_err();
        assert!(matches!(err, LoaderError::MalformedContainer(_)));
    }

    #[test]
    fn test_segment_offset_overflow_rejected() {
        let mut container = build_plain_self(&[b"data"]);
        let table = SCE_HEADER_SIZE + EXT_HEADER_SIZE + APP_INFO_SIZE;
        put64(&mut container, table, u64::MAX - 2);
        assert!(ContainerReader::parse(&container).is_err());
    }

    #[test]
    fn test_overlapping_segments_rejected() {
        let container = build_plain_self(&[b"0123456789abcdef", b"xyz"]);
        let mut container = container;
        let table = SCE_HEADER_SIZE + EXT_HEADER_SIZE + APP_INFO_SIZE;
        let first_offset = be64(&container, table);
        // move the second segment into the middle of the first
        put64(&mut container, table + SEGMENT_ENTRY_SIZE, first_offset + 4);
        let err = ContainerReader::parse(&container).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_unknown_flags_rejected() {
        let mut container = build_plain_self(&[b"data"]);
        let table = SCE_HEADER_SIZE + EXT_HEADER_SIZE + APP_INFO_SIZE;
        put32(&mut container, table + 24, 7);
        assert!(ContainerReader::parse(&container).is_err());

        let mut container = build_plain_self(&[b"data"]);
        put32(&mut container, table + 28, 0);
        assert!(ContainerReader::parse(&container).is_err());
    }

    #[test]
    fn test_encrypted_without_metadata_rejected() {
        let mut container = build_plain_self(&[b"0123456789abcdef"]);
        let table = SCE_HEADER_SIZE + EXT_HEADER_SIZE + APP_INFO_SIZE;
        put32(&mut container, table + 28, 1); // mark encrypted
        let err = ContainerReader::parse(&container).unwrap_err();
        assert!(err.to_string().contains("no metadata"));
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut container = build_plain_self(&[b"data"]);
        put64(&mut container, 24, 999);
        let err = ContainerReader::parse(&container).unwrap_err();
        assert!(err.to_string().contains("declares"));
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert!(ContainerReader::parse(&[0x53, 0x43, 0x45, 0x00, 0, 0]).is_err());
        assert!(ContainerReader::parse(&[]).is_err());
    }
}
