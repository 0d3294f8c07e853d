//! PARAM.SFO reading
//!
//! System parameter files sit next to the executable and carry the
//! title, title id and version strings the emulator shows in logs.
//! Unlike the rest of the platform formats these tables are
//! little-endian.

use amp_core::error::LoaderError;
use std::collections::HashMap;
use tracing::debug;

/// SFO file magic ("\0PSF")
pub const SFO_MAGIC: [u8; 4] = [0x00, 0x50, 0x53, 0x46];

const HEADER_SIZE: usize = 20;
const INDEX_ENTRY_SIZE: usize = 16;

/// UTF-8 data without null termination
const FMT_UTF8_SPECIAL: u16 = 0x0004;
/// Null-terminated UTF-8 data
const FMT_UTF8: u16 = 0x0204;
/// 32-bit integer
const FMT_INTEGER: u16 = 0x0404;

/// One parameter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SfoValue {
    Utf8(String),
    Integer(u32),
}

/// Parsed parameter file
#[derive(Debug, Default)]
pub struct Sfo {
    entries: HashMap<String, SfoValue>,
}

fn malformed(msg: impl Into<String>) -> LoaderError {
    LoaderError::MalformedContainer(format!("SFO: {}", msg.into()))
}

fn le16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn le32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

impl Sfo {
    /// Check if data starts with the SFO magic
    pub fn is_sfo(data: &[u8]) -> bool {
        data.len() >= 4 && data[0..4] == SFO_MAGIC
    }

    /// Parse a parameter file
    pub fn parse(data: &[u8]) -> Result<Self, LoaderError> {
        if data.len() < HEADER_SIZE {
            return Err(malformed(format!("file too small: {} bytes", data.len())));
        }
        if data[0..4] != SFO_MAGIC {
            return Err(malformed("bad magic"));
        }

        let key_table_start = le32(data, 8) as usize;
        let data_table_start = le32(data, 12) as usize;
        let entry_count = le32(data, 16) as usize;

        let index_end = HEADER_SIZE
            .checked_add(entry_count.saturating_mul(INDEX_ENTRY_SIZE))
            .ok_or_else(|| malformed("index table size overflows"))?;
        if index_end > data.len() {
            return Err(malformed(format!(
                "index table for {entry_count} entries exceeds file size {}",
                data.len()
            )));
        }

        let mut entries = HashMap::with_capacity(entry_count);

        for i in 0..entry_count {
            let base = HEADER_SIZE + i * INDEX_ENTRY_SIZE;
            let key_offset = le16(data, base) as usize;
            let data_fmt = le16(data, base + 2);
            let data_len = le32(data, base + 4) as usize;
            let data_offset = le32(data, base + 12) as usize;

            let key_start = key_table_start
                .checked_add(key_offset)
                .ok_or_else(|| malformed(format!("entry {i}: key offset overflows")))?;
            let key_bytes = data
                .get(key_start..)
                .and_then(|tail| tail.split(|&b| b == 0).next())
                .ok_or_else(|| malformed(format!("entry {i}: key outside the file")))?;
            let key = String::from_utf8_lossy(key_bytes).into_owned();

            let value_start = data_table_start
                .checked_add(data_offset)
                .ok_or_else(|| malformed(format!("entry {i}: data offset overflows")))?;
            let value_bytes = data
                .get(value_start..value_start + data_len)
                .ok_or_else(|| malformed(format!("entry {i}: data outside the file")))?;

            let value = match data_fmt {
                FMT_INTEGER => {
                    if data_len != 4 {
                        return Err(malformed(format!(
                            "entry {i}: integer with length {data_len}"
                        )));
                    }
                    SfoValue::Integer(le32(data, value_start))
                }
                FMT_UTF8 | FMT_UTF8_SPECIAL => {
                    let text = value_bytes
                        .split(|&b| b == 0)
                        .next()
                        .unwrap_or(value_bytes);
                    SfoValue::Utf8(String::from_utf8_lossy(text).into_owned())
                }
                other => {
                    return Err(malformed(format!(
                        "entry {i}: unknown data format {other:#06x}"
                    )))
                }
            };

            debug!(key = %key, value = ?value, "SFO entry");
            entries.insert(key, value);
        }

        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&SfoValue> {
        self.entries.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(SfoValue::Utf8(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_integer(&self, key: &str) -> Option<u32> {
        match self.entries.get(key) {
            Some(SfoValue::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.get_string("TITLE")
    }

    pub fn title_id(&self) -> Option<&str> {
        self.get_string("TITLE_ID")
    }

    pub fn app_version(&self) -> Option<&str> {
        self.get_string("APP_VER")
    }

    pub fn entries(&self) -> &HashMap<String, SfoValue> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
