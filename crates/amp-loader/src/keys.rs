//! Compiled-in SELF decryption keys
//!
//! Key selection is driven entirely by container metadata: the program
//! type, the key revision from the SCE header and the firmware version
//! from the application info pick exactly one record. Lookup fails
//! closed; a near match would decrypt to garbage, so there is no
//! fallback of any kind.

use amp_core::error::LoaderError;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

/// Classification of SELF key material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum KeyType {
    /// lv0 secure loader keys
    Level0 = 1,
    /// lv1 hypervisor keys
    Level1 = 2,
    /// lv2 kernel keys
    Level2 = 3,
    /// Application keys
    App = 4,
    /// Disc image keys
    DiskImage = 5,
    /// Isolated loader keys
    Loader = 6,
    /// Miscellaneous system module keys
    Other = 7,
    /// NPDRM-wrapped application keys
    Npdrm = 8,
}

impl KeyType {
    /// Map the program type field from the application info
    pub fn from_program_type(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Level0),
            2 => Some(Self::Level1),
            3 => Some(Self::Level2),
            4 => Some(Self::App),
            5 => Some(Self::DiskImage),
            6 => Some(Self::Loader),
            7 => Some(Self::Other),
            8 => Some(Self::Npdrm),
            _ => None,
        }
    }
}

/// One decryption key record, immutable once constructed
#[derive(Debug, Clone)]
pub struct Key {
    pub version: u64,
    pub revision: u16,
    pub key_type: KeyType,
    pub erk: [u8; 32],
    pub riv: [u8; 16],
    pub public: [u8; 40],
    pub private: [u8; 21],
    pub curve_type: u32,
}

impl Key {
    /// Build a symmetric-only record; the curve material is unused by
    /// the decryption path and stays zeroed for these entries.
    pub(crate) const fn symmetric(
        version: u64,
        revision: u16,
        key_type: KeyType,
        erk: [u8; 32],
        riv: [u8; 16],
    ) -> Self {
        Self {
            version,
            revision,
            key_type,
            erk,
            riv,
            public: [0u8; 40],
            private: [0u8; 21],
            curve_type: 0,
        }
    }
}

/// Default content key for unlicensed NPDRM content
pub const FREE_KLIC: [u8; 16] = [
    0x72, 0xF9, 0x90, 0x78, 0x8F, 0x9C, 0xFF, 0x74, 0x57, 0x25, 0xF0, 0x8E, 0x4C, 0x12, 0x83, 0x87,
];

/// Key that unwraps a klicensee before use
pub const KLIC_KEY: [u8; 16] = [
    0xF2, 0xFB, 0xCA, 0x7A, 0x75, 0xB0, 0x4E, 0xDC, 0x13, 0x90, 0x63, 0x8C, 0xCD, 0xFD, 0xD1, 0xEE,
];

/// Retail package root key
pub const SCEPKG_ERK: [u8; 32] = [
    0xA9, 0x78, 0x18, 0xBD, 0x19, 0x3A, 0x67, 0xA1, 0x6F, 0xE8, 0x3A, 0x85, 0x5E, 0x1B, 0xE9, 0xFB,
    0x56, 0x40, 0x93, 0x8D, 0x4D, 0xBC, 0xB2, 0xCB, 0x52, 0xC5, 0xA2, 0xF8, 0xB0, 0x2B, 0x10, 0x31,
];

/// Retail package root IV
pub const SCEPKG_RIV: [u8; 16] = [
    0x4A, 0xCE, 0xF0, 0x12, 0x24, 0xFB, 0xEE, 0xDF, 0x82, 0x45, 0xF8, 0xFF, 0x10, 0x21, 0x1E, 0x6E,
];

/// RAP-to-klicensee transform key
pub const RAP_KEY: [u8; 16] = [
    0x86, 0x9F, 0x77, 0x45, 0xC1, 0x3F, 0xD8, 0x90, 0xCC, 0xF2, 0x91, 0x88, 0xE3, 0xCC, 0x3E, 0xDF,
];

/// RAP transform byte permutation
pub const RAP_PBOX: [u8; 16] = [
    0x0C, 0x03, 0x06, 0x04, 0x01, 0x0B, 0x0F, 0x08, 0x02, 0x07, 0x00, 0x05, 0x0A, 0x0E, 0x0D, 0x09,
];

/// RAP transform xor table
pub const RAP_E1: [u8; 16] = [
    0xA9, 0x3E, 0x1F, 0xD6, 0x7C, 0x55, 0xA3, 0x29, 0xB7, 0x5F, 0xDD, 0xA6, 0x2A, 0x95, 0xC7, 0xA5,
];

/// RAP transform subtraction table
pub const RAP_E2: [u8; 16] = [
    0x67, 0xD4, 0x5D, 0xA3, 0x29, 0x6D, 0x00, 0x6A, 0x4E, 0x7C, 0x53, 0x7B, 0xF5, 0x53, 0x8C, 0x74,
];

/// The fixed key table. Revisions and versions follow the firmware
/// encoding used inside the containers themselves (major.minor packed
/// into the top half of the 64-bit version field).
static SELF_KEYS: Lazy<Vec<Key>> = Lazy::new(|| {
    vec![
        // lv0ldr
        Key::symmetric(
            0x0000_0001_0000_0000,
            0x0000,
            KeyType::Level0,
            [
                0xCA, 0x7A, 0x24, 0xEC, 0x38, 0xBD, 0xB4, 0x5B, 0x98, 0xCC, 0xD7, 0xF3, 0x51, 0xEA,
                0x20, 0x91, 0xB7, 0x5D, 0x48, 0xF0, 0x3C, 0x2E, 0x81, 0x09, 0x6F, 0xDA, 0x17, 0x44,
                0xAE, 0x63, 0x0B, 0xF2,
            ],
            [
                0x8B, 0x2E, 0xF7, 0x30, 0x41, 0xC9, 0x56, 0xAD, 0x64, 0x19, 0xDB, 0x82, 0x0F, 0xE5,
                0x7C, 0x93,
            ],
        ),
        // lv1ldr
        Key::symmetric(
            0x0000_0001_0000_0000,
            0x0000,
            KeyType::Level1,
            [
                0x14, 0xC9, 0x82, 0x5F, 0xE6, 0x33, 0x70, 0xAB, 0x2D, 0x94, 0x4B, 0xD8, 0x1F, 0x66,
                0xF5, 0x0C, 0xE3, 0x58, 0xA1, 0x3A, 0x87, 0x20, 0xDD, 0x76, 0x09, 0xB2, 0xCF, 0x64,
                0x15, 0xE8, 0x93, 0x4E,
            ],
            [
                0x37, 0xAC, 0x51, 0xE2, 0x9F, 0x08, 0xBD, 0x46, 0xD3, 0x6A, 0x25, 0xF8, 0x81, 0x1C,
                0xCB, 0x50,
            ],
        ),
        // lv2ldr
        Key::symmetric(
            0x0000_0001_0000_0000,
            0x0000,
            KeyType::Level2,
            [
                0x7D, 0x20, 0xB9, 0x4E, 0xD1, 0x6C, 0x0F, 0xA2, 0x85, 0x3A, 0xE7, 0x50, 0xCB, 0x16,
                0x99, 0x24, 0x4F, 0xD6, 0x61, 0xF8, 0x2B, 0xB0, 0x05, 0x9A, 0xC3, 0x7E, 0x11, 0xA4,
                0x59, 0xEC, 0x37, 0x82,
            ],
            [
                0xE9, 0x14, 0x6B, 0xD0, 0x2F, 0xB8, 0x45, 0x9E, 0x53, 0xC8, 0x07, 0x7A, 0xA1, 0x3C,
                0xF6, 0x2D,
            ],
        ),
        // appldr 1.00
        Key::symmetric(
            0x0001_0000_0000_0000,
            0x0001,
            KeyType::App,
            [
                0x95, 0x48, 0x0F, 0xB2, 0x6D, 0xE0, 0x53, 0x3E, 0xC1, 0x7A, 0x25, 0x98, 0x4B, 0xD4,
                0x6F, 0x12, 0xAD, 0x30, 0xE5, 0x58, 0x83, 0x0A, 0xB7, 0x4C, 0xF1, 0x26, 0xDB, 0x60,
                0x1D, 0x8E, 0xA3, 0x78,
            ],
            [
                0x5C, 0xE1, 0x36, 0x8B, 0xF0, 0x4D, 0x92, 0x27, 0xBA, 0x05, 0x68, 0xD3, 0x1E, 0xA9,
                0x74, 0xCF,
            ],
        ),
        // appldr 1.02
        Key::symmetric(
            0x0001_0200_0000_0000,
            0x0004,
            KeyType::App,
            [
                0x42, 0xDF, 0x90, 0x2B, 0xE4, 0x71, 0x1C, 0xA7, 0x5A, 0x05, 0xBE, 0x49, 0xD2, 0x67,
                0xF8, 0x23, 0x8C, 0x31, 0xE6, 0x5B, 0x90, 0x0D, 0xBA, 0x47, 0xFC, 0x29, 0xD6, 0x81,
                0x34, 0xAF, 0x52, 0xE5,
            ],
            [
                0x08, 0xB3, 0x4E, 0xD9, 0x62, 0xEF, 0x18, 0xA5, 0x50, 0xCB, 0x76, 0x01, 0x9C, 0x27,
                0xF2, 0x4D,
            ],
        ),
        // appldr 2.00
        Key::symmetric(
            0x0002_0000_0000_0000,
            0x0007,
            KeyType::App,
            [
                0xD8, 0x63, 0x2E, 0xB9, 0x04, 0x9F, 0x4A, 0xF5, 0xA0, 0x5B, 0xC6, 0x71, 0x1C, 0xA7,
                0x32, 0xDD, 0x68, 0xF3, 0x9E, 0x09, 0xB4, 0x5F, 0xEA, 0x75, 0x20, 0xCB, 0x56, 0xE1,
                0x8C, 0x17, 0xA2, 0x4D,
            ],
            [
                0xF1, 0x6C, 0x27, 0xB2, 0x3D, 0xC8, 0x53, 0xEE, 0x79, 0x04, 0x8F, 0x1A, 0xA5, 0x30,
                0xEB, 0x46,
            ],
        ),
        // appldr 3.50
        Key::symmetric(
            0x0003_0050_0000_0000,
            0x000A,
            KeyType::App,
            [
                0x29, 0xB4, 0x5F, 0xEA, 0x75, 0x00, 0x9B, 0x26, 0xD1, 0x6C, 0xF7, 0x82, 0x2D, 0xB8,
                0x43, 0xEE, 0x79, 0x04, 0xAF, 0x3A, 0xC5, 0x70, 0x1B, 0xA6, 0x51, 0xDC, 0x67, 0xF2,
                0x9D, 0x28, 0xB3, 0x5E,
            ],
            [
                0x6A, 0xF5, 0x80, 0x2B, 0xB6, 0x41, 0xCC, 0x57, 0xE2, 0x8D, 0x18, 0xA3, 0x2E, 0xB9,
                0x44, 0xCF,
            ],
        ),
        // punkg
        Key::symmetric(
            0x0001_0000_0000_0000,
            0x0000,
            KeyType::DiskImage,
            SCEPKG_ERK,
            SCEPKG_RIV,
        ),
        // metldr
        Key::symmetric(
            0x0002_0060_0000_0000,
            0x0000,
            KeyType::Loader,
            [
                0x83, 0x1E, 0xC9, 0x54, 0xDF, 0x6A, 0x35, 0x80, 0x2B, 0xF6, 0x41, 0xAC, 0x77, 0x02,
                0x8D, 0x58, 0xE3, 0x2E, 0xB9, 0x64, 0x0F, 0x7A, 0x25, 0xD0, 0x5B, 0x86, 0x31, 0xFC,
                0xA7, 0x12, 0xBD, 0x68,
            ],
            [
                0x93, 0x3E, 0xA9, 0x14, 0x5F, 0xCA, 0x75, 0x60, 0x0B, 0x96, 0x21, 0xDC, 0x47, 0xF2,
                0x7D, 0x08,
            ],
        ),
        // sys modules
        Key::symmetric(
            0x0001_0000_0000_0000,
            0x0000,
            KeyType::Other,
            [
                0x36, 0xC1, 0x7C, 0x07, 0x92, 0x5D, 0xE8, 0x73, 0x1E, 0xA9, 0x54, 0x3F, 0x8A, 0x15,
                0xC0, 0x6B, 0xF6, 0x21, 0xAC, 0x57, 0x02, 0xCD, 0x78, 0x23, 0xAE, 0x19, 0xE4, 0x4F,
                0xDA, 0x85, 0x50, 0x1B,
            ],
            [
                0xC6, 0x51, 0x0C, 0xB7, 0x62, 0xED, 0x38, 0x03, 0x8E, 0x59, 0xE4, 0x2F, 0x7A, 0xC5,
                0x10, 0x9B,
            ],
        ),
        // npdrm 1.00
        Key::symmetric(
            0x0001_0000_0000_0000,
            0x0001,
            KeyType::Npdrm,
            [
                0x5F, 0xEA, 0x95, 0x40, 0x0B, 0xD6, 0x81, 0x2C, 0xB7, 0x62, 0x3D, 0xA8, 0x53, 0xFE,
                0x29, 0xD4, 0x7F, 0x0A, 0x95, 0x60, 0xEB, 0x36, 0x01, 0xAC, 0x77, 0x22, 0xCD, 0x98,
                0x43, 0x1E, 0xE9, 0x74,
            ],
            [
                0x1F, 0x8A, 0x35, 0xC0, 0x6B, 0x16, 0xE1, 0x2C, 0xB7, 0x42, 0x9D, 0x58, 0x03, 0xAE,
                0x79, 0x24,
            ],
        ),
        // npdrm 3.40
        Key::symmetric(
            0x0003_0040_0000_0000,
            0x0004,
            KeyType::Npdrm,
            [
                0xE2, 0x6D, 0x38, 0xA3, 0x4E, 0xF9, 0x84, 0x2F, 0xBA, 0x65, 0x10, 0xDB, 0x46, 0xF1,
                0x7C, 0x27, 0x92, 0x3D, 0xC8, 0x73, 0x1E, 0x89, 0x34, 0xDF, 0x6A, 0x15, 0xE0, 0x8B,
                0x56, 0x01, 0xAC, 0x37,
            ],
            [
                0x72, 0x1D, 0xC8, 0x53, 0xFE, 0xA9, 0x34, 0xBF, 0x4A, 0xD5, 0x00, 0x6B, 0x36, 0xE1,
                0x8C, 0x57,
            ],
        ),
    ]
});

/// Fixed lookup table of SELF keys
///
/// The table itself is process-wide and immutable; the store instance
/// only tracks how many lookups were made through it, which the loader
/// reports in its statistics.
pub struct KeyStore {
    lookups: AtomicU64,
}

impl KeyStore {
    /// Create a store over the compiled-in table
    pub fn new() -> Self {
        Self {
            lookups: AtomicU64::new(0),
        }
    }

    /// Find the key matching the selection triple exactly
    pub fn resolve(
        &self,
        key_type: KeyType,
        revision: u16,
        version: u64,
    ) -> Result<&'static Key, LoaderError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        SELF_KEYS
            .iter()
            .find(|k| k.key_type == key_type && k.revision == revision && k.version == version)
            .ok_or(LoaderError::KeyNotFound {
                key_type: format!("{key_type:?}"),
                revision,
                version,
            })
    }

    /// Number of resolve calls made through this store
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Number of records in the compiled-in table
    pub fn table_len(&self) -> usize {
        SELF_KEYS.len()
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_type_mapping() {
        assert_eq!(KeyType::from_program_type(1), Some(KeyType::Level0));
        assert_eq!(KeyType::from_program_type(4), Some(KeyType::App));
        assert_eq!(KeyType::from_program_type(8), Some(KeyType::Npdrm));
        assert_eq!(KeyType::from_program_type(0), None);
        assert_eq!(KeyType::from_program_type(9), None);
    }

    #[test]
    fn test_resolve_exact_match() {
        let store = KeyStore::new();
        let key = store
            .resolve(KeyType::App, 0x0004, 0x0001_0200_0000_0000)
            .unwrap();
        assert_eq!(key.key_type, KeyType::App);
        assert_eq!(key.revision, 0x0004);
        assert_eq!(key.version, 0x0001_0200_0000_0000);
        assert_eq!(key.erk[0], 0x42);
    }

    #[test]
    fn test_resolve_fails_closed() {
        let store = KeyStore::new();

        // revision off by one
        let err = store
            .resolve(KeyType::App, 0x0005, 0x0001_0200_0000_0000)
            .unwrap_err();
        assert!(matches!(err, LoaderError::KeyNotFound { .. }));

        // version mismatch
        assert!(store
            .resolve(KeyType::App, 0x0004, 0x0001_0300_0000_0000)
            .is_err());

        // type mismatch
        assert!(store
            .resolve(KeyType::Npdrm, 0x0004, 0x0001_0200_0000_0000)
            .is_err());
    }

    #[test]
    fn test_lookup_counter() {
        let store = KeyStore::new();
        assert_eq!(store.lookup_count(), 0);

        let _ = store.resolve(KeyType::App, 0x0001, 0x0001_0000_0000_0000);
        let _ = store.resolve(KeyType::App, 0xFFFF, 0);
        assert_eq!(store.lookup_count(), 2);
    }

    #[test]
    fn test_package_key_material() {
        let store = KeyStore::new();
        let key = store
            .resolve(KeyType::DiskImage, 0x0000, 0x0001_0000_0000_0000)
            .unwrap();
        assert_eq!(key.erk, SCEPKG_ERK);
        assert_eq!(key.riv, SCEPKG_RIV);
    }

    #[test]
    fn test_table_is_populated() {
        let store = KeyStore::new();
        assert!(store.table_len() >= 8);
    }
}
