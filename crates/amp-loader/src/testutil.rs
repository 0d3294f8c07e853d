//! Synthetic container fixtures shared by the loader tests

use aes::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};
use sha1::{Digest, Sha1};
use std::io::Write;

use crate::crypto::{omac1_aes128, unwrap_klic};
use crate::keys::{Key, KeyType};
use crate::self_file::{
    APP_INFO_SIZE, EXT_HEADER_SIZE, SCE_HEADER_SIZE, SCE_VERSION, SEGMENT_ENTRY_SIZE, SELF_MAGIC,
};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// Metadata key material used by every built container
const META_KEY: [u8; 16] = [
    0x4D, 0xE7, 0x12, 0xB8, 0x63, 0x0E, 0x99, 0x24, 0xAF, 0x5A, 0x05, 0xD0, 0x7B, 0x26, 0xF1, 0x8C,
];
const META_IV: [u8; 16] = [
    0x37, 0xC2, 0x6D, 0x18, 0xA3, 0x4E, 0xF9, 0x84, 0x2F, 0xBA, 0x65, 0x10, 0x9B, 0x46, 0xD1, 0x7C,
];

/// Segment key vault written into every encrypted container
const VAULT: [[u8; 16]; 4] = [
    [
        0x9C, 0x27, 0xD2, 0x5D, 0x08, 0xB3, 0x3E, 0xC9, 0x74, 0x1F, 0xAA, 0x55, 0x00, 0x8B, 0x36,
        0xE1,
    ],
    [
        0x6C, 0x17, 0xC2, 0x4D, 0xF8, 0xA3, 0x2E, 0xB9, 0x64, 0x0F, 0x9A, 0x45, 0xF0, 0x7B, 0x26,
        0xD1,
    ],
    [
        0x5C, 0x07, 0xB2, 0x3D, 0xE8, 0x93, 0x1E, 0xA9, 0x54, 0xFF, 0x8A, 0x35, 0xE0, 0x6B, 0x16,
        0xC1,
    ],
    [
        0x4C, 0xF7, 0xA2, 0x2D, 0xD8, 0x83, 0x0E, 0x99, 0x44, 0xEF, 0x7A, 0x25, 0xD0, 0x5B, 0x06,
        0xB1,
    ],
];

pub fn put16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

pub fn put32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

pub fn put64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}

/// A key with no counterpart in the compiled-in table
pub fn test_key() -> Key {
    Key::symmetric(
        0x0009_9900_0000_0000,
        0x0042,
        KeyType::App,
        [
            0x2F, 0xBA, 0x65, 0x10, 0x9B, 0x46, 0xD1, 0x7C, 0x07, 0x92, 0x3D, 0xC8, 0x53, 0xFE,
            0xA9, 0x34, 0xBF, 0x4A, 0xD5, 0x60, 0x0B, 0x96, 0x21, 0xAC, 0x57, 0x02, 0x8D, 0x38,
            0xE3, 0x6E, 0x19, 0xA4,
        ],
        [
            0xB4, 0x5F, 0xEA, 0x75, 0x20, 0xCB, 0x56, 0xE1, 0x8C, 0x17, 0xA2, 0x4D, 0xD8, 0x63,
            0x0E, 0x99,
        ],
    )
}

/// Description of one segment to place into a built container
pub struct SegmentSpec<'a> {
    pub payload: &'a [u8],
    pub compressed: bool,
    pub encrypted: bool,
    pub key_index: u32,
    pub iv_index: u32,
}

impl<'a> SegmentSpec<'a> {
    pub fn plain(payload: &'a [u8]) -> Self {
        Self {
            payload,
            compressed: false,
            encrypted: false,
            key_index: 0,
            iv_index: 0,
        }
    }

    pub fn encrypted(payload: &'a [u8], key_index: u32, iv_index: u32) -> Self {
        Self {
            payload,
            compressed: false,
            encrypted: true,
            key_index,
            iv_index,
        }
    }

    pub fn compressed_encrypted(payload: &'a [u8], key_index: u32, iv_index: u32) -> Self {
        Self {
            payload,
            compressed: true,
            encrypted: true,
            key_index,
            iv_index,
        }
    }
}

/// Build a metadata-less container holding plain segments back to back
pub fn build_plain_self(payloads: &[&[u8]]) -> Vec<u8> {
    let specs: Vec<SegmentSpec> = payloads.iter().map(|p| SegmentSpec::plain(p)).collect();
    build_container(0x0004, 4, 0x0001_0200_0000_0000, &specs, None)
}

/// Build an encrypted container protected by `key`. When a klicensee is
/// given the container is marked NPDRM and the metadata info gets the
/// extra klicensee layer.
pub fn build_encrypted_self(key: &Key, klic: Option<[u8; 16]>, segments: &[SegmentSpec]) -> Vec<u8> {
    let program_type = if klic.is_some() { 8 } else { 4 };
    build_container(
        key.revision,
        program_type,
        key.version,
        segments,
        Some((key, klic)),
    )
}

fn build_container(
    key_revision: u16,
    program_type: u32,
    version: u64,
    segments: &[SegmentSpec],
    crypto: Option<(&Key, Option<[u8; 16]>)>,
) -> Vec<u8> {
    let count = segments.len();
    let table_offset = SCE_HEADER_SIZE + EXT_HEADER_SIZE + APP_INFO_SIZE;
    let table_end = table_offset + count * SEGMENT_ENTRY_SIZE;

    // Transform segment payloads into their stored forms
    let mut blobs: Vec<Vec<u8>> = Vec::with_capacity(count);
    for spec in segments {
        let mut content = if spec.compressed {
            deflate(spec.payload)
        } else {
            spec.payload.to_vec()
        };
        if spec.encrypted {
            if spec.compressed {
                while content.len() % 16 != 0 {
                    content.push(0);
                }
            } else {
                assert_eq!(
                    content.len() % 16,
                    0,
                    "uncompressed encrypted payloads must be block aligned"
                );
            }
            // Out-of-range indices still produce a valid table entry
            let k = &VAULT[spec.key_index as usize % VAULT.len()];
            let iv = &VAULT[spec.iv_index as usize % VAULT.len()];
            content = encrypt_cbc_128(k, iv, &content);
        }
        blobs.push(content);
    }

    let metadata = crypto.map(|(key, klic)| {
        let content_len = 40 + VAULT.len() * 16 + count * 20;
        let pad_len = (16 - (content_len + 16) % 16) % 16;

        let mut body = vec![0u8; 40];
        put64(&mut body, 0, content_len as u64); // signature input length
        put32(&mut body, 8, 1);
        put32(&mut body, 12, count as u32);
        put32(&mut body, 16, VAULT.len() as u32);
        put32(&mut body, 20, 0); // no optional headers
        for entry in &VAULT {
            body.extend_from_slice(entry);
        }
        for spec in segments {
            let digest: [u8; 20] = Sha1::digest(spec.payload).into();
            body.extend_from_slice(&digest);
        }
        body.extend(std::iter::repeat(0u8).take(pad_len));
        let tag = omac1_aes128(&META_KEY, &body);
        body.extend_from_slice(&tag);

        let body_cipher = encrypt_cbc_128(&META_KEY, &META_IV, &body);

        let mut info = [0u8; 64];
        info[0..16].copy_from_slice(&META_KEY);
        info[32..48].copy_from_slice(&META_IV);
        let mut info_cipher = encrypt_cbc_256(&key.erk, &key.riv, &info);
        if let Some(klic) = klic {
            let actual = unwrap_klic(&klic);
            info_cipher = encrypt_cbc_128(&actual, &[0u8; 16], &info_cipher);
        }

        let mut out = info_cipher;
        out.extend_from_slice(&body_cipher);
        out
    });

    let metadata_offset = if metadata.is_some() { table_end } else { 0 };
    let metadata_len = metadata.as_ref().map_or(0, |m| m.len());
    let data_offset = table_end + metadata_len;
    let stored_total: usize = blobs.iter().map(|b| b.len()).sum();
    let decrypted_total: u64 = segments.iter().map(|s| s.payload.len() as u64).sum();

    let mut buf = vec![0u8; data_offset + stored_total];

    // SCE header
    buf[0..4].copy_from_slice(&SELF_MAGIC);
    put32(&mut buf, 4, SCE_VERSION);
    put16(&mut buf, 8, key_revision);
    put16(&mut buf, 10, 1); // SELF category
    put32(&mut buf, 12, EXT_HEADER_SIZE as u32);
    put64(&mut buf, 16, data_offset as u64);
    put64(&mut buf, 24, decrypted_total);

    // extended header
    put64(&mut buf, 32, 3);
    put64(&mut buf, 40, (SCE_HEADER_SIZE + EXT_HEADER_SIZE) as u64);
    put64(&mut buf, 48, table_offset as u64);
    put64(&mut buf, 56, metadata_offset as u64);
    put64(&mut buf, 64, metadata_len as u64);
    put32(&mut buf, 72, count as u32);

    // application info
    let app = SCE_HEADER_SIZE + EXT_HEADER_SIZE;
    put64(&mut buf, app, 0x1010_0000_0000_0001);
    put32(&mut buf, app + 8, 0x0100_0000);
    put32(&mut buf, app + 12, program_type);
    put64(&mut buf, app + 16, version);

    if let Some(m) = &metadata {
        buf[table_end..table_end + m.len()].copy_from_slice(m);
    }

    // segment table and data
    let mut cursor = data_offset;
    for (i, (spec, blob)) in segments.iter().zip(&blobs).enumerate() {
        let entry = table_offset + i * SEGMENT_ENTRY_SIZE;
        put64(&mut buf, entry, cursor as u64);
        put64(&mut buf, entry + 8, blob.len() as u64);
        put64(&mut buf, entry + 16, spec.payload.len() as u64);
        put32(&mut buf, entry + 24, if spec.compressed { 2 } else { 1 });
        put32(&mut buf, entry + 28, if spec.encrypted { 1 } else { 2 });
        put32(&mut buf, entry + 32, spec.key_index);
        put32(&mut buf, entry + 36, spec.iv_index);

        buf[cursor..cursor + blob.len()].copy_from_slice(blob);
        cursor += blob.len();
    }

    buf
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn encrypt_cbc_128(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let mut buf = data.to_vec();
    let len = buf.len();
    Aes128CbcEnc::new_from_slices(key, iv)
        .unwrap()
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .unwrap();
    buf
}

fn encrypt_cbc_256(key: &[u8; 32], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let mut buf = data.to_vec();
    let len = buf.len();
    Aes256CbcEnc::new_from_slices(key, iv)
        .unwrap()
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .unwrap();
    buf
}
