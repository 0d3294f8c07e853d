//! SELF decryption
//!
//! Implements the container decryption chain: the metadata info block
//! is decrypted under the resolved key (with an extra klicensee layer
//! for NPDRM content), which yields the metadata key and IV. Those in
//! turn unlock the metadata body holding the segment key vault, the
//! per-segment SHA-1 digests and an OMAC authentication tag. Segments
//! are then decrypted, inflated and digest-checked in table order.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{
    block_padding::NoPadding, BlockDecrypt, BlockDecryptMut, BlockEncrypt, KeyInit, KeyIvInit,
};
use aes::{Aes128, Aes256};
use amp_core::error::LoaderError;
use sha1::{Digest, Sha1};
use std::io::Read;
use tracing::{debug, info, warn};

use crate::keys::{self, Key, KeyType};
use crate::self_file::{Compression, Encryption, ParsedSelf};

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const METADATA_INFO_SIZE: usize = 64;
const METADATA_HEADER_SIZE: usize = 40;
const KEY_ENTRY_SIZE: usize = 16;
const DIGEST_SIZE: usize = 20;
const OMAC_SIZE: usize = 16;

/// Decrypted metadata info: the key and IV protecting the metadata body
#[derive(Debug, Clone, Copy)]
struct MetadataInfo {
    key: [u8; 16],
    iv: [u8; 16],
}

/// Decrypted metadata header
#[derive(Debug, Clone, Copy)]
struct MetadataHeader {
    signature_input_length: u64,
    unknown1: u32,
    section_count: u32,
    key_count: u32,
    optional_header_size: u32,
}

/// The reassembled plaintext image
#[derive(Debug)]
pub struct DecryptedImage {
    data: Vec<u8>,
    warnings: Vec<String>,
}

impl DecryptedImage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Integrity faults recorded in best-effort mode
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// SELF segment decryptor
///
/// `strict` controls how integrity failures are handled: when set, the
/// first failed check aborts decryption; otherwise failures are logged,
/// recorded on the image and decryption continues best-effort.
pub struct Decryptor {
    klic: [u8; 16],
    strict: bool,
}

impl Decryptor {
    /// Decryptor for unlicensed content, using the free klicensee
    pub fn new(strict: bool) -> Self {
        Self {
            klic: keys::FREE_KLIC,
            strict,
        }
    }

    /// Decryptor for licensed NPDRM content with an explicit klicensee,
    /// typically obtained from [`rap_to_klic`]
    pub fn with_klic(klic: [u8; 16], strict: bool) -> Self {
        Self { klic, strict }
    }

    /// Decrypt all segments of a parsed container and reassemble the
    /// plaintext image in segment table order.
    ///
    /// `key` may be `None` only for containers without a metadata
    /// block, which carry nothing but plain segments.
    pub fn decrypt(
        &self,
        parsed: &ParsedSelf,
        key: Option<&Key>,
        data: &[u8],
    ) -> Result<DecryptedImage, LoaderError> {
        let mut warnings = Vec::new();

        let crypto = if parsed.needs_key() {
            let key = key.ok_or_else(|| {
                LoaderError::DecryptionFailed("container requires key material".into())
            })?;
            Some(self.load_metadata(parsed, key, data, &mut warnings)?)
        } else {
            debug!("container has no metadata, assembling plain segments");
            None
        };

        let mut image = Vec::with_capacity(parsed.decrypted_len() as usize);

        for segment in &parsed.segments {
            let stored = slice_at(data, segment.offset, segment.stored_size, "segment data")?;

            let content = match segment.encryption {
                Encryption::Plain => stored.to_vec(),
                Encryption::Encrypted => {
                    // Parsing guarantees metadata exists for encrypted segments
                    let meta = crypto.as_ref().ok_or_else(|| {
                        LoaderError::DecryptionFailed(format!(
                            "segment {} is encrypted but no metadata was loaded",
                            segment.index
                        ))
                    })?;
                    meta.decrypt_segment(segment.index, segment.key_index, segment.iv_index, stored)?
                }
            };

            let content = match segment.compression {
                Compression::Plain => content,
                Compression::Zlib => inflate(&content, segment.decrypted_size, segment.index)?,
            };

            if content.len() as u64 != segment.decrypted_size {
                return Err(LoaderError::MalformedContainer(format!(
                    "segment {}: produced {:#x} bytes, table declares {:#x}",
                    segment.index,
                    content.len(),
                    segment.decrypted_size
                )));
            }

            if let Some(meta) = &crypto {
                let digest: [u8; 20] = Sha1::digest(&content).into();
                if digest != meta.digests[segment.index] {
                    self.integrity_fault(
                        &mut warnings,
                        format!("segment {} digest mismatch", segment.index),
                    )?;
                }
            }

            image.extend_from_slice(&content);
        }

        info!(
            bytes = image.len(),
            segments = parsed.segments.len(),
            warnings = warnings.len(),
            "decrypted SELF image"
        );

        Ok(DecryptedImage {
            data: image,
            warnings,
        })
    }

    /// Decrypt the metadata block: info, then header, vault and digests
    fn load_metadata(
        &self,
        parsed: &ParsedSelf,
        key: &Key,
        data: &[u8],
        warnings: &mut Vec<String>,
    ) -> Result<SegmentCrypto, LoaderError> {
        let meta = slice_at(
            data,
            parsed.ext.metadata_offset,
            parsed.ext.metadata_size,
            "metadata",
        )?;
        if meta.len() < METADATA_INFO_SIZE + METADATA_HEADER_SIZE + OMAC_SIZE {
            return Err(LoaderError::MalformedContainer(format!(
                "metadata too small: {} bytes",
                meta.len()
            )));
        }

        let mut info = meta[..METADATA_INFO_SIZE].to_vec();

        // NPDRM containers wrap the metadata info in a klicensee layer
        if parsed.key_type == KeyType::Npdrm {
            let klic = unwrap_klic(&self.klic);
            info = decrypt_cbc(&klic, &[0u8; 16], &info)?;
        }

        let info = parse_metadata_info(&decrypt_cbc(&key.erk, &key.riv, &info)?)?;

        let body = decrypt_cbc(&info.key, &info.iv, &meta[METADATA_INFO_SIZE..])?;
        let header = parse_metadata_header(&body)?;

        debug!(
            sections = header.section_count,
            keys = header.key_count,
            signature_input = header.signature_input_length,
            "metadata header"
        );

        if header.unknown1 != 1 {
            return Err(LoaderError::MalformedContainer(format!(
                "bad metadata header marker {:#x}",
                header.unknown1
            )));
        }
        if header.optional_header_size != 0 {
            return Err(LoaderError::MalformedContainer(
                "optional metadata headers are not supported".into(),
            ));
        }
        if header.section_count as usize != parsed.segments.len() {
            return Err(LoaderError::MalformedContainer(format!(
                "metadata describes {} sections but the table has {} segments",
                header.section_count,
                parsed.segments.len()
            )));
        }

        // Layout: header, key vault, digest table, zero padding up to
        // the block size, then the authentication tag.
        let vault_len = header.key_count as usize * KEY_ENTRY_SIZE;
        let digests_len = header.section_count as usize * DIGEST_SIZE;
        let content_len = METADATA_HEADER_SIZE + vault_len + digests_len;
        let pad_len = (16 - (content_len + OMAC_SIZE) % 16) % 16;
        let expected = content_len + pad_len + OMAC_SIZE;
        if body.len() != expected {
            return Err(LoaderError::MalformedContainer(format!(
                "metadata body is {} bytes, layout requires {expected}",
                body.len()
            )));
        }

        let tag_offset = content_len + pad_len;
        if body[content_len..tag_offset].iter().any(|&b| b != 0) {
            return Err(LoaderError::MalformedContainer(
                "metadata padding is not zero".into(),
            ));
        }

        // Authenticate everything in front of the tag, padding included
        let tag = omac1_aes128(&info.key, &body[..tag_offset]);
        if tag[..] != body[tag_offset..] {
            self.integrity_fault(warnings, "metadata authentication failed".into())?;
        }

        let vault_off = METADATA_HEADER_SIZE;
        let vault: Vec<[u8; 16]> = body[vault_off..vault_off + vault_len]
            .chunks_exact(KEY_ENTRY_SIZE)
            .map(|c| {
                let mut k = [0u8; 16];
                k.copy_from_slice(c);
                k
            })
            .collect();

        let digests_off = vault_off + vault_len;
        let digests: Vec<[u8; 20]> = body[digests_off..digests_off + digests_len]
            .chunks_exact(DIGEST_SIZE)
            .map(|c| {
                let mut d = [0u8; 20];
                d.copy_from_slice(c);
                d
            })
            .collect();

        Ok(SegmentCrypto { vault, digests })
    }

    fn integrity_fault(&self, warnings: &mut Vec<String>, msg: String) -> Result<(), LoaderError> {
        if self.strict {
            return Err(LoaderError::IntegrityError(msg));
        }
        warn!("{msg}");
        warnings.push(msg);
        Ok(())
    }
}

/// Key vault and digest table recovered from the metadata
struct SegmentCrypto {
    vault: Vec<[u8; 16]>,
    digests: Vec<[u8; 20]>,
}

impl SegmentCrypto {
    fn decrypt_segment(
        &self,
        index: usize,
        key_index: u32,
        iv_index: u32,
        stored: &[u8],
    ) -> Result<Vec<u8>, LoaderError> {
        let key = self.vault.get(key_index as usize).ok_or_else(|| {
            LoaderError::MalformedContainer(format!(
                "segment {index}: key index {key_index} exceeds vault of {}",
                self.vault.len()
            ))
        })?;
        let iv = self.vault.get(iv_index as usize).ok_or_else(|| {
            LoaderError::MalformedContainer(format!(
                "segment {index}: iv index {iv_index} exceeds vault of {}",
                self.vault.len()
            ))
        })?;

        decrypt_cbc(key, iv, stored)
    }
}

fn parse_metadata_info(plain: &[u8]) -> Result<MetadataInfo, LoaderError> {
    let mut key = [0u8; 16];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&plain[0..16]);
    iv.copy_from_slice(&plain[32..48]);

    // The padding words decrypt to zero only under the right key
    if plain[16..32].iter().any(|&b| b != 0) || plain[48..64].iter().any(|&b| b != 0) {
        return Err(LoaderError::DecryptionFailed(
            "metadata info padding is not zero, wrong key".into(),
        ));
    }

    Ok(MetadataInfo { key, iv })
}

fn parse_metadata_header(body: &[u8]) -> Result<MetadataHeader, LoaderError> {
    if body.len() < METADATA_HEADER_SIZE {
        return Err(LoaderError::MalformedContainer(
            "metadata body too small for header".into(),
        ));
    }

    let be32 = |o: usize| u32::from_be_bytes([body[o], body[o + 1], body[o + 2], body[o + 3]]);

    Ok(MetadataHeader {
        signature_input_length: u64::from_be_bytes([
            body[0], body[1], body[2], body[3], body[4], body[5], body[6], body[7],
        ]),
        unknown1: be32(8),
        section_count: be32(12),
        key_count: be32(16),
        optional_header_size: be32(20),
    })
}

fn slice_at<'a>(data: &'a [u8], offset: u64, len: u64, what: &str) -> Result<&'a [u8], LoaderError> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| LoaderError::MalformedContainer(format!("{what} range overflows")))?;
    data.get(offset as usize..end as usize)
        .ok_or_else(|| LoaderError::MalformedContainer(format!("{what} lies outside the file")))
}

/// AES-CBC decrypt without padding, key length selects the variant
fn decrypt_cbc(key: &[u8], iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>, LoaderError> {
    if data.len() % 16 != 0 {
        return Err(LoaderError::MalformedContainer(format!(
            "ciphertext length {} is not block aligned",
            data.len()
        )));
    }

    let mut buf = data.to_vec();
    match key.len() {
        16 => {
            Aes128CbcDec::new_from_slices(key, iv)
                .map_err(|e| LoaderError::DecryptionFailed(format!("cipher setup: {e}")))?
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .map_err(|e| LoaderError::DecryptionFailed(format!("block decrypt: {e}")))?;
        }
        32 => {
            Aes256CbcDec::new_from_slices(key, iv)
                .map_err(|e| LoaderError::DecryptionFailed(format!("cipher setup: {e}")))?
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .map_err(|e| LoaderError::DecryptionFailed(format!("block decrypt: {e}")))?;
        }
        n => {
            return Err(LoaderError::DecryptionFailed(format!(
                "invalid key length {n}, must be 16 or 32 bytes"
            )))
        }
    }
    Ok(buf)
}

/// Unwrap a klicensee for use as a metadata key
pub(crate) fn unwrap_klic(klic: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(&keys::KLIC_KEY));
    let mut block = GenericArray::clone_from_slice(klic);
    cipher.decrypt_block(&mut block);
    block.into()
}

/// Convert a rights activation key (RAP) into a klicensee
pub fn rap_to_klic(rap: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(&keys::RAP_KEY));
    let mut block = GenericArray::clone_from_slice(rap);
    cipher.decrypt_block(&mut block);
    let mut key: [u8; 16] = block.into();

    for _ in 0..5 {
        for i in 0..16 {
            let p = keys::RAP_PBOX[i] as usize;
            key[p] ^= keys::RAP_E1[p];
        }
        for i in (1..16).rev() {
            let p = keys::RAP_PBOX[i] as usize;
            let pp = keys::RAP_PBOX[i - 1] as usize;
            key[p] ^= key[pp];
        }
        let mut overflow = 0u8;
        for i in 0..16 {
            let p = keys::RAP_PBOX[i] as usize;
            let current = key[p].wrapping_sub(overflow);
            let sub = keys::RAP_E2[p];
            if overflow != 1 || current != 0xFF {
                overflow = u8::from(current < sub);
            }
            key[p] = current.wrapping_sub(sub);
        }
    }

    key
}

/// OMAC1 (CMAC) over AES-128, used to authenticate the metadata body
pub(crate) fn omac1_aes128(key: &[u8; 16], msg: &[u8]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(key));

    let mut l = GenericArray::clone_from_slice(&[0u8; 16]);
    cipher.encrypt_block(&mut l);
    let k1 = cmac_double(&l.into());
    let k2 = cmac_double(&k1);

    // Number of complete blocks excluding the final one
    let full_blocks = if msg.is_empty() {
        0
    } else {
        (msg.len() + 15) / 16 - 1
    };

    let mut mac = [0u8; 16];
    for chunk in msg[..full_blocks * 16].chunks_exact(16) {
        for (m, c) in mac.iter_mut().zip(chunk) {
            *m ^= c;
        }
        let mut block = GenericArray::clone_from_slice(&mac);
        cipher.encrypt_block(&mut block);
        mac = block.into();
    }

    let rest = &msg[full_blocks * 16..];
    let mut last = [0u8; 16];
    let subkey = if rest.len() == 16 {
        last.copy_from_slice(rest);
        k1
    } else {
        last[..rest.len()].copy_from_slice(rest);
        last[rest.len()] = 0x80;
        k2
    };
    for i in 0..16 {
        mac[i] ^= last[i] ^ subkey[i];
    }

    let mut block = GenericArray::clone_from_slice(&mac);
    cipher.encrypt_block(&mut block);
    block.into()
}

/// GF(2^128) doubling for CMAC subkey derivation
fn cmac_double(block: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    let mut carry = 0u8;
    for i in (0..16).rev() {
        out[i] = (block[i] << 1) | carry;
        carry = block[i] >> 7;
    }
    if carry != 0 {
        out[15] ^= 0x87;
    }
    out
}

/// Inflate a zlib stream to its declared size
fn inflate(data: &[u8], expected: u64, index: usize) -> Result<Vec<u8>, LoaderError> {
    let mut out = Vec::with_capacity(expected as usize);
    flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| {
            LoaderError::DecryptionFailed(format!("segment {index}: inflate failed: {e}"))
        })?;

    if out.len() as u64 != expected {
        return Err(LoaderError::MalformedContainer(format!(
            "segment {index}: inflated to {:#x} bytes, table declares {expected:#x}",
            out.len()
        )));
    }
    Ok(out)
}
