// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Bucket encryption.
//!
//! Buckets are serialized to JSON and sealed with AES-256-GCM under a fresh random nonce, so that
//! two writes of the same bucket contents (in particular, two all-dummy buckets) are never
//! bit-identical. Bucket plaintexts are padded to a fixed size first, so sealed buckets all have
//! the same length. A sealed bucket is laid out as `nonce || ciphertext || tag`.

use crate::{block::Bucket, BucketIndex, BucketSize, OramError};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length in bytes of an encryption key.
pub const KEY_SIZE: usize = 32;

/// Length in bytes of the random nonce prefixed to every ciphertext.
pub const NONCE_SIZE: usize = 12;

/// Length in bytes of the authentication tag appended to every ciphertext.
pub const TAG_SIZE: usize = 16;

/// Length in bytes of the big-endian prefix holding the unpadded size of a bucket.
const LENGTH_PREFIX_SIZE: usize = 4;

/// Length of `{"Blocks":[` plus `]}`.
const BUCKET_FRAMING_LEN: usize = 13;

/// A symmetric key that lives only in process memory and is wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Draws a fresh key from the operating system's random number generator.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wraps `bytes`, which must be exactly [`KEY_SIZE`] bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OramError> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            OramError::InvalidConfiguration(format!(
                "encryption key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Parses a hex-encoded key.
    pub fn from_hex(encoded: &str) -> Result<Self, OramError> {
        let mut bytes = hex::decode(encoded.trim()).map_err(|e| {
            OramError::InvalidConfiguration(format!("encryption key is not valid hex: {e}"))
        })?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    /// Derives a key as the SHA-256 digest of `passphrase`, so that separate processes sharing
    /// the passphrase can open the same tree.
    pub fn derive_from_passphrase(passphrase: &str) -> Self {
        Self(Sha256::digest(passphrase.as_bytes()).into())
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey(<redacted>)")
    }
}

fn new_cipher(key: &EncryptionKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()))
}

fn seal(cipher: &Aes256Gcm, plaintext: &[u8]) -> Result<Vec<u8>, OramError> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| OramError::Encryption)?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

fn open(cipher: &Aes256Gcm, blob: &[u8]) -> Result<Vec<u8>, OramError> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(OramError::ShortCiphertext { len: blob.len() });
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| OramError::Decryption)
}

/// Encrypts `plaintext` under `key` with a fresh random nonce, returning `nonce || ciphertext`.
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, OramError> {
    seal(&new_cipher(key), plaintext)
}

/// Decrypts a blob produced by [`encrypt`].
///
/// # Errors
///
/// Returns `ShortCiphertext` if `blob` cannot hold a nonce and a tag,
/// and `Decryption` if authentication fails.
pub fn decrypt(blob: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, OramError> {
    open(&new_cipher(key), blob)
}

/// Turns buckets into opaque, fixed-shape ciphertexts and back.
///
/// The serialized bucket is prefixed with its length and zero-padded to
/// [`BucketCodec::plaintext_capacity`] before sealing, so every sealed bucket is exactly
/// [`BucketCodec::sealed_len`] bytes long whatever its occupancy.
#[derive(Clone)]
pub struct BucketCodec {
    cipher: Aes256Gcm,
    bucket_size: BucketSize,
    max_block_len: usize,
}

impl BucketCodec {
    /// A codec for buckets of `bucket_size` blocks sealed under `key`, where no block serializes
    /// to more than `max_block_len` bytes.
    pub fn new(key: &EncryptionKey, bucket_size: BucketSize, max_block_len: usize) -> Self {
        Self {
            cipher: new_cipher(key),
            bucket_size,
            max_block_len,
        }
    }

    /// The number of blocks every bucket must hold.
    pub fn bucket_size(&self) -> BucketSize {
        self.bucket_size
    }

    /// The largest serialized block accepted.
    pub fn max_block_len(&self) -> usize {
        self.max_block_len
    }

    /// The size of the padded bucket serialization: the `{"Blocks":[...]}` framing, `Z` blocks
    /// of at most `max_block_len` bytes, and the separators between them.
    pub fn plaintext_capacity(&self) -> usize {
        BUCKET_FRAMING_LEN + self.bucket_size * (self.max_block_len + 1) - 1
    }

    /// The length of every sealed bucket.
    pub fn sealed_len(&self) -> usize {
        NONCE_SIZE + LENGTH_PREFIX_SIZE + self.plaintext_capacity() + TAG_SIZE
    }

    /// Serializes, pads and encrypts `bucket`.
    ///
    /// # Errors
    ///
    /// Returns `OversizedBucket` if the serialized bucket does not fit the padded size, which
    /// only happens if a block exceeds `max_block_len`.
    pub fn seal(&self, bucket: &Bucket) -> Result<Vec<u8>, OramError> {
        debug_assert_eq!(bucket.blocks.len(), self.bucket_size);
        let serialized = serde_json::to_vec(bucket)?;
        let capacity = self.plaintext_capacity();
        if serialized.len() > capacity {
            return Err(OramError::OversizedBucket {
                len: serialized.len(),
                capacity,
            });
        }

        let mut plaintext = Vec::with_capacity(LENGTH_PREFIX_SIZE + capacity);
        plaintext.extend_from_slice(&u32::try_from(serialized.len())?.to_be_bytes());
        plaintext.extend_from_slice(&serialized);
        plaintext.resize(LENGTH_PREFIX_SIZE + capacity, 0);
        let sealed = seal(&self.cipher, &plaintext);
        plaintext.zeroize();
        sealed
    }

    /// Decrypts, unpads and deserializes the bucket stored at `index`, checking that it holds
    /// exactly `bucket_size` blocks.
    pub fn open(&self, index: BucketIndex, blob: &[u8]) -> Result<Bucket, OramError> {
        let plaintext = open(&self.cipher, blob)?;

        let prefix: [u8; LENGTH_PREFIX_SIZE] = plaintext
            .get(..LENGTH_PREFIX_SIZE)
            .and_then(|prefix| prefix.try_into().ok())
            .ok_or(OramError::MalformedPadding(index))?;
        let serialized_len = usize::try_from(u32::from_be_bytes(prefix))?;
        let serialized = plaintext
            .get(LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + serialized_len)
            .ok_or(OramError::MalformedPadding(index))?;

        let bucket: Bucket = serde_json::from_slice(serialized)?;
        if bucket.blocks.len() != self.bucket_size {
            return Err(OramError::MalformedBucket {
                index,
                expected: self.bucket_size,
                found: bucket.blocks.len(),
            });
        }
        Ok(bucket)
    }
}

impl std::fmt::Debug for BucketCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketCodec")
            .field("bucket_size", &self.bucket_size)
            .field("max_block_len", &self.max_block_len)
            .finish_non_exhaustive()
    }
}
