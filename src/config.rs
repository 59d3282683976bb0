// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Construction parameters of an oblivious store.

use crate::{
    crypto::EncryptionKey, tree_index::MAXIMUM_TREE_HEIGHT, BucketSize, OramError, StashSize,
    TreeHeight,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The parameter "Z" from the Path ORAM literature that sets the number of blocks per bucket;
/// typical values are 4 to 7.
pub const DEFAULT_BLOCKS_PER_BUCKET: BucketSize = 5;

/// The default tree height. The tree then has 2047 buckets and room for `5 * 1024` blocks.
pub const DEFAULT_LOG_CAPACITY: TreeHeight = 10;

/// The default soft cap on the number of stashed blocks.
pub const DEFAULT_STASH_SIZE: StashSize = 2000;

/// The default maximum number of requests per batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// The default bound on the JSON serialization of a single block, key and value included.
pub const DEFAULT_MAX_BLOCK_LEN: usize = 256;

/// The smallest accepted `max_block_len`. A dummy block serializes to 23 bytes.
pub const MINIMUM_MAX_BLOCK_LEN: usize = 32;

static_assertions::const_assert!(DEFAULT_BLOCKS_PER_BUCKET >= 2);
static_assertions::const_assert!(DEFAULT_MAX_BLOCK_LEN >= MINIMUM_MAX_BLOCK_LEN);

/// Parameters fixed for the lifetime of a tree. Changing any of them requires re-initialization.
///
/// ## Parameters
///
/// - `log_capacity`: the height of the tree. The tree has `2^(log_capacity + 1) - 1` buckets and
///     `2^log_capacity` leaves.
/// - `bucket_size`: the number of blocks per bucket ("Z"). Must be at least 2.
///     The tree stores at most `bucket_size * 2^log_capacity` real blocks.
/// - `stash_size`: a soft cap on the stash. Exceeding it is logged but not refused.
/// - `batch_size`: the maximum number of requests per batch.
/// - `max_block_len`: the largest JSON serialization of a block, `{"Key":...,"Value":...}`.
///     Buckets are padded to `bucket_size` blocks of this size, so every stored bucket has the
///     same length. Puts of larger blocks are refused.
/// - `backend_url`: a redis URL, when the store runs against redis.
/// - `encryption_key`: a hex-encoded 32-byte key. A fresh random key is generated when absent,
///     in which case the tree cannot be reopened by another process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OramConfig {
    /// Height of the tree.
    pub log_capacity: TreeHeight,
    /// Blocks per bucket.
    pub bucket_size: BucketSize,
    /// Soft cap on stashed blocks.
    pub stash_size: StashSize,
    /// Maximum requests per batch.
    pub batch_size: usize,
    /// Maximum serialized block length.
    pub max_block_len: usize,
    /// Redis URL of the backend.
    pub backend_url: Option<String>,
    /// Hex-encoded encryption key.
    pub encryption_key: Option<String>,
}

impl Default for OramConfig {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
            bucket_size: DEFAULT_BLOCKS_PER_BUCKET,
            stash_size: DEFAULT_STASH_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            max_block_len: DEFAULT_MAX_BLOCK_LEN,
            backend_url: None,
            encryption_key: None,
        }
    }
}

impl OramConfig {
    /// Reads a JSON configuration file. Absent fields take their default values.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, OramError> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the parameters.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidConfiguration` error in the following cases.
    ///
    /// - `log_capacity` is 0 or larger than [`MAXIMUM_TREE_HEIGHT`].
    /// - `bucket_size` is 0 or 1.
    /// - `batch_size` is 0.
    /// - `max_block_len` is below [`MINIMUM_MAX_BLOCK_LEN`].
    /// - `encryption_key` is present but is not 32 hex-encoded bytes.
    pub fn validate(&self) -> Result<(), OramError> {
        if self.log_capacity == 0 || self.log_capacity > MAXIMUM_TREE_HEIGHT {
            return Err(OramError::InvalidConfiguration(format!(
                "log_capacity must be in 1..={}, got {}",
                MAXIMUM_TREE_HEIGHT, self.log_capacity
            )));
        }

        if self.bucket_size <= 1 {
            return Err(OramError::InvalidConfiguration(format!(
                "bucket_size must be at least 2, got {}",
                self.bucket_size
            )));
        }

        if self.batch_size == 0 {
            return Err(OramError::InvalidConfiguration(
                "batch_size must be positive".to_string(),
            ));
        }

        if self.max_block_len < MINIMUM_MAX_BLOCK_LEN {
            return Err(OramError::InvalidConfiguration(format!(
                "max_block_len must be at least {}, got {}",
                MINIMUM_MAX_BLOCK_LEN, self.max_block_len
            )));
        }

        if let Some(encoded) = &self.encryption_key {
            EncryptionKey::from_hex(encoded)?;
        }

        Ok(())
    }

    /// The configured key, or a freshly generated one.
    pub fn encryption_key(&self) -> Result<EncryptionKey, OramError> {
        match &self.encryption_key {
            Some(encoded) => EncryptionKey::from_hex(encoded),
            None => Ok(EncryptionKey::generate()),
        }
    }

    /// The number of real blocks the tree can hold.
    pub fn block_capacity(&self) -> u64 {
        (self.bucket_size as u64) << self.log_capacity
    }
}
