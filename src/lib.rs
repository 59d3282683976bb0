// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! An oblivious key-value store built on a batched Path ORAM.
//!
//! The store keeps string keys and values in an untrusted backend (anything implementing
//! [`database::Database`], e.g. an in-memory map or a redis server) as a complete binary tree of
//! encrypted, fixed-size buckets. Every batch of requests reads and rewrites a set of root-to-leaf
//! paths whose size depends only on the shape of the batch, never on which keys were requested.
//!
//! ```no_run
//! use oram_kv::{database::SimpleDatabase, OramConfig, PathOram, Request};
//!
//! # fn main() -> Result<(), oram_kv::OramError> {
//! let config = OramConfig::default();
//! let mut oram = PathOram::new(&config, SimpleDatabase::default())?;
//! oram.batch(&[Request::put("alice", "42")], config.batch_size)?;
//! let values = oram.batch(&[Request::get("alice")], config.batch_size)?;
//! assert_eq!(values, vec!["42".to_string()]);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::cargo, clippy::doc_markdown, missing_docs, rustdoc::all)]

use thiserror::Error;

pub mod block;
pub mod config;
pub mod crypto;
pub mod database;
pub mod dispatcher;
pub mod path_oram;
pub mod position_map;
pub mod redis_database;
pub mod snapshot;
pub mod stash;
pub mod storage;
pub mod trace;
pub mod tree_index;

#[cfg(test)]
mod test_utils;

pub use crate::config::OramConfig;
pub use crate::path_oram::PathOram;

/// Numeric type used to identify a leaf of the ORAM tree, in `0..2^height`.
pub type LeafIndex = u64;

/// Numeric type used to identify a bucket of the ORAM tree in level order (the root is 0).
pub type BucketIndex = u64;

/// Numeric type used to represent the height of the ORAM tree (`LogCapacity`).
pub type TreeHeight = u32;

/// Numeric type used to represent the number of blocks in a bucket (`Z`).
pub type BucketSize = usize;

/// Numeric type used to represent the size of the stash in blocks.
pub type StashSize = usize;

/// The key carried by dummy blocks. Callers may not use it as a key.
pub const DUMMY_KEY: &str = "-1";

/// The value returned for a get of a key that has never been written.
pub const NOT_FOUND: &str = "-1";

/// A single get or put. An empty `value` denotes a get.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Request {
    /// The logical key.
    pub key: String,
    /// The value to write, or empty for a read.
    pub value: String,
}

impl Request {
    /// A request reading `key`.
    pub fn get(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: String::new(),
        }
    }

    /// A request writing `value` to `key`.
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Whether this request is a write.
    pub fn is_put(&self) -> bool {
        !self.value.is_empty()
    }
}

/// Errors raised by the oblivious store.
#[derive(Error, Debug)]
pub enum OramError {
    /// Raised when the store is constructed with invalid parameters.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Raised when a batch holds more requests than the declared batch size.
    #[error("batch of {requested} requests exceeds the batch size of {batch_size}")]
    BatchSizeExceeded {
        /// The number of requests submitted.
        requested: usize,
        /// The declared batch size.
        batch_size: usize,
    },

    /// Raised when a request uses the key reserved for dummy blocks.
    #[error("the key \"-1\" is reserved for dummy blocks")]
    ReservedKey,

    /// Raised when a put would store a block larger than the configured `max_block_len`.
    #[error("block for key {key:?} serializes to {len} bytes, more than the maximum of {max}")]
    BlockTooLarge {
        /// The key of the rejected put.
        key: String,
        /// The serialized length of the block.
        len: usize,
        /// The configured maximum.
        max: usize,
    },

    /// Raised when a stored blob is too short to contain a nonce and an authentication tag.
    #[error("ciphertext of {len} bytes is too short")]
    ShortCiphertext {
        /// The length of the rejected blob.
        len: usize,
    },

    /// Raised when a stored blob fails authenticated decryption.
    #[error("bucket ciphertext failed to decrypt")]
    Decryption,

    /// Raised when encryption fails.
    #[error("bucket encryption failed")]
    Encryption,

    /// Raised when a decrypted bucket does not hold exactly `expected` blocks.
    #[error("bucket {index} holds {found} blocks, expected {expected}")]
    MalformedBucket {
        /// The bucket index.
        index: BucketIndex,
        /// The configured bucket size.
        expected: BucketSize,
        /// The number of blocks found.
        found: usize,
    },

    /// Raised when a serialized bucket does not fit the padded plaintext size.
    #[error("bucket serializes to {len} bytes, more than the padded size of {capacity}")]
    OversizedBucket {
        /// The serialized length of the bucket.
        len: usize,
        /// The padded plaintext size.
        capacity: usize,
    },

    /// Raised when the length prefix of a decrypted bucket is missing or out of bounds.
    #[error("bucket {0} has an invalid length prefix")]
    MalformedPadding(BucketIndex),

    /// Raised when the backend has no entry for a bucket of the tree.
    #[error("bucket {0} is missing from the backend")]
    MissingBucket(BucketIndex),

    /// Raised when the dispatcher owning the store has stopped.
    #[error("the ORAM engine is no longer running")]
    EngineUnavailable,

    /// Errors arising from integer conversions.
    #[error("integer conversion error: {0}")]
    IntegerConversion(#[from] std::num::TryFromIntError),

    /// Errors arising from (de)serializing buckets, snapshots or configuration.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Errors arising from reading or writing local files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors reported by a redis backend.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
