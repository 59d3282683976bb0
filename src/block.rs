// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Block and bucket structures for Path ORAM.

use crate::{BucketSize, DUMMY_KEY};
use serde::{Deserialize, Serialize};
use subtle::{Choice, ConstantTimeEq};

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// A stored key/value pair. Dummy blocks carry [`DUMMY_KEY`] and an empty value.
pub struct Block {
    /// The logical key of the block.
    #[serde(rename = "Key")]
    pub key: String,
    /// The payload of the block.
    #[serde(rename = "Value")]
    pub value: String,
}

impl Block {
    /// A real block holding `value` under `key`.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// A dummy block used to pad buckets.
    pub fn dummy() -> Self {
        Self {
            key: DUMMY_KEY.to_string(),
            value: String::new(),
        }
    }

    /// Whether this block is a dummy, compared without early exit.
    pub fn ct_is_dummy(&self) -> Choice {
        self.key.as_bytes().ct_eq(DUMMY_KEY.as_bytes())
    }

    /// Whether this block is a dummy.
    pub fn is_dummy(&self) -> bool {
        self.ct_is_dummy().into()
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_dummy() {
            write!(f, "Block::Dummy")
        } else {
            f.debug_struct("Block")
                .field("key", &self.key)
                .field("value", &self.value)
                .finish()
        }
    }
}

/// A Path ORAM bucket: exactly `Z` blocks, real blocks first, the rest dummies.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// The blocks stored by this bucket.
    #[serde(rename = "Blocks")]
    pub blocks: Vec<Block>,
}

impl Bucket {
    /// A bucket of `bucket_size` dummy blocks.
    pub fn dummy(bucket_size: BucketSize) -> Self {
        Self {
            blocks: vec![Block::dummy(); bucket_size],
        }
    }

    /// A bucket holding `real_blocks` followed by enough dummies to fill `bucket_size` slots.
    ///
    /// Callers never pass more than `bucket_size` blocks.
    pub fn padded(mut real_blocks: Vec<Block>, bucket_size: BucketSize) -> Self {
        debug_assert!(real_blocks.len() <= bucket_size);
        real_blocks.resize(bucket_size, Block::dummy());
        Self {
            blocks: real_blocks,
        }
    }

    /// The number of real (non-dummy) blocks.
    pub fn occupancy(&self) -> usize {
        self.blocks.iter().filter(|block| !block.is_dummy()).count()
    }

    /// Iterates over the real blocks of the bucket.
    pub fn real_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|block| !block.is_dummy())
    }

    /// Consumes the bucket, yielding its real blocks.
    pub fn into_real_blocks(self) -> impl Iterator<Item = Block> {
        self.blocks.into_iter().filter(|block| !block.is_dummy())
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.occupancy() == 0 {
            write!(f, "Bucket::Dummy")
        } else {
            f.debug_struct("Bucket")
                .field("blocks", &self.blocks)
                .finish()
        }
    }
}
