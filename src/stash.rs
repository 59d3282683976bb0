// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The Path ORAM stash.

use crate::{
    block::{Block, Bucket},
    position_map::PositionMap,
    tree_index::TreeGeometry,
    BucketSize, LeafIndex, TreeHeight,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Blocks that have been read out of the tree, or newly created, and not yet evicted.
///
/// Each key appears at most once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stash(BTreeMap<String, Block>);

impl Stash {
    /// Inserts `block`, replacing any block with the same key.
    pub fn insert(&mut self, block: Block) {
        self.0.insert(block.key.clone(), block);
    }

    /// Inserts `block` unless a block with the same key is already stashed.
    ///
    /// Returns whether the block was inserted.
    pub fn insert_if_absent(&mut self, block: Block) -> bool {
        match self.0.entry(block.key.clone()) {
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(block);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    /// The block stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Block> {
        self.0.get(key)
    }

    /// Whether a block with `key` is stashed.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// The number of stashed blocks.
    pub fn occupancy(&self) -> usize {
        self.0.len()
    }

    /// Empties the stash.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Iterates over the stashed blocks in key order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.0.values()
    }

    /// Removes up to `bucket_size` blocks that may legally live in the bucket at `level` on the
    /// path to `leaf`, and returns them as a bucket padded with dummies.
    ///
    /// A block may live there if the path to its current leaf passes through the same bucket.
    pub fn evict_into_bucket(
        &mut self,
        position_map: &PositionMap,
        tree: &TreeGeometry,
        leaf: LeafIndex,
        level: TreeHeight,
        bucket_size: BucketSize,
    ) -> Bucket {
        let evicted_keys: Vec<String> = self
            .0
            .keys()
            .filter(|key| {
                position_map
                    .get(key)
                    .is_some_and(|block_leaf| tree.paths_intersect(block_leaf, leaf, level))
            })
            .take(bucket_size)
            .cloned()
            .collect();

        let blocks = evicted_keys
            .iter()
            .filter_map(|key| self.0.remove(key))
            .collect();
        Bucket::padded(blocks, bucket_size)
    }
}
