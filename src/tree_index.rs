// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Tree geometry.
//!
//! Buckets are numbered in level order: the root is 0 and the children of bucket `i` are
//! `2i + 1` and `2i + 2`. Leaves are numbered `0..2^height` from left to right, so the bucket
//! holding leaf `l` is `l + 2^height - 1`.

use crate::{BucketIndex, LeafIndex, OramError, TreeHeight};
use rand::{CryptoRng, Rng, RngCore};
use std::collections::BTreeSet;
use subtle::ConstantTimeEq;

/// The largest supported tree height.
pub const MAXIMUM_TREE_HEIGHT: TreeHeight = 32;

/// Pure helpers over a complete binary tree of a fixed height (`LogCapacity`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeGeometry {
    height: TreeHeight,
}

impl TreeGeometry {
    /// Geometry of a tree whose leaves sit at level `height`.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidConfiguration` error if `height` is 0 or exceeds [`MAXIMUM_TREE_HEIGHT`].
    pub fn new(height: TreeHeight) -> Result<Self, OramError> {
        if height == 0 || height > MAXIMUM_TREE_HEIGHT {
            return Err(OramError::InvalidConfiguration(format!(
                "tree height must be in 1..={MAXIMUM_TREE_HEIGHT}, got {height}"
            )));
        }
        Ok(Self { height })
    }

    /// The level of the leaves.
    pub fn height(&self) -> TreeHeight {
        self.height
    }

    /// The number of leaves, `2^height`.
    pub fn leaf_count(&self) -> u64 {
        1 << self.height
    }

    /// The number of buckets, `2^(height + 1) - 1`.
    pub fn bucket_count(&self) -> u64 {
        (1 << (self.height + 1)) - 1
    }

    /// The level of `bucket`; the root is at level 0.
    pub fn depth(bucket: BucketIndex) -> TreeHeight {
        (bucket + 1).ilog2()
    }

    /// The unique bucket at `level` on the path from the root to `leaf`.
    pub fn bucket_for_level_leaf(&self, level: TreeHeight, leaf: LeafIndex) -> BucketIndex {
        debug_assert!(level <= self.height);
        debug_assert!(leaf < self.leaf_count());
        ((leaf + self.leaf_count()) >> (self.height - level)) - 1
    }

    /// Whether the paths to `leaf_a` and `leaf_b` share their bucket at `level`.
    pub fn paths_intersect(&self, leaf_a: LeafIndex, leaf_b: LeafIndex, level: TreeHeight) -> bool {
        let shift = self.height - level;
        (leaf_a >> shift).ct_eq(&(leaf_b >> shift)).into()
    }

    /// A uniformly random leaf.
    pub fn random_leaf<R: RngCore + CryptoRng>(&self, rng: &mut R) -> LeafIndex {
        rng.gen_range(0..self.leaf_count())
    }

    /// The buckets on the path to `leaf`, from the leaf up to the root.
    pub fn path(&self, leaf: LeafIndex) -> impl Iterator<Item = BucketIndex> + '_ {
        (0..=self.height)
            .rev()
            .map(move |level| self.bucket_for_level_leaf(level, leaf))
    }

    /// The union of the paths to `leaves`.
    ///
    /// Each path is walked from its leaf upwards and abandoned at the first bucket already in the
    /// union, since every bucket above it is then already present.
    pub fn path_union(&self, leaves: &[LeafIndex]) -> BTreeSet<BucketIndex> {
        let mut buckets = BTreeSet::new();
        for &leaf in leaves {
            for bucket in self.path(leaf) {
                if !buckets.insert(bucket) {
                    break;
                }
            }
        }
        buckets
    }
}
