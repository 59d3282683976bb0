// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The Path ORAM position map.

use crate::LeafIndex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maps each key that has ever been written to the leaf whose path holds (or will hold) its block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionMap(HashMap<String, LeafIndex>);

/// Records the previous position of every key remapped during a batch, so that a failed batch can
/// be undone.
#[derive(Debug, Default)]
pub struct PositionJournal(Vec<(String, Option<LeafIndex>)>);

impl PositionJournal {
    /// The number of recorded remaps.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was remapped.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PositionMap {
    /// The leaf currently assigned to `key`, if `key` was ever written.
    pub fn get(&self, key: &str) -> Option<LeafIndex> {
        self.0.get(key).copied()
    }

    /// Whether `key` has a position.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Assigns `key` to `leaf`, recording its previous position in `journal`.
    pub fn remap(&mut self, key: &str, leaf: LeafIndex, journal: &mut PositionJournal) {
        let previous = self.0.insert(key.to_string(), leaf);
        journal.0.push((key.to_string(), previous));
    }

    /// Undoes every remap recorded in `journal`, most recent first.
    pub fn rollback(&mut self, journal: PositionJournal) {
        for (key, previous) in journal.0.into_iter().rev() {
            match previous {
                Some(leaf) => self.0.insert(key, leaf),
                None => self.0.remove(&key),
            };
        }
    }

    /// The number of keys with a position.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no key has a position.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Forgets every position.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Iterates over `(key, leaf)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, LeafIndex)> {
        self.0.iter().map(|(key, leaf)| (key.as_str(), *leaf))
    }
}
