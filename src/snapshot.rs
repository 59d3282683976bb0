// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Durable copies of the client-side state.
//!
//! The position map and the stash exist only in memory. Blocks sitting in the stash have no place
//! in the tree, so losing them loses data; a snapshot taken between batches, together with the
//! encryption key and the untouched backend, is enough to reopen the store.

use crate::{position_map::PositionMap, stash::Stash, OramError};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// The client-side state of a store between two batches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The position of every written key.
    #[serde(rename = "Keymap")]
    pub position_map: PositionMap,
    /// The blocks not yet evicted into the tree.
    #[serde(rename = "StashMap")]
    pub stash: Stash,
}

impl Snapshot {
    /// Writes the snapshot to `path` as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), OramError> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        log::info!(
            "Saved snapshot of {} positions and {} stashed blocks to {}",
            self.position_map.len(),
            self.stash.occupancy(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Reads a snapshot written by [`Snapshot::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, OramError> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let snapshot: Self = serde_json::from_reader(reader)?;
        log::info!(
            "Loaded snapshot of {} positions and {} stashed blocks from {}",
            snapshot.position_map.len(),
            snapshot.stash.occupancy(),
            path.as_ref().display()
        );
        Ok(snapshot)
    }
}
