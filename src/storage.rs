// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Reads and writes encrypted buckets by index.

use crate::{
    block::Bucket, crypto::BucketCodec, database::Database, tree_index::TreeGeometry,
    BucketIndex, OramError,
};
use std::collections::{BTreeMap, BTreeSet};

/// The number of buckets written per round trip while initializing a tree.
const INITIALIZATION_CHUNK: u64 = 1024;

/// The backend name of bucket `index`.
pub fn bucket_key(index: BucketIndex) -> String {
    format!("bucket:{index}")
}

/// Translates bucket reads and writes into bulk operations on a [`Database`], sealing every
/// bucket with a [`BucketCodec`] on the way out and opening it on the way in.
///
/// This is the only component that talks to the backend.
#[derive(Debug)]
pub struct BucketStorage<D: Database> {
    database: D,
    codec: BucketCodec,
    tree: TreeGeometry,
}

impl<D: Database> BucketStorage<D> {
    /// Wraps `database`, which stores a tree of shape `tree`.
    pub fn new(database: D, codec: BucketCodec, tree: TreeGeometry) -> Self {
        Self {
            database,
            codec,
            tree,
        }
    }

    /// The underlying backend.
    pub fn database(&self) -> &D {
        &self.database
    }

    /// The underlying backend, mutably.
    pub fn database_mut(&mut self) -> &mut D {
        &mut self.database
    }

    /// Gives up the wrapper and returns the backend.
    pub fn into_database(self) -> D {
        self.database
    }

    /// The codec used to seal buckets.
    pub fn codec(&self) -> &BucketCodec {
        &self.codec
    }

    /// Reads and decrypts the buckets at `indices` in one round trip.
    ///
    /// # Errors
    ///
    /// A bucket absent from the backend is a `MissingBucket` error; the tree never holds gaps.
    pub fn read_buckets(
        &mut self,
        indices: &BTreeSet<BucketIndex>,
    ) -> Result<BTreeMap<BucketIndex, Bucket>, OramError> {
        let keys: Vec<String> = indices.iter().copied().map(bucket_key).collect();
        let mut blobs = self.database.get_many(&keys)?.into_iter();

        let mut buckets = BTreeMap::new();
        for &index in indices {
            let blob = blobs
                .next()
                .flatten()
                .ok_or(OramError::MissingBucket(index))?;
            buckets.insert(index, self.codec.open(index, &blob)?);
        }
        Ok(buckets)
    }

    /// Encrypts and writes `buckets` in one round trip.
    pub fn write_buckets(&mut self, buckets: Vec<(BucketIndex, Bucket)>) -> Result<(), OramError> {
        let mut entries = Vec::with_capacity(buckets.len());
        for (index, bucket) in &buckets {
            entries.push((bucket_key(*index), self.codec.seal(bucket)?));
        }
        self.database.set_many(entries)
    }

    /// Fills every bucket of the tree with dummy blocks.
    pub fn initialize(&mut self) -> Result<(), OramError> {
        let bucket_count = self.tree.bucket_count();
        log::info!(
            "Initializing {} buckets of {} blocks",
            bucket_count,
            self.codec.bucket_size()
        );

        let dummy = Bucket::dummy(self.codec.bucket_size());
        let mut start = 0;
        while start < bucket_count {
            let end = (start + INITIALIZATION_CHUNK).min(bucket_count);
            let chunk = (start..end).map(|index| (index, dummy.clone())).collect();
            self.write_buckets(chunk)?;
            start = end;
        }
        Ok(())
    }

    /// Wipes the backend.
    pub fn flush_all(&mut self) -> Result<(), OramError> {
        self.database.flush_all()
    }

    /// Releases the backend connection.
    pub fn close(&mut self) -> Result<(), OramError> {
        self.database.close()
    }
}
