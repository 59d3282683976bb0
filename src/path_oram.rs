// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A batched Path ORAM over string keys and values.
//!
//! A batch of requests is served by three bulk backend operations:
//!
//! 1. every request is classified and its key remapped to a fresh random leaf;
//! 2. the union of the paths to the previous leaves is read into the stash;
//! 3. requests are answered from the stash, then the same paths are rewritten, each bucket
//!     greedily refilled with stashed blocks that may legally live there.
//!
//! A key repeated within a batch reads a random decoy path instead of its own, so the number of
//! paths touched depends only on the number of requests.

use crate::{
    block::{Block, Bucket},
    config::OramConfig,
    crypto::{BucketCodec, EncryptionKey},
    database::Database,
    position_map::{PositionJournal, PositionMap},
    snapshot::Snapshot,
    stash::Stash,
    storage::BucketStorage,
    tree_index::TreeGeometry,
    BucketIndex, BucketSize, LeafIndex, OramError, Request, StashSize, TreeHeight, DUMMY_KEY,
    NOT_FOUND,
};
use rand::{rngs::StdRng, CryptoRng, RngCore, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// The number of buckets fetched per round trip by [`PathOram::tree_contents`].
const DUMP_CHUNK: u64 = 1024;

/// An oblivious key-value store whose encrypted tree lives in a [`Database`].
///
/// The position map and the stash live in client memory. All randomness, leaf assignment as well
/// as decoys, is drawn from `R`.
#[derive(Debug)]
pub struct PathOram<D: Database, R: RngCore + CryptoRng = StdRng> {
    storage: BucketStorage<D>,
    stash: Stash,
    position_map: PositionMap,
    tree: TreeGeometry,
    bucket_size: BucketSize,
    stash_size: StashSize,
    rng: R,
}

impl<D: Database> PathOram<D, StdRng> {
    /// Wipes `database` and lays out an empty tree of the shape given by `config`.
    ///
    /// Leaves are drawn from a `StdRng` seeded by the operating system.
    pub fn new(config: &OramConfig, database: D) -> Result<Self, OramError> {
        Self::with_rng(config, database, StdRng::from_entropy())
    }

    /// Reopens a tree previously written to `database` under the same configuration and key,
    /// using the client-side state saved in `snapshot`. The backend is left untouched.
    pub fn restore(config: &OramConfig, database: D, snapshot: Snapshot) -> Result<Self, OramError> {
        Self::restore_with_rng(config, database, snapshot, StdRng::from_entropy())
    }
}

impl<D: Database, R: RngCore + CryptoRng> PathOram<D, R> {
    /// Like [`PathOram::new`], drawing leaves from `rng`.
    pub fn with_rng(config: &OramConfig, database: D, rng: R) -> Result<Self, OramError> {
        let mut oram = Self::unopened(config, database, rng)?;
        oram.initialize_empty()?;
        Ok(oram)
    }

    /// Like [`PathOram::restore`], drawing leaves from `rng`.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidConfiguration` error if the snapshot assigns a leaf outside the tree,
    /// and `BlockTooLarge` if it stashes a block larger than `max_block_len`.
    pub fn restore_with_rng(
        config: &OramConfig,
        database: D,
        snapshot: Snapshot,
        rng: R,
    ) -> Result<Self, OramError> {
        let mut oram = Self::unopened(config, database, rng)?;
        let leaf_count = oram.tree.leaf_count();
        if let Some((key, leaf)) = snapshot
            .position_map
            .iter()
            .find(|(_, leaf)| *leaf >= leaf_count)
        {
            return Err(OramError::InvalidConfiguration(format!(
                "snapshot places {key:?} at leaf {leaf}, but the tree has {leaf_count} leaves"
            )));
        }

        for block in snapshot.stash.blocks() {
            oram.check_block_len(block)?;
        }

        oram.position_map = snapshot.position_map;
        oram.stash = snapshot.stash;
        log::info!(
            "Restored ORAM of height {} with {} positions and {} stashed blocks",
            oram.tree.height(),
            oram.position_map.len(),
            oram.stash.occupancy()
        );
        Ok(oram)
    }

    fn unopened(config: &OramConfig, database: D, rng: R) -> Result<Self, OramError> {
        config.validate()?;
        let tree = TreeGeometry::new(config.log_capacity)?;
        let key: EncryptionKey = config.encryption_key()?;
        let codec = BucketCodec::new(&key, config.bucket_size, config.max_block_len);

        Ok(Self {
            storage: BucketStorage::new(database, codec, tree),
            stash: Stash::default(),
            position_map: PositionMap::default(),
            tree,
            bucket_size: config.bucket_size,
            stash_size: config.stash_size,
            rng,
        })
    }

    /// Serves `requests` in order and returns one value per request.
    ///
    /// A put returns the value it wrote. A get returns the latest value of its key, taking
    /// earlier puts in the same batch into account, or [`NOT_FOUND`] if the key was never
    /// written. The batch either takes full effect or, on error, leaves the client-side state as
    /// it was.
    ///
    /// # Errors
    ///
    /// - `BatchSizeExceeded` if `requests` holds more than `batch_size` requests.
    /// - `ReservedKey` if a request uses [`DUMMY_KEY`].
    /// - `BlockTooLarge` if a put would store a block larger than `max_block_len`.
    /// - Any backend or decryption error raised while reading or writing paths.
    pub fn batch(
        &mut self,
        requests: &[Request],
        batch_size: usize,
    ) -> Result<Vec<String>, OramError> {
        if requests.len() > batch_size {
            return Err(OramError::BatchSizeExceeded {
                requested: requests.len(),
                batch_size,
            });
        }
        if requests.iter().any(|request| request.key == DUMMY_KEY) {
            return Err(OramError::ReservedKey);
        }
        for request in requests.iter().filter(|request| request.is_put()) {
            self.check_block_len(&Block::new(request.key.clone(), request.value.clone()))?;
        }

        let stash_checkpoint = self.stash.clone();
        let mut journal = PositionJournal::default();

        match self.access_batch(requests, &mut journal) {
            Ok(values) => Ok(values),
            Err(error) => {
                log::error!(
                    "Batch of {} requests failed, rolling back {} remaps: {}",
                    requests.len(),
                    journal.len(),
                    error
                );
                self.stash = stash_checkpoint;
                self.position_map.rollback(journal);
                Err(error)
            }
        }
    }

    fn access_batch(
        &mut self,
        requests: &[Request],
        journal: &mut PositionJournal,
    ) -> Result<Vec<String>, OramError> {
        let previous_leaves = self.classify(requests, journal);
        self.read_paths(&previous_leaves)?;
        let values = self.answer(requests, journal);
        self.write_paths(&previous_leaves)?;

        let occupancy = self.stash.occupancy();
        if occupancy > self.stash_size {
            log::warn!(
                "Stash holds {} blocks, above its cap of {}",
                occupancy,
                self.stash_size
            );
        }
        log::debug!(
            "Served {} requests over {} paths, stash at {}",
            requests.len(),
            previous_leaves.len(),
            occupancy
        );
        Ok(values)
    }

    /// Picks the leaf whose path each request reads and remaps first-seen keys.
    ///
    /// Every first appearance of a key draws two leaves whether or not the key is known, and
    /// every repeat draws one, so the randomness consumed does not depend on the contents of the
    /// position map.
    fn classify(&mut self, requests: &[Request], journal: &mut PositionJournal) -> Vec<LeafIndex> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(requests.len());
        let mut distinct_leaves = HashSet::with_capacity(requests.len());
        let mut previous_leaves = Vec::with_capacity(requests.len());

        for request in requests {
            let previous_leaf = if seen.insert(request.key.as_str()) {
                let random_leaf = self.tree.random_leaf(&mut self.rng);
                let new_leaf = self.tree.random_leaf(&mut self.rng);
                match self.position_map.get(&request.key) {
                    Some(leaf) => {
                        self.position_map.remap(&request.key, new_leaf, journal);
                        leaf
                    }
                    None => {
                        // A get of an unknown key leaves no trace in the position map.
                        if request.is_put() {
                            self.stash
                                .insert(Block::new(request.key.clone(), request.value.clone()));
                            self.position_map.remap(&request.key, new_leaf, journal);
                        }
                        random_leaf
                    }
                }
            } else {
                // Decoy.
                self.tree.random_leaf(&mut self.rng)
            };

            if distinct_leaves.insert(previous_leaf) {
                previous_leaves.push(previous_leaf);
            }
        }

        previous_leaves
    }

    fn check_block_len(&self, block: &Block) -> Result<(), OramError> {
        let len = serde_json::to_vec(block)?.len();
        let max = self.storage.codec().max_block_len();
        if len > max {
            return Err(OramError::BlockTooLarge {
                key: block.key.clone(),
                len,
                max,
            });
        }
        Ok(())
    }

    fn answer(&mut self, requests: &[Request], journal: &mut PositionJournal) -> Vec<String> {
        let mut values = Vec::with_capacity(requests.len());
        for request in requests {
            if request.is_put() {
                // The key may have been first seen as a get earlier in this batch.
                if !self.position_map.contains(&request.key) {
                    let leaf = self.tree.random_leaf(&mut self.rng);
                    self.position_map.remap(&request.key, leaf, journal);
                }
                self.stash
                    .insert(Block::new(request.key.clone(), request.value.clone()));
                values.push(request.value.clone());
            } else {
                values.push(
                    self.stash
                        .get(&request.key)
                        .map_or_else(|| NOT_FOUND.to_string(), |block| block.value.clone()),
                );
            }
        }
        values
    }

    /// Reads the union of the paths to `leaves` in one round trip and moves every real block
    /// found into the stash. A block already stashed is newer than its copy in the tree and is
    /// kept. A block whose key has no position is left over from before a reset or a restore
    /// and is dropped.
    ///
    /// Must be followed by [`PathOram::write_paths`] over the same leaves; until then the blocks
    /// read are held twice.
    pub fn read_paths(&mut self, leaves: &[LeafIndex]) -> Result<(), OramError> {
        let indices = self.tree.path_union(leaves);
        let buckets = self.storage.read_buckets(&indices)?;

        let mut stale = 0usize;
        let mut orphaned = 0usize;
        for bucket in buckets.into_values() {
            for block in bucket.into_real_blocks() {
                if !self.position_map.contains(&block.key) {
                    orphaned += 1;
                } else if !self.stash.insert_if_absent(block) {
                    stale += 1;
                }
            }
        }
        log::debug!(
            "Read {} buckets over {} paths, {} stale and {} orphaned blocks dropped",
            indices.len(),
            leaves.len(),
            stale,
            orphaned
        );
        Ok(())
    }

    /// Rewrites every bucket on the paths to `leaves` in one round trip.
    ///
    /// Buckets are refilled from the deepest level up, so that blocks settle as close to their
    /// leaf as possible. Each bucket takes at most `Z` eligible blocks and is padded with dummies.
    pub fn write_paths(&mut self, leaves: &[LeafIndex]) -> Result<(), OramError> {
        let mut targets: BTreeMap<BucketIndex, (LeafIndex, TreeHeight)> = BTreeMap::new();
        for &leaf in leaves {
            for level in 0..=self.tree.height() {
                targets.insert(self.tree.bucket_for_level_leaf(level, leaf), (leaf, level));
            }
        }

        // Level-order indices grow with depth, so descending order visits children first.
        let mut buckets: Vec<(BucketIndex, Bucket)> = Vec::with_capacity(targets.len());
        for (index, (leaf, level)) in targets.into_iter().rev() {
            let bucket = self.stash.evict_into_bucket(
                &self.position_map,
                &self.tree,
                leaf,
                level,
                self.bucket_size,
            );
            buckets.push((index, bucket));
        }

        log::debug!("Writing {} buckets", buckets.len());
        self.storage.write_buckets(buckets)
    }

    /// Wipes the backend, writes an all-dummy tree and clears the client-side state.
    pub fn initialize_empty(&mut self) -> Result<(), OramError> {
        self.storage.flush_all()?;
        self.storage.initialize()?;
        self.stash.clear();
        self.position_map.clear();
        log::info!(
            "Initialized ORAM of height {} with {} blocks per bucket",
            self.tree.height(),
            self.bucket_size
        );
        Ok(())
    }

    /// Forgets every key: clears the stash and the position map and overwrites every bucket of
    /// the tree with dummies. Every key reads as not found afterwards.
    ///
    /// If rewriting the tree fails the client-side state is cleared anyway, and blocks left in
    /// the tree are dropped when next read since their keys no longer have a position.
    pub fn reset(&mut self) -> Result<(), OramError> {
        self.stash.clear();
        self.position_map.clear();
        self.storage.initialize()?;
        log::info!("Cleared stash, position map and tree");
        Ok(())
    }

    /// Releases the backend connection.
    pub fn close(&mut self) -> Result<(), OramError> {
        log::info!("Closing ORAM backend");
        self.storage.close()
    }

    /// Loads `requests` in batches of at most `batch_size`, returning the number of batches run.
    pub fn load_requests(
        &mut self,
        requests: &[Request],
        batch_size: usize,
    ) -> Result<usize, OramError> {
        if batch_size == 0 {
            return Err(OramError::InvalidConfiguration(
                "batch_size must be positive".to_string(),
            ));
        }

        let mut batches = 0;
        for chunk in requests.chunks(batch_size) {
            self.batch(chunk, batch_size)?;
            batches += 1;
        }
        log::info!("Loaded {} requests in {} batches", requests.len(), batches);
        Ok(batches)
    }

    /// A copy of the client-side state, to be persisted with [`Snapshot::save`].
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            position_map: self.position_map.clone(),
            stash: self.stash.clone(),
        }
    }

    /// Every real block stored in the tree, with the index of its bucket, in bucket order.
    ///
    /// This reads the whole tree and is meant for debugging only: the access pattern reveals
    /// nothing about the keys, but the cost is linear in the size of the tree.
    pub fn tree_contents(&mut self) -> Result<Vec<(BucketIndex, Block)>, OramError> {
        let bucket_count = self.tree.bucket_count();
        let mut contents = Vec::new();
        let mut start = 0;
        while start < bucket_count {
            let end = (start + DUMP_CHUNK).min(bucket_count);
            let indices: BTreeSet<BucketIndex> = (start..end).collect();
            for (index, bucket) in self.storage.read_buckets(&indices)? {
                contents.extend(bucket.into_real_blocks().map(|block| (index, block)));
            }
            start = end;
        }
        Ok(contents)
    }

    /// The number of stashed blocks.
    pub fn stash_occupancy(&self) -> usize {
        self.stash.occupancy()
    }

    /// The number of keys with a position, i.e. keys that have been written.
    pub fn position_count(&self) -> usize {
        self.position_map.len()
    }

    /// The shape of the tree.
    pub fn tree(&self) -> &TreeGeometry {
        &self.tree
    }

    /// The number of blocks per bucket.
    pub fn bucket_size(&self) -> BucketSize {
        self.bucket_size
    }

    /// The underlying backend.
    pub fn database(&self) -> &D {
        self.storage.database()
    }

    /// The underlying backend, mutably.
    pub fn database_mut(&mut self) -> &mut D {
        self.storage.database_mut()
    }

    /// Gives up the store and returns its backend.
    pub fn into_database(self) -> D {
        self.storage.into_database()
    }

    #[cfg(test)]
    pub(crate) fn stash(&self) -> &Stash {
        &self.stash
    }

    #[cfg(test)]
    pub(crate) fn position_map(&self) -> &PositionMap {
        &self.position_map
    }

    #[cfg(test)]
    pub(crate) fn storage_mut(&mut self) -> &mut BucketStorage<D> {
        &mut self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        database::{CountAccessesDatabase, SimpleDatabase},
        test_utils::{
            create_batch_correctness_tests, init_logger, small_config, test_oram,
            test_repeated_passes_workload, test_random_batch_workload, FaultyDatabase, Testable,
        },
    };

    create_batch_correctness_tests!(test_random_batch_workload, 3, 2, 8, 4, 40);
    create_batch_correctness_tests!(test_random_batch_workload, 4, 4, 20, 8, 60);
    create_batch_correctness_tests!(test_random_batch_workload, 6, 5, 100, 16, 60);
    create_batch_correctness_tests!(test_random_batch_workload, 8, 3, 300, 50, 30);
    create_batch_correctness_tests!(test_random_batch_workload, 10, 5, 2, 50, 20);
    create_batch_correctness_tests!(test_repeated_passes_workload, 4, 4, 30, 5, 3);
    create_batch_correctness_tests!(test_repeated_passes_workload, 7, 2, 100, 16, 2);

    #[test]
    fn bulk_load_then_read_back_in_passes() {
        init_logger();
        let config = small_config(10, 5);
        let mut oram = test_oram(&config, SimpleDatabase::default(), 0);

        let puts: Vec<Request> = (0..1000)
            .map(|i| Request::put(i.to_string(), format!("Value{i}")))
            .collect();
        assert_eq!(oram.load_requests(&puts, 50).unwrap(), 20);
        assert_eq!(oram.position_count(), 1000);

        for _ in 0..5 {
            for start in (0..1000).step_by(50) {
                let gets: Vec<Request> =
                    (start..start + 50).map(|i| Request::get(i.to_string())).collect();
                let values = oram.batch(&gets, 50).unwrap();
                for (offset, value) in values.iter().enumerate() {
                    assert_eq!(*value, format!("Value{}", start + offset));
                }
            }
        }
        oram.test_hook();
    }

    #[test]
    fn repeated_keys_see_earlier_puts() {
        init_logger();
        let config = small_config(4, 4);
        let mut oram = test_oram(&config, SimpleDatabase::default(), 1);

        let values = oram
            .batch(
                &[
                    Request::put("a", "1"),
                    Request::get("a"),
                    Request::put("a", "2"),
                    Request::get("a"),
                ],
                4,
            )
            .unwrap();
        assert_eq!(values, ["1", "1", "2", "2"]);
        assert_eq!(oram.batch(&[Request::get("a")], 4).unwrap(), ["2"]);
        oram.test_hook();
    }

    #[test]
    fn get_then_put_of_a_new_key() {
        init_logger();
        let config = small_config(4, 4);
        let mut oram = test_oram(&config, SimpleDatabase::default(), 2);

        let values = oram
            .batch(&[Request::get("k"), Request::put("k", "v")], 2)
            .unwrap();
        assert_eq!(values, [NOT_FOUND, "v"]);
        assert_eq!(oram.position_count(), 1);
        assert_eq!(oram.batch(&[Request::get("k")], 2).unwrap(), ["v"]);
        oram.test_hook();
    }

    #[test]
    fn buckets_are_padded_with_dummies() {
        init_logger();
        let config = small_config(2, 4);
        let mut oram = test_oram(&config, SimpleDatabase::default(), 3);
        oram.batch(&[Request::put("k", "v")], 1).unwrap();

        // An empty tree always has room for the block somewhere on the path.
        assert_eq!(oram.stash_occupancy(), 0);
        let contents = oram.tree_contents().unwrap();
        assert_eq!(contents.len(), 1);
        let (index, block) = &contents[0];
        assert_eq!(block, &Block::new("k", "v"));

        let raw = oram
            .storage_mut()
            .read_buckets(&BTreeSet::from([*index]))
            .unwrap();
        let bucket = &raw[index];
        assert_eq!(bucket.blocks.len(), 4);
        assert_eq!(bucket.occupancy(), 1);
        assert_eq!(
            bucket.blocks.iter().filter(|b| b.key == DUMMY_KEY).count(),
            3
        );
    }

    #[test]
    fn unknown_keys_are_not_found_and_leave_no_trace() {
        init_logger();
        let config = small_config(3, 3);
        let mut oram = test_oram(&config, SimpleDatabase::default(), 4);
        let values = oram
            .batch(&[Request::get("ghost"), Request::get("ghost")], 2)
            .unwrap();
        assert_eq!(values, [NOT_FOUND, NOT_FOUND]);
        assert_eq!(oram.position_count(), 0);
        assert_eq!(oram.stash_occupancy(), 0);
        assert!(oram.tree_contents().unwrap().is_empty());
    }

    #[test]
    fn every_batch_is_one_read_and_one_write() {
        init_logger();
        let config = small_config(6, 4);
        let mut oram = test_oram(&config, CountAccessesDatabase::default(), 5);
        oram.database_mut().reset_counts();

        let requests: Vec<Request> = (0..10)
            .map(|i| Request::put(format!("k{i}"), "v"))
            .chain((0..10).map(|i| Request::get(format!("k{i}"))))
            .collect();
        oram.batch(&requests, 20).unwrap();

        let database = oram.database();
        assert_eq!(database.round_trips, 2);
        // Every bucket read is rewritten, and nothing else is.
        let read_buckets: BTreeSet<&String> = database.reads.keys().collect();
        let written_buckets: BTreeSet<&String> = database.writes.keys().collect();
        assert_eq!(read_buckets, written_buckets);
        assert!(database.reads.values().all(|count| *count == 1));
        assert!(database.writes.values().all(|count| *count == 1));
    }

    #[test]
    fn access_pattern_does_not_depend_on_keys_or_operations() {
        init_logger();
        let config = small_config(8, 4);

        let touched = |requests: &[Request]| {
            let mut oram = test_oram(&config, CountAccessesDatabase::default(), 42);
            oram.database_mut().reset_counts();
            oram.batch(requests, requests.len()).unwrap();
            (
                oram.database().reads.clone(),
                oram.database().writes.keys().cloned().collect::<BTreeSet<_>>(),
            )
        };

        // Gets of unknown keys and puts of new keys draw the same leaves in the same order.
        let gets: Vec<Request> = ["a", "b", "c", "d"].into_iter().map(Request::get).collect();
        let puts: Vec<Request> = ["w", "x", "y", "z"]
            .into_iter()
            .map(|key| Request::put(key, "value"))
            .collect();
        assert_eq!(touched(&gets), touched(&puts));
    }

    #[test]
    fn stored_unseen_and_repeated_keys_touch_as_many_buckets() {
        use rand::seq::index::sample;

        const STORED: usize = 64;
        const BATCH: usize = 8;
        const ROUNDS: usize = 200;

        init_logger();
        let config = small_config(6, 4);
        let mut oram = test_oram(&config, CountAccessesDatabase::default(), 16);
        let puts: Vec<Request> = (0..STORED)
            .map(|i| Request::put(format!("s{i}"), i.to_string()))
            .collect();
        oram.load_requests(&puts, BATCH).unwrap();

        let mut rng = StdRng::seed_from_u64(17);
        let mut unseen = 0..;
        let buckets_touched =
            |oram: &mut PathOram<CountAccessesDatabase, StdRng>, requests: Vec<Request>| {
                oram.database_mut().reset_counts();
                oram.batch(&requests, BATCH).unwrap();
                let database = oram.database();
                assert_eq!(database.round_trips, 2);
                let read_buckets: BTreeSet<&String> = database.reads.keys().collect();
                let written_buckets: BTreeSet<&String> = database.writes.keys().collect();
                assert_eq!(read_buckets, written_buckets);
                read_buckets.len() as f64
            };

        let mut totals = [0f64; 3];
        for _ in 0..ROUNDS {
            let stored: Vec<Request> = sample(&mut rng, STORED, BATCH)
                .into_iter()
                .map(|i| Request::get(format!("s{i}")))
                .collect();
            totals[0] += buckets_touched(&mut oram, stored);

            let never_written: Vec<Request> = unseen
                .by_ref()
                .take(BATCH)
                .map(|i: usize| Request::get(format!("u{i}")))
                .collect();
            totals[1] += buckets_touched(&mut oram, never_written);

            let pair = sample(&mut rng, STORED, 2).into_vec();
            let repeated: Vec<Request> = (0..BATCH)
                .map(|i| Request::get(format!("s{}", pair[i * 2 / BATCH])))
                .collect();
            totals[2] += buckets_touched(&mut oram, repeated);
        }

        let means = totals.map(|total| total / ROUNDS as f64);
        log::info!("Mean buckets touched per batch: {means:?}");
        // Eight random paths of a tree of height 6 cover about 33 of its 127 buckets.
        for mean in means {
            assert!((means[0] - mean).abs() < means[0] * 0.1, "{means:?}");
        }
        assert_eq!(oram.position_count(), STORED);
        oram.test_hook();
    }

    #[test]
    fn oversized_batches_and_reserved_keys_are_rejected() {
        init_logger();
        let config = small_config(3, 3);
        let mut oram = test_oram(&config, CountAccessesDatabase::default(), 6);
        oram.database_mut().reset_counts();

        let requests: Vec<Request> = (0..3).map(|i| Request::get(i.to_string())).collect();
        assert!(matches!(
            oram.batch(&requests, 2),
            Err(OramError::BatchSizeExceeded {
                requested: 3,
                batch_size: 2
            })
        ));
        assert!(matches!(
            oram.batch(&[Request::put(DUMMY_KEY, "x")], 2),
            Err(OramError::ReservedKey)
        ));
        assert_eq!(oram.database().round_trips, 0);
    }

    #[test]
    fn failed_write_rolls_the_batch_back() {
        init_logger();
        let config = small_config(5, 4);
        let mut oram = test_oram(&config, FaultyDatabase::default(), 7);
        let puts: Vec<Request> = (0..20)
            .map(|i| Request::put(i.to_string(), format!("old{i}")))
            .collect();
        oram.load_requests(&puts, 10).unwrap();
        let before = oram.snapshot();

        oram.database_mut().fail_next_write = true;
        let updates: Vec<Request> = (0..10)
            .map(|i| Request::put(i.to_string(), format!("new{i}")))
            .chain([Request::put("fresh", "x")])
            .collect();
        assert!(oram.batch(&updates, 11).is_err());
        assert_eq!(oram.snapshot(), before);

        let gets: Vec<Request> = (0..20)
            .map(|i| Request::get(i.to_string()))
            .chain([Request::get("fresh")])
            .collect();
        let values = oram.batch(&gets, 21).unwrap();
        for (i, value) in values.iter().take(20).enumerate() {
            assert_eq!(*value, format!("old{i}"));
        }
        assert_eq!(values[20], NOT_FOUND);
        oram.test_hook();
    }

    #[test]
    fn failed_read_rolls_the_batch_back() {
        init_logger();
        let config = small_config(4, 4);
        let mut oram = test_oram(&config, FaultyDatabase::default(), 8);
        oram.batch(&[Request::put("a", "1")], 4).unwrap();
        let before = oram.snapshot();

        oram.database_mut().fail_next_read = true;
        assert!(oram
            .batch(&[Request::put("a", "2"), Request::put("b", "3")], 4)
            .is_err());
        assert_eq!(oram.snapshot(), before);
        assert_eq!(
            oram.batch(&[Request::get("a"), Request::get("b")], 4).unwrap(),
            ["1", NOT_FOUND]
        );
    }

    #[test]
    fn restore_from_snapshot() {
        init_logger();
        let config = small_config(5, 4);
        let mut oram = test_oram(&config, SimpleDatabase::default(), 9);
        let puts: Vec<Request> = (0..40)
            .map(|i| Request::put(format!("key{i}"), format!("value {i}")))
            .collect();
        oram.load_requests(&puts, 8).unwrap();

        let file = tempfile::NamedTempFile::new().unwrap();
        oram.snapshot().save(file.path()).unwrap();
        let database = oram.into_database();

        let mut reopened =
            PathOram::restore(&config, database, Snapshot::load(file.path()).unwrap()).unwrap();
        let gets: Vec<Request> = (0..40).map(|i| Request::get(format!("key{i}"))).collect();
        let values = reopened.batch(&gets, 40).unwrap();
        for (i, value) in values.iter().enumerate() {
            assert_eq!(*value, format!("value {i}"));
        }
        reopened.test_hook();
    }

    #[test]
    fn restore_rejects_leaves_outside_the_tree() {
        let config = small_config(3, 2);
        let mut snapshot = Snapshot::default();
        snapshot
            .position_map
            .remap("k", 8, &mut PositionJournal::default());
        assert!(matches!(
            PathOram::restore(&config, SimpleDatabase::default(), snapshot),
            Err(OramError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn reset_forgets_everything() {
        init_logger();
        // Three buckets of two slots: every path includes the root, which holds some of the keys.
        let config = small_config(1, 2);
        let mut oram = test_oram(&config, SimpleDatabase::default(), 10);
        let keys = ["0", "1", "2", "3"];
        let puts: Vec<Request> = keys.iter().map(|key| Request::put(*key, "old")).collect();
        oram.batch(&puts, 4).unwrap();
        assert!(!oram.tree_contents().unwrap().is_empty());

        oram.reset().unwrap();
        assert_eq!(oram.position_count(), 0);
        assert_eq!(oram.stash_occupancy(), 0);
        assert!(oram.tree_contents().unwrap().is_empty());

        let gets: Vec<Request> = keys.iter().map(|key| Request::get(*key)).collect();
        assert_eq!(oram.batch(&gets, 4).unwrap(), [NOT_FOUND; 4]);
        assert_eq!(oram.position_count(), 0);
        assert_eq!(oram.stash_occupancy(), 0);
        oram.test_hook();

        oram.batch(&[Request::put("0", "new")], 4).unwrap();
        assert_eq!(
            oram.batch(&[Request::get("0"), Request::get("1")], 4).unwrap(),
            ["new", NOT_FOUND]
        );
        oram.test_hook();

        oram.initialize_empty().unwrap();
        assert!(oram.tree_contents().unwrap().is_empty());
    }

    #[test]
    fn blocks_without_a_position_are_dropped_when_read() {
        init_logger();
        let config = small_config(1, 2);
        let mut oram = test_oram(&config, SimpleDatabase::default(), 12);
        let puts: Vec<Request> = ["a", "b", "c"]
            .into_iter()
            .map(|key| Request::put(key, "stale"))
            .collect();
        oram.batch(&puts, 3).unwrap();
        let database = oram.into_database();

        // Reopening with an empty snapshot leaves the old blocks in the tree without positions.
        let mut reopened = PathOram::restore_with_rng(
            &config,
            database,
            Snapshot::default(),
            StdRng::seed_from_u64(13),
        )
        .unwrap();
        let gets: Vec<Request> = ["a", "b", "c"].into_iter().map(Request::get).collect();
        for _ in 0..4 {
            assert_eq!(reopened.batch(&gets, 3).unwrap(), [NOT_FOUND; 3]);
            assert_eq!(reopened.stash_occupancy(), 0);
            assert_eq!(reopened.position_count(), 0);
        }
    }

    #[test]
    fn oversized_puts_are_rejected_before_any_access() {
        init_logger();
        let config = OramConfig {
            max_block_len: 32,
            ..small_config(3, 3)
        };
        let mut oram = test_oram(&config, CountAccessesDatabase::default(), 14);
        // {"Key":"k","Value":"..."} is 22 bytes plus the value.
        oram.batch(&[Request::put("k", "v".repeat(10))], 2).unwrap();
        let before = oram.snapshot();
        oram.database_mut().reset_counts();

        assert!(matches!(
            oram.batch(
                &[Request::get("k"), Request::put("big", "v".repeat(20))],
                2
            ),
            Err(OramError::BlockTooLarge {
                len: 44,
                max: 32,
                ..
            })
        ));
        assert_eq!(oram.database().round_trips, 0);
        assert_eq!(oram.snapshot(), before);
        assert_eq!(
            oram.batch(&[Request::get("k")], 2).unwrap(),
            ["v".repeat(10)]
        );
    }

    #[test]
    fn restore_rejects_oversized_stashed_blocks() {
        let config = OramConfig {
            max_block_len: 32,
            ..small_config(3, 2)
        };
        let mut snapshot = Snapshot::default();
        snapshot
            .position_map
            .remap("k", 1, &mut PositionJournal::default());
        snapshot.stash.insert(Block::new("k", "v".repeat(40)));
        assert!(matches!(
            PathOram::restore(&config, SimpleDatabase::default(), snapshot),
            Err(OramError::BlockTooLarge { .. })
        ));
    }

    #[test]
    fn every_stored_bucket_has_the_same_length() {
        init_logger();
        let config = small_config(4, 3);
        let mut oram = test_oram(&config, SimpleDatabase::default(), 15);
        let puts: Vec<Request> = (0..20)
            .map(|i| Request::put(format!("key{i}"), "x".repeat(i * 8)))
            .collect();
        oram.load_requests(&puts, 5).unwrap();
        assert!(!oram.tree_contents().unwrap().is_empty());

        let sealed_len = oram.storage_mut().codec().sealed_len();
        let keys: Vec<String> = (0..oram.tree().bucket_count())
            .map(crate::storage::bucket_key)
            .collect();
        let blobs = oram.database_mut().get_many(&keys).unwrap();
        assert!(blobs
            .into_iter()
            .all(|blob| blob.map(|blob| blob.len()) == Some(sealed_len)));
    }

    #[test]
    fn stash_cap_is_soft() {
        init_logger();
        let config = OramConfig {
            stash_size: 0,
            ..small_config(2, 2)
        };
        let mut oram = test_oram(&config, SimpleDatabase::default(), 11);
        // Any stashed block exceeds a cap of zero, which is logged but not an error.
        let puts: Vec<Request> = (0..8).map(|i| Request::put(i.to_string(), "v")).collect();
        oram.load_requests(&puts, 2).unwrap();
        let values = oram
            .batch(&(0..8).map(|i| Request::get(i.to_string())).collect::<Vec<_>>(), 8)
            .unwrap();
        assert!(values.iter().all(|value| value == "v"));
        oram.test_hook();
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = OramConfig {
            bucket_size: 1,
            ..OramConfig::default()
        };
        assert!(matches!(
            PathOram::new(&config, SimpleDatabase::default()),
            Err(OramError::InvalidConfiguration(_))
        ));
    }
}
