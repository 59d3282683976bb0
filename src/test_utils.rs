// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Common test utilities for the oblivious store.

use crate::{
    config::OramConfig,
    database::{Database, SimpleDatabase},
    path_oram::PathOram,
    BucketIndex, BucketSize, OramError, Request, TreeHeight, NOT_FOUND,
};
use rand::{rngs::StdRng, CryptoRng, Rng, RngCore, SeedableRng};
use simplelog::{Config, WriteLogger};
use std::collections::HashMap;
use std::sync::Once;

static INIT: Once = Once::new();

// For use in manual testing and inspection.
pub(crate) fn init_logger() {
    INIT.call_once(|| {
        WriteLogger::init(log::LevelFilter::Info, Config::default(), std::io::stdout()).unwrap()
    })
}

/// A configuration with a fixed key, so that a tree can be reopened.
pub(crate) fn small_config(log_capacity: TreeHeight, bucket_size: BucketSize) -> OramConfig {
    OramConfig {
        log_capacity,
        bucket_size,
        encryption_key: Some("2a".repeat(32)),
        ..OramConfig::default()
    }
}

/// A freshly initialized store whose leaves are drawn from a seeded generator.
pub(crate) fn test_oram<D: Database>(
    config: &OramConfig,
    database: D,
    seed: u64,
) -> PathOram<D, StdRng> {
    PathOram::with_rng(config, database, StdRng::seed_from_u64(seed)).unwrap()
}

pub(crate) trait Testable {
    fn test_hook(&mut self) {}
}

impl<D: Database, R: RngCore + CryptoRng> Testable for PathOram<D, R> {
    /// Checks the tree against the client-side state: every bucket decodes to exactly `Z` slots,
    /// and every key with a position is either stashed or stored exactly once in a bucket on the
    /// path to its leaf.
    fn test_hook(&mut self) {
        let tree = *self.tree();
        let contents = self.tree_contents().unwrap();

        let mut locations: HashMap<String, Vec<BucketIndex>> = HashMap::new();
        for (index, block) in &contents {
            locations.entry(block.key.clone()).or_default().push(*index);
        }

        let position_map = self.position_map();
        let stash = self.stash();
        for (key, leaf) in position_map.iter() {
            match locations.get(key) {
                None => assert!(stash.contains(key), "{key} is lost"),
                Some(buckets) => {
                    assert!(!stash.contains(key), "{key} is both stashed and stored");
                    assert_eq!(buckets.len(), 1, "{key} is stored more than once");
                    assert!(
                        tree.path(leaf).any(|bucket| bucket == buckets[0]),
                        "{key} is off the path to leaf {leaf}"
                    );
                }
            }
        }

        for key in locations.keys() {
            assert!(position_map.contains(key), "{key} is stored without a position");
        }
        for block in stash.blocks() {
            assert!(
                position_map.contains(&block.key),
                "{} is stashed without a position",
                block.key
            );
        }
    }
}

/// Tests a store on batches of random gets and puts over `key_count` keys, checking every answer
/// against a plain map.
pub(crate) fn test_random_batch_workload(
    log_capacity: TreeHeight,
    bucket_size: BucketSize,
    key_count: usize,
    batch_size: usize,
    batch_count: usize,
) {
    init_logger();
    let config = small_config(log_capacity, bucket_size);
    let mut rng = StdRng::seed_from_u64(0);
    let mut oram = test_oram(&config, SimpleDatabase::default(), 1);
    let mut mirror: HashMap<String, String> = HashMap::new();

    for _ in 0..batch_count {
        let len = rng.gen_range(1..=batch_size);
        let requests: Vec<Request> = (0..len)
            .map(|_| {
                let key = rng.gen_range(0..key_count).to_string();
                if rng.gen::<bool>() {
                    Request::put(key, format!("v{}", rng.gen::<u32>()))
                } else {
                    Request::get(key)
                }
            })
            .collect();

        let values = oram.batch(&requests, batch_size).unwrap();
        assert_eq!(values.len(), requests.len());
        for (request, value) in requests.iter().zip(&values) {
            if request.is_put() {
                mirror.insert(request.key.clone(), request.value.clone());
            }
            let expected = mirror.get(&request.key).map_or(NOT_FOUND, String::as_str);
            assert_eq!(value.as_str(), expected, "{}", request.key);
        }
    }

    oram.test_hook();
}

/// Tests a store on repeated passes over keys `0..key_count` in order, each access a random get
/// or put, followed by a final read of every key.
pub(crate) fn test_repeated_passes_workload(
    log_capacity: TreeHeight,
    bucket_size: BucketSize,
    key_count: usize,
    batch_size: usize,
    passes: usize,
) {
    init_logger();
    let config = small_config(log_capacity, bucket_size);
    let mut rng = StdRng::seed_from_u64(0);
    let mut oram = test_oram(&config, SimpleDatabase::default(), 1);
    let mut mirror = vec![NOT_FOUND.to_string(); key_count];

    let keys: Vec<usize> = (0..key_count).collect();
    for _ in 0..passes {
        for chunk in keys.chunks(batch_size) {
            let requests: Vec<Request> = chunk
                .iter()
                .map(|key| {
                    if rng.gen::<bool>() {
                        Request::put(key.to_string(), format!("v{}", rng.gen::<u16>()))
                    } else {
                        Request::get(key.to_string())
                    }
                })
                .collect();
            let values = oram.batch(&requests, batch_size).unwrap();
            for ((key, request), value) in chunk.iter().zip(&requests).zip(values) {
                if request.is_put() {
                    mirror[*key] = request.value.clone();
                }
                assert_eq!(value, mirror[*key], "{key}");
            }
        }
    }

    for chunk in keys.chunks(batch_size) {
        let requests: Vec<Request> = chunk.iter().map(|key| Request::get(key.to_string())).collect();
        let values = oram.batch(&requests, batch_size).unwrap();
        for (key, value) in chunk.iter().zip(values) {
            assert_eq!(value, mirror[*key], "{key}");
        }
    }

    oram.test_hook();
}

macro_rules! create_batch_correctness_tests {
    ($function_name:ident, $log_capacity:expr, $bucket_size:expr, $key_count:expr, $batch_size:expr, $iterations_to_test:expr) => {
        paste::paste! {
            #[test]
            fn [<$function_name _ $log_capacity _ $bucket_size _ $key_count _ $batch_size _ $iterations_to_test>]() {
                $function_name($log_capacity, $bucket_size, $key_count, $batch_size, $iterations_to_test);
            }
        }
    };
}

pub(crate) use create_batch_correctness_tests;

/// An in-memory database that fails the next bulk read or write on request, without applying it.
#[derive(Debug, Default)]
pub(crate) struct FaultyDatabase {
    data: SimpleDatabase,
    pub(crate) fail_next_read: bool,
    pub(crate) fail_next_write: bool,
}

fn injected_failure(operation: &str) -> OramError {
    OramError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("injected {operation} failure"),
    ))
}

impl Database for FaultyDatabase {
    fn get_many(&mut self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, OramError> {
        if std::mem::take(&mut self.fail_next_read) {
            return Err(injected_failure("read"));
        }
        self.data.get_many(keys)
    }

    fn set_many(&mut self, entries: Vec<(String, Vec<u8>)>) -> Result<(), OramError> {
        if std::mem::take(&mut self.fail_next_write) {
            return Err(injected_failure("write"));
        }
        self.data.set_many(entries)
    }

    fn flush_all(&mut self) -> Result<(), OramError> {
        self.data.flush_all()
    }
}
