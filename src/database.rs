// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Backend abstractions for the oblivious store.

use crate::OramError;
use std::collections::HashMap;

/// A key-value backend supporting bulk reads and writes of opaque blobs.
///
/// The backend is untrusted: it sees only bucket names and ciphertexts.
pub trait Database {
    /// Reads the values stored under `keys` in one round trip. Missing keys yield `None`.
    fn get_many(&mut self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, OramError>;

    /// Writes all `entries` in one round trip.
    ///
    /// Implementations must apply either all of the entries or none of them.
    fn set_many(&mut self, entries: Vec<(String, Vec<u8>)>) -> Result<(), OramError>;

    /// Removes every entry.
    fn flush_all(&mut self) -> Result<(), OramError>;

    /// Releases the connection to the backend.
    fn close(&mut self) -> Result<(), OramError> {
        Ok(())
    }
}

/// A simple Database that keeps its data in a `HashMap`.
#[derive(Debug, Default)]
pub struct SimpleDatabase(HashMap<String, Vec<u8>>);

impl SimpleDatabase {
    /// The number of stored entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the database is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Database for SimpleDatabase {
    fn get_many(&mut self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, OramError> {
        Ok(keys.iter().map(|key| self.0.get(key).cloned()).collect())
    }

    fn set_many(&mut self, entries: Vec<(String, Vec<u8>)>) -> Result<(), OramError> {
        self.0.extend(entries);
        Ok(())
    }

    fn flush_all(&mut self) -> Result<(), OramError> {
        self.0.clear();
        Ok(())
    }
}

/// A Database that counts reads, writes and round trips.
#[derive(Debug, Default)]
pub struct CountAccessesDatabase {
    data: SimpleDatabase,
    /// `reads[k]` tracks the total number of reads made to key `k`.
    pub reads: HashMap<String, u64>,
    /// `writes[k]` tracks the total number of writes made to key `k`.
    pub writes: HashMap<String, u64>,
    /// The number of `get_many` and `set_many` calls.
    pub round_trips: u64,
}

impl CountAccessesDatabase {
    /// Returns the total number of reads to the database.
    pub fn get_read_count(&self) -> u64 {
        self.reads.values().sum()
    }

    /// Returns the total number of writes to the database.
    pub fn get_write_count(&self) -> u64 {
        self.writes.values().sum()
    }

    /// Forgets all counts, e.g. to exclude the writes made while initializing the tree.
    pub fn reset_counts(&mut self) {
        self.reads.clear();
        self.writes.clear();
        self.round_trips = 0;
    }

    /// The underlying data.
    pub fn data(&self) -> &SimpleDatabase {
        &self.data
    }
}

impl Database for CountAccessesDatabase {
    fn get_many(&mut self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, OramError> {
        log::debug!("Physical read -- {} keys", keys.len());

        self.round_trips += 1;
        for key in keys {
            *self.reads.entry(key.clone()).or_default() += 1;
        }
        self.data.get_many(keys)
    }

    fn set_many(&mut self, entries: Vec<(String, Vec<u8>)>) -> Result<(), OramError> {
        log::debug!("Physical write -- {} keys", entries.len());

        self.round_trips += 1;
        for (key, _) in &entries {
            *self.writes.entry(key.clone()).or_default() += 1;
        }
        self.data.set_many(entries)
    }

    fn flush_all(&mut self) -> Result<(), OramError> {
        self.data.flush_all()
    }
}
