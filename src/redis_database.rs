// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A [`Database`] backed by a redis server.

use crate::{database::Database, OramError};
use redis::{Client, Connection, ErrorKind, RedisError};

/// A redis-backed database using `MGET` / `MSET` for bulk access.
///
/// `MSET` is atomic, so a failed bulk write never leaves the tree half-updated.
pub struct RedisDatabase {
    connection: Option<Connection>,
    url: String,
}

impl RedisDatabase {
    /// Connects to the redis server at `url` (e.g. `redis://127.0.0.1:6379`) and checks that
    /// it answers `PING`.
    pub fn connect(url: &str) -> Result<Self, OramError> {
        let client = Client::open(url)?;
        let mut connection = client.get_connection()?;
        let _: String = redis::cmd("PING").query(&mut connection)?;
        log::info!("Connected to redis at {}", url);

        Ok(Self {
            connection: Some(connection),
            url: url.to_string(),
        })
    }

    fn connection(&mut self) -> Result<&mut Connection, OramError> {
        self.connection.as_mut().ok_or_else(|| {
            OramError::Redis(RedisError::from((
                ErrorKind::IoError,
                "connection already closed",
            )))
        })
    }
}

impl std::fmt::Debug for RedisDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDatabase")
            .field("url", &self.url)
            .field("open", &self.connection.is_some())
            .finish()
    }
}

impl Database for RedisDatabase {
    fn get_many(&mut self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, OramError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values = redis::cmd("MGET").arg(keys).query(self.connection()?)?;
        Ok(values)
    }

    fn set_many(&mut self, entries: Vec<(String, Vec<u8>)>) -> Result<(), OramError> {
        if entries.is_empty() {
            return Ok(());
        }
        redis::cmd("MSET")
            .arg(&entries)
            .query::<()>(self.connection()?)?;
        Ok(())
    }

    fn flush_all(&mut self) -> Result<(), OramError> {
        log::info!("Flushing redis database at {}", self.url);
        redis::cmd("FLUSHDB").query::<()>(self.connection()?)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), OramError> {
        if self.connection.take().is_some() {
            log::info!("Closed redis connection to {}", self.url);
        }
        Ok(())
    }
}
