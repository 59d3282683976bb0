// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Loads a trace into the oblivious store, then reads it back from several concurrent clients.
//!
//! Usage: `trace_replay <trace> [config.json]`. When `ORAM_PASSPHRASE` is set, the encryption key
//! is derived from it. The store runs against redis when the configuration names a
//! `backend_url`, and in memory otherwise.

use oram_kv::crypto::EncryptionKey;
use oram_kv::database::{Database, SimpleDatabase};
use oram_kv::dispatcher::{self, OramHandle};
use oram_kv::redis_database::RedisDatabase;
use oram_kv::{trace, OramConfig, PathOram, Request};
use simplelog::{Config, LevelFilter, SimpleLogger};
use std::time::Instant;

const CLIENTS: usize = 4;

async fn replay(
    handle: OramHandle,
    requests: Vec<Request>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();
    handle.execute(requests.clone()).await?;
    println!(
        "Loaded {} puts in {:?}",
        requests.len(),
        start.elapsed()
    );

    let start = Instant::now();
    let mut clients = Vec::new();
    for shard in requests.chunks(requests.len().div_ceil(CLIENTS).max(1)) {
        let handle = handle.clone();
        let shard = shard.to_vec();
        clients.push(tokio::spawn(async move {
            let gets = shard.iter().map(|request| Request::get(request.key.clone())).collect();
            let values = handle.execute(gets).await?;
            // Later puts of the same key may overwrite earlier ones.
            let mismatches = shard
                .iter()
                .zip(values)
                .filter(|(request, value)| request.value != *value)
                .count();
            Ok::<usize, oram_kv::OramError>(mismatches)
        }));
    }

    let mut mismatches = 0;
    for client in clients {
        mismatches += client.await??;
    }
    println!(
        "Read back {} keys from {} clients in {:?} ({} overwritten)",
        requests.len(),
        CLIENTS,
        start.elapsed(),
        mismatches
    );

    let snapshot = handle.snapshot().await?;
    println!(
        "{} keys, {} stashed blocks",
        snapshot.position_map.len(),
        snapshot.stash.occupancy()
    );
    handle.close().await?;
    Ok(())
}

async fn run<D: Database + Send + 'static>(
    oram: PathOram<D>,
    config: &OramConfig,
    requests: Vec<Request>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (handle, task) = dispatcher::spawn(oram, config.batch_size)?;
    replay(handle, requests).await?;
    task.await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    SimpleLogger::init(LevelFilter::Info, Config::default())?;

    let mut args = std::env::args().skip(1);
    let trace_path = args.next().ok_or("usage: trace_replay <trace> [config.json]")?;
    let mut config = match args.next() {
        Some(path) => OramConfig::from_json_file(path)?,
        None => OramConfig::default(),
    };
    if let Ok(passphrase) = std::env::var("ORAM_PASSPHRASE") {
        let key = EncryptionKey::derive_from_passphrase(&passphrase);
        config.encryption_key = Some(hex::encode(key.as_bytes()));
    }

    let requests = trace::read_trace(&trace_path)?;
    match config.backend_url.clone() {
        Some(url) => {
            let oram = PathOram::new(&config, RedisDatabase::connect(&url)?)?;
            run(oram, &config, requests).await
        }
        None => run(PathOram::new(&config, SimpleDatabase::default())?, &config, requests).await,
    }
}
