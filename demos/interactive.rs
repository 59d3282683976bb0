// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! An interactive shell over the oblivious store.
//!
//! Usage: `interactive [config.json]`. The store runs against redis when the configuration names a
//! `backend_url`, and in memory otherwise.

use oram_kv::database::{Database, SimpleDatabase};
use oram_kv::redis_database::RedisDatabase;
use oram_kv::snapshot::Snapshot;
use oram_kv::{trace, OramConfig, PathOram, Request};
use rustyline::history::FileHistory;
use rustyline::Editor;

const HELP: &str = "Commands:
  GET <key>          read a key
  SET <key> <value>  write a key
  LOAD <trace>       load the SET lines of a trace file
  SAVE <path>        save the position map and stash
  DUMP               list the real blocks in the tree
  STATS              show stash and position map sizes
  RESET              forget every key and clear the tree
  QUIT";

fn run<D: Database>(
    mut oram: PathOram<D>,
    config: &OramConfig,
    rl: &mut Editor<(), FileHistory>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{HELP}");
    loop {
        let line: String = rl.readline("> ")?;
        let mut parts = line.trim().splitn(3, ' ');
        let command = parts.next().unwrap_or_default().to_uppercase();
        let result = match (command.as_str(), parts.next(), parts.next()) {
            ("GET", Some(key), None) => oram
                .batch(&[Request::get(key)], config.batch_size)
                .map(|values| println!("{} = {}", key, values[0])),
            ("SET", Some(key), Some(value)) => oram
                .batch(&[Request::put(key, value)], config.batch_size)
                .map(|_| println!("Wrote {}.", key)),
            ("LOAD", Some(path), None) => trace::read_trace(path).and_then(|requests| {
                oram.load_requests(&requests, config.batch_size)
                    .map(|batches| println!("Loaded {} puts in {} batches.", requests.len(), batches))
            }),
            ("SAVE", Some(path), None) => oram.snapshot().save(path),
            ("DUMP", None, None) => oram.tree_contents().map(|contents| {
                for (bucket, block) in contents {
                    println!("bucket {bucket}: {} = {}", block.key, block.value);
                }
            }),
            ("STATS", None, None) => {
                println!(
                    "{} keys, {} stashed blocks",
                    oram.position_count(),
                    oram.stash_occupancy()
                );
                Ok(())
            }
            ("RESET", None, None) => oram.reset(),
            ("QUIT", None, None) => break,
            _ => {
                println!("{HELP}");
                Ok(())
            }
        };

        if let Err(error) = result {
            println!("Error: {error}");
        }
    }

    let snapshot: Snapshot = oram.snapshot();
    println!(
        "Leaving {} keys behind, {} of them stashed.",
        snapshot.position_map.len(),
        snapshot.stash.occupancy()
    );
    oram.close()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => OramConfig::from_json_file(path)?,
        None => OramConfig::default(),
    };

    let mut rl = Editor::<(), _>::new()?;

    match &config.backend_url {
        Some(url) => run(PathOram::new(&config, RedisDatabase::connect(url)?)?, &config, &mut rl),
        None => run(PathOram::new(&config, SimpleDatabase::default())?, &config, &mut rl),
    }
}
