// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A very simple demonstration of the use of the oblivious store.

extern crate oram_kv;

use oram_kv::database::SimpleDatabase;
use oram_kv::{OramConfig, OramError, PathOram, Request};

fn main() -> Result<(), OramError> {
    let config = OramConfig::default();
    let mut oram = PathOram::new(&config, SimpleDatabase::default())?;

    oram.batch(
        &[Request::put("alice", "42"), Request::put("bob", "7")],
        config.batch_size,
    )?;
    let values = oram.batch(
        &[Request::get("alice"), Request::get("bob"), Request::get("carol")],
        config.batch_size,
    )?;
    println!("{:?}", values);
    Ok(())
}
