// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Loading datasets from trace files.
//!
//! A trace holds one command per line. Lines of the form `SET <key> <value>` become puts; the
//! value is the rest of the line and may contain spaces. All other lines are ignored.

use crate::{OramError, Request};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

/// Parses the `SET` lines of a trace.
pub fn parse_trace<B: BufRead>(reader: B) -> Result<Vec<Request>, OramError> {
    let mut requests = Vec::new();
    let mut skipped = 0usize;

    for line in reader.lines() {
        let line = line?;
        if !line.starts_with("SET") {
            continue;
        }
        let mut parts = line.splitn(3, ' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("SET"), Some(key), Some(value)) if !key.is_empty() && !value.is_empty() => {
                requests.push(Request::put(key, value));
            }
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        log::warn!("Skipped {} malformed SET lines", skipped);
    }
    Ok(requests)
}

/// Reads the `SET` lines of the trace file at `path`.
pub fn read_trace<P: AsRef<Path>>(path: P) -> Result<Vec<Request>, OramError> {
    let requests = parse_trace(BufReader::new(File::open(path.as_ref())?))?;
    log::info!(
        "Read {} puts from trace {}",
        requests.len(),
        path.as_ref().display()
    );
    Ok(requests)
}
