// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Serializes access to a store shared by many asynchronous clients.
//!
//! A [`PathOram`] is moved onto a dedicated blocking task that owns it exclusively and serves
//! commands one at a time from a channel. Clients hold cloneable [`OramHandle`]s.

use crate::{database::Database, path_oram::PathOram, snapshot::Snapshot, OramError, Request};
use rand::{CryptoRng, RngCore};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

/// The number of commands that may wait for the engine before senders are held back.
pub const COMMAND_QUEUE_DEPTH: usize = 64;

enum Command {
    Batch {
        requests: Vec<Request>,
        reply: oneshot::Sender<Result<Vec<String>, OramError>>,
    },
    InitializeEmpty {
        reply: oneshot::Sender<Result<(), OramError>>,
    },
    Reset {
        reply: oneshot::Sender<Result<(), OramError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    Close {
        reply: oneshot::Sender<Result<(), OramError>>,
    },
}

/// A cloneable client of a store owned by a dispatcher task.
#[derive(Clone, Debug)]
pub struct OramHandle {
    commands: mpsc::Sender<Command>,
    batch_size: usize,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Batch { requests, .. } => write!(f, "Batch({} requests)", requests.len()),
            Command::InitializeEmpty { .. } => write!(f, "InitializeEmpty"),
            Command::Reset { .. } => write!(f, "Reset"),
            Command::Snapshot { .. } => write!(f, "Snapshot"),
            Command::Close { .. } => write!(f, "Close"),
        }
    }
}

/// Moves `oram` onto a blocking task that serves batches of at most `batch_size` requests.
///
/// Must be called from within a tokio runtime. The returned join handle yields the store back
/// once every handle has been dropped or [`OramHandle::close`] has been called.
///
/// # Errors
///
/// Returns an `InvalidConfiguration` error, without spawning anything, if `batch_size` is 0.
#[allow(clippy::type_complexity)]
pub fn spawn<D, R>(
    oram: PathOram<D, R>,
    batch_size: usize,
) -> Result<(OramHandle, JoinHandle<PathOram<D, R>>), OramError>
where
    D: Database + Send + 'static,
    R: RngCore + CryptoRng + Send + 'static,
{
    if batch_size == 0 {
        return Err(OramError::InvalidConfiguration(
            "batch_size must be positive".to_string(),
        ));
    }

    let (commands, receiver) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let task = tokio::task::spawn_blocking(move || serve(oram, receiver, batch_size));
    Ok((
        OramHandle {
            commands,
            batch_size,
        },
        task,
    ))
}

fn serve<D: Database, R: RngCore + CryptoRng>(
    mut oram: PathOram<D, R>,
    mut commands: mpsc::Receiver<Command>,
    batch_size: usize,
) -> PathOram<D, R> {
    log::info!("Dispatcher started with batch size {}", batch_size);

    // A dropped reply only means the client stopped waiting.
    while let Some(command) = commands.blocking_recv() {
        log::debug!("Dispatching {:?}", command);
        match command {
            Command::Batch { requests, reply } => {
                let _ = reply.send(oram.batch(&requests, batch_size));
            }
            Command::InitializeEmpty { reply } => {
                let _ = reply.send(oram.initialize_empty());
            }
            Command::Reset { reply } => {
                let _ = reply.send(oram.reset());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(oram.snapshot());
            }
            Command::Close { reply } => {
                let _ = reply.send(oram.close());
                break;
            }
        }
    }

    log::info!("Dispatcher stopped");
    oram
}

impl OramHandle {
    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, OramError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| OramError::EngineUnavailable)?;
        response.await.map_err(|_| OramError::EngineUnavailable)
    }

    /// The batch size the dispatcher was started with.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Serves a single batch of at most [`OramHandle::batch_size`] requests.
    pub async fn batch(&self, requests: Vec<Request>) -> Result<Vec<String>, OramError> {
        self.call(|reply| Command::Batch { requests, reply }).await?
    }

    /// Serves any number of requests, split into consecutive batches. Batches of other clients
    /// may run in between.
    pub async fn execute(&self, requests: Vec<Request>) -> Result<Vec<String>, OramError> {
        let mut values = Vec::with_capacity(requests.len());
        for chunk in requests.chunks(self.batch_size) {
            values.extend(self.batch(chunk.to_vec()).await?);
        }
        Ok(values)
    }

    /// See [`PathOram::initialize_empty`].
    pub async fn initialize_empty(&self) -> Result<(), OramError> {
        self.call(|reply| Command::InitializeEmpty { reply }).await?
    }

    /// See [`PathOram::reset`].
    pub async fn reset(&self) -> Result<(), OramError> {
        self.call(|reply| Command::Reset { reply }).await?
    }

    /// See [`PathOram::snapshot`].
    pub async fn snapshot(&self) -> Result<Snapshot, OramError> {
        self.call(|reply| Command::Snapshot { reply }).await
    }

    /// Closes the backend and stops the dispatcher. Every handle fails afterwards.
    pub async fn close(&self) -> Result<(), OramError> {
        self.call(|reply| Command::Close { reply }).await?
    }
}
