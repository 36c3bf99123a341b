// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

use crate::receivers::eventlog::watcher::WatcherError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid event pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("Watcher error: {0}")]
    Watcher(#[from] WatcherError),

    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Pipeline channel closed")]
    ChannelSend,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a checkpoint could not be loaded. Every variant is treated by the
/// recovery path as "no prior state".
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("no checkpoint at {0}")]
    Missing(PathBuf),

    #[error("checkpoint unreadable: {0}")]
    Unreadable(#[source] std::io::Error),

    #[error("checkpoint content is corrupt: {0}")]
    Corrupt(String),

    #[error("checkpoint field {field} has a bad timestamp {value:?}: {source}")]
    Timestamp {
        field: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("failed to persist checkpoint: {0}")]
    Write(String),
}
