// SPDX-License-Identifier: Apache-2.0

//! Event log receiver.
//!
//! Follows a rotating scheduler event log, splits it into multi-line events
//! and sends them down the pipeline, interleaved with checkpoints that record
//! how far the live log has been read.
//!
//! Features:
//! - Backlog replay of rotated files newer than the last checkpoint
//! - Inode-based detection of rotation and truncation
//! - Atomic checkpoint persistence for resume after restarts

pub mod config;
pub mod error;
pub mod event;
pub mod input;
pub mod persistence;
pub mod receiver;
pub mod recovery;
pub mod segmenter;
pub mod watcher;

pub use config::EventLogConfig;
pub use error::{CheckpointError, Error, Result};
pub use event::PublishableEvent;
pub use input::{FileId, FileReader, LogFile, LogSet};
pub use persistence::{Checkpoint, CheckpointStore, JsonFileCheckpointStore, MemoryCheckpointStore};
pub use receiver::{EventLogReceiver, ForwardStats};
pub use recovery::{PipelineMessage, RecoveryCoordinator, RecoveryState};
pub use segmenter::{Segmenter, SegmenterState};
pub use watcher::{FileWatcher, WatchMode};
