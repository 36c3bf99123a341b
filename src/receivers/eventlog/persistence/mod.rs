// SPDX-License-Identifier: Apache-2.0

//! Checkpoint ("tombstone") persistence.

mod json_file;
mod schema;
mod store;

pub use json_file::JsonFileCheckpointStore;
pub use schema::{Checkpoint, decode, encode};
pub use store::{CheckpointStore, MemoryCheckpointStore};
