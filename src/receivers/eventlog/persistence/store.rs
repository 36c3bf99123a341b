// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex};

use crate::receivers::eventlog::error::CheckpointError;
use crate::receivers::eventlog::persistence::schema::{self, Checkpoint};

/// Holds the single recovery checkpoint. A write replaces the previous value
/// only once the new one is complete.
pub trait CheckpointStore: Send + Sync {
    fn read(&self) -> Result<Checkpoint, CheckpointError>;

    fn write(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    fn exists(&self) -> bool;
}

impl<S: CheckpointStore + ?Sized> CheckpointStore for Arc<S> {
    fn read(&self) -> Result<Checkpoint, CheckpointError> {
        (**self).read()
    }

    fn write(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        (**self).write(checkpoint)
    }

    fn exists(&self) -> bool {
        (**self).exists()
    }
}

/// In-memory store holding the encoded checkpoint bytes. Clones share state,
/// so a caller can keep a handle and inspect what the pipeline wrote.
#[derive(Clone, Default)]
pub struct MemoryCheckpointStore {
    data: Arc<Mutex<Option<Vec<u8>>>>,
    writes: Arc<Mutex<usize>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with raw content, valid or not.
    pub fn with_contents(contents: impl Into<Vec<u8>>) -> Self {
        let store = Self::default();
        if let Ok(mut data) = store.data.lock() {
            *data = Some(contents.into());
        }
        store
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|n| *n).unwrap_or(0)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn read(&self) -> Result<Checkpoint, CheckpointError> {
        let data = self
            .data
            .lock()
            .map_err(|e| CheckpointError::Unreadable(std::io::Error::other(e.to_string())))?;
        match data.as_deref() {
            None => Err(CheckpointError::Missing("<memory>".into())),
            Some(bytes) => schema::decode(bytes),
        }
    }

    fn write(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let encoded = schema::encode(checkpoint)?;
        let mut data = self
            .data
            .lock()
            .map_err(|e| CheckpointError::Write(e.to_string()))?;
        *data = Some(encoded);
        if let Ok(mut n) = self.writes.lock() {
            *n += 1;
        }
        Ok(())
    }

    fn exists(&self) -> bool {
        self.data.lock().map(|d| d.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_memory_store_lifecycle() {
        let store = MemoryCheckpointStore::new();
        assert!(!store.exists());
        assert!(matches!(store.read(), Err(CheckpointError::Missing(_))));

        let first = Checkpoint::now(10, 5, SystemTime::UNIX_EPOCH + Duration::from_secs(60));
        store.write(&first).unwrap();
        assert!(store.exists());
        assert_eq!(store.read().unwrap().position, 10);

        let second = Checkpoint::now(20, 6, SystemTime::now());
        store.write(&second).unwrap();
        let read = store.read().unwrap();
        assert_eq!(read.position, 20);
        assert_eq!(read.inode, 6);
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn test_memory_store_clones_share_state() {
        let store = MemoryCheckpointStore::new();
        let handle = store.clone();
        store
            .write(&Checkpoint::now(1, 2, SystemTime::now()))
            .unwrap();
        assert!(handle.exists());
        assert_eq!(handle.read().unwrap().inode, 2);
    }

    #[test]
    fn test_memory_store_surfaces_corrupt_content() {
        let store = MemoryCheckpointStore::with_contents("][");
        assert!(store.exists());
        assert!(matches!(store.read(), Err(CheckpointError::Corrupt(_))));
    }
}
