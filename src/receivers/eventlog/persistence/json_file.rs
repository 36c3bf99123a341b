// SPDX-License-Identifier: Apache-2.0

//! Checkpoint store backed by a single JSON file.
//!
//! Writes go to a uniquely named sibling first and are renamed into place, so
//! a crash mid-write leaves the previous checkpoint intact.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::receivers::eventlog::error::CheckpointError;
use crate::receivers::eventlog::persistence::schema::{self, Checkpoint};
use crate::receivers::eventlog::persistence::store::CheckpointStore;

#[derive(Debug, Clone)]
pub struct JsonFileCheckpointStore {
    path: PathBuf,
}

impl JsonFileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for JsonFileCheckpointStore {
    fn read(&self) -> Result<Checkpoint, CheckpointError> {
        let data = fs::read(&self.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => CheckpointError::Missing(self.path.clone()),
            _ => CheckpointError::Unreadable(e),
        })?;
        schema::decode(&data)
    }

    fn write(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let encoded = schema::encode(checkpoint)?;
        atomic_write(&self.path, &encoded)?;
        debug!(
            path = ?self.path,
            position = checkpoint.position,
            inode = checkpoint.inode,
            "Checkpoint written"
        );
        Ok(())
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), CheckpointError> {
    use portable_atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                CheckpointError::Write(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
    }

    // pid + counter keeps concurrent writers off each other's temp files
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let result = (|| -> std::io::Result<()> {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(contents)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        fs::rename(&temp_path, path)
    })();

    result.map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        CheckpointError::Write(format!("failed to replace {}: {}", path.display(), e))
    })
}
