// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("watcher initialization failed: {0}")]
    Init(String),

    #[error("watch failed: {0}")]
    Watch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watcher channel closed")]
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Create,
    Modify,
    Remove,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub paths: Vec<PathBuf>,
}

impl FileEvent {
    pub fn new(kind: FileEventKind, paths: Vec<PathBuf>) -> Self {
        Self { kind, paths }
    }

    pub fn create(path: PathBuf) -> Self {
        Self::new(FileEventKind::Create, vec![path])
    }

    pub fn modify(path: PathBuf) -> Self {
        Self::new(FileEventKind::Modify, vec![path])
    }

    pub fn remove(path: PathBuf) -> Self {
        Self::new(FileEventKind::Remove, vec![path])
    }

    /// True if any affected path has the same file name as `path`.
    pub fn concerns(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        self.paths.iter().any(|p| p.file_name() == Some(name))
    }
}

/// Source of change notifications for the live log's directory.
///
/// Implementations are blocking; the live tail runs on a dedicated thread.
pub trait FileWatcher {
    /// Start watching a directory (non-recursive).
    fn watch(&mut self, dir: &Path) -> Result<(), WatcherError>;

    /// Block until at least one event is available or `timeout` elapses.
    /// An empty vector means the timeout expired.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<FileEvent>, WatcherError>;

    fn is_native(&self) -> bool;

    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concerns_matches_by_file_name() {
        let ev = FileEvent::modify(PathBuf::from("/var/log/condor/EventLog"));
        assert!(ev.concerns(Path::new("/var/log/condor/EventLog")));
        // notify may report canonicalized paths
        assert!(ev.concerns(Path::new("/private/var/log/condor/EventLog")));
        assert!(!ev.concerns(Path::new("/var/log/condor/EventLog.1")));
    }
}
