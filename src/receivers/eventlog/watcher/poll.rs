// SPDX-License-Identifier: Apache-2.0

//! Directory-scanning watcher for file systems without usable notifications
//! (NFS and other network mounts).

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tracing::debug;

use super::traits::{FileEvent, FileWatcher, WatcherError};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Snapshot {
    modified: SystemTime,
    size: u64,
    #[cfg(unix)]
    ino: u64,
}

impl Snapshot {
    fn from_metadata(metadata: &fs::Metadata) -> Option<Self> {
        #[cfg(unix)]
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            modified: metadata.modified().ok()?,
            size: metadata.len(),
            #[cfg(unix)]
            ino: metadata.ino(),
        })
    }
}

pub struct PollWatcher {
    dirs: Vec<PathBuf>,
    known: HashMap<PathBuf, Snapshot>,
    interval: Duration,
    last_scan: Instant,
    pending: Vec<FileEvent>,
}

impl PollWatcher {
    pub fn new(interval: Duration) -> Self {
        Self {
            dirs: Vec::new(),
            known: HashMap::new(),
            interval,
            last_scan: Instant::now(),
            pending: Vec::new(),
        }
    }

    fn scan(&mut self) {
        let mut seen = HashSet::with_capacity(self.known.len());
        let mut events = Vec::new();

        for dir in &self.dirs {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(dir = ?dir, error = %e, "Poll scan failed");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let snapshot = match entry.metadata() {
                    Ok(m) if m.is_file() => match Snapshot::from_metadata(&m) {
                        Some(s) => s,
                        None => continue,
                    },
                    _ => continue,
                };
                let path = entry.path();
                seen.insert(path.clone());

                match self.known.entry(path) {
                    Entry::Vacant(v) => {
                        events.push(FileEvent::create(v.key().clone()));
                        v.insert(snapshot);
                    }
                    Entry::Occupied(mut o) => {
                        if *o.get() != snapshot {
                            events.push(FileEvent::modify(o.key().clone()));
                            o.insert(snapshot);
                        }
                    }
                }
            }
        }

        self.known.retain(|path, _| {
            let keep = seen.contains(path);
            if !keep {
                events.push(FileEvent::remove(path.clone()));
            }
            keep
        });

        self.pending.extend(events);
        self.last_scan = Instant::now();
    }
}

impl FileWatcher for PollWatcher {
    fn watch(&mut self, dir: &Path) -> Result<(), WatcherError> {
        if !fs::metadata(dir)?.is_dir() {
            return Err(WatcherError::Watch(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        if !self.dirs.iter().any(|d| d == dir) {
            self.dirs.push(dir.to_path_buf());
        }
        // baseline so existing files are not reported as created
        self.scan();
        self.pending.clear();
        Ok(())
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<FileEvent>, WatcherError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.last_scan.elapsed() >= self.interval {
                self.scan();
            }
            if !self.pending.is_empty() {
                return Ok(std::mem::take(&mut self.pending));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let next_scan = self.interval.saturating_sub(self.last_scan.elapsed());
            let sleep = next_scan.min(deadline - now);
            if !sleep.is_zero() {
                std::thread::sleep(sleep);
            }
        }
    }

    fn is_native(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "poll"
    }
}

#[cfg(test)]
mod tests {
    use super::super::traits::FileEventKind;
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    const TICK: Duration = Duration::from_millis(10);

    #[test]
    fn test_existing_files_are_baseline() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("EventLog"), "x").unwrap();

        let mut watcher = PollWatcher::new(TICK);
        watcher.watch(dir.path()).unwrap();
        assert!(watcher.recv_timeout(TICK * 3).unwrap().is_empty());
    }

    #[test]
    fn test_detects_growth() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("EventLog");
        fs::write(&path, "x\n").unwrap();

        let mut watcher = PollWatcher::new(TICK);
        watcher.watch(dir.path()).unwrap();

        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"more\n").unwrap();

        let events = watcher.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(
            events
                .iter()
                .any(|e| e.kind == FileEventKind::Modify && e.concerns(&path))
        );
    }

    #[test]
    fn test_detects_rotation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("EventLog");
        fs::write(&path, "x\n").unwrap();

        let mut watcher = PollWatcher::new(TICK);
        watcher.watch(dir.path()).unwrap();

        fs::rename(&path, dir.path().join("EventLog.1")).unwrap();
        fs::write(&path, "").unwrap();

        let events = watcher.recv_timeout(Duration::from_secs(1)).unwrap();
        let rotated = dir.path().join("EventLog.1");
        assert!(events.iter().any(|e| e.kind == FileEventKind::Create && e.concerns(&rotated)));
        assert!(events.iter().any(|e| e.concerns(&path)));
    }

    #[test]
    fn test_detects_removal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("EventLog");
        fs::write(&path, "x").unwrap();

        let mut watcher = PollWatcher::new(TICK);
        watcher.watch(dir.path()).unwrap();
        fs::remove_file(&path).unwrap();

        let events = watcher.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(events.iter().any(|e| e.kind == FileEventKind::Remove));
    }

    #[test]
    fn test_rejects_non_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("EventLog");
        fs::write(&path, "x").unwrap();

        let mut watcher = PollWatcher::new(TICK);
        assert!(matches!(watcher.watch(&path), Err(WatcherError::Watch(_))));
        assert!(matches!(
            watcher.watch(&dir.path().join("missing")),
            Err(WatcherError::Io(_))
        ));
    }
}
