// SPDX-License-Identifier: Apache-2.0

//! Follows the live log across growth, rotation and truncation.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::receivers::eventlog::error::{Error, Result};
use crate::receivers::eventlog::input::file_id::FileId;
use crate::receivers::eventlog::input::reader::FileReader;
use crate::receivers::eventlog::persistence::Checkpoint;
use crate::receivers::eventlog::watcher::BoxedWatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    /// The live file appeared after being absent.
    Appeared,
    /// The path now names a different file; the old one was read to the end.
    Rotated,
    /// The file shrank below the read position.
    Truncated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    Line(String),
    /// Reading restarted at offset 0 of the current file. Any partially
    /// segmented event from before belongs to a different stream.
    Switched(SwitchReason),
    /// Caught up; nothing new arrived within one wait.
    Idle,
}

enum Source {
    /// Live file does not exist yet.
    Waiting,
    Reading(FileReader),
    /// Old handle after rotation, read to EOF before switching.
    Draining(FileReader),
}

enum Identity {
    Same,
    Replaced(FileId),
    Truncated(u64),
}

pub struct LiveTail {
    path: PathBuf,
    watcher: BoxedWatcher,
    poll_interval: Duration,
    source: Source,
}

impl LiveTail {
    /// Tail `path` from an already positioned reader, or wait for the file
    /// to appear when `reader` is None.
    pub fn new(
        path: impl Into<PathBuf>,
        reader: Option<FileReader>,
        watcher: BoxedWatcher,
        poll_interval: Duration,
    ) -> Self {
        Self {
            path: path.into(),
            watcher,
            poll_interval,
            source: match reader {
                Some(r) => Source::Reading(r),
                None => Source::Waiting,
            },
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Checkpoint for the current read position. None while waiting for the
    /// file or draining a rotated one.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        let Source::Reading(reader) = &self.source else {
            return None;
        };
        let mod_time = reader
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        Some(Checkpoint::now(
            reader.offset(),
            reader.file_id().ino(),
            mod_time,
        ))
    }

    /// Next tail event, or None once `cancel` fires.
    pub fn next(&mut self, cancel: &CancellationToken) -> Result<Option<TailEvent>> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            match &mut self.source {
                Source::Waiting => match FileReader::open(&self.path, 0) {
                    Ok(reader) => {
                        info!(path = ?self.path, "Live log appeared");
                        self.source = Source::Reading(reader);
                        return Ok(Some(TailEvent::Switched(SwitchReason::Appeared)));
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        self.wait()?;
                        return Ok(Some(TailEvent::Idle));
                    }
                    Err(source) => {
                        return Err(Error::Open {
                            path: self.path.clone(),
                            source,
                        });
                    }
                },

                Source::Draining(reader) => {
                    if let Some(line) = reader.read_final_line()? {
                        return Ok(Some(TailEvent::Line(line)));
                    }
                    debug!(path = ?self.path, old = %reader.file_id(), "Rotated log drained");
                    match FileReader::open(&self.path, 0) {
                        Ok(next) => {
                            self.source = Source::Reading(next);
                            return Ok(Some(TailEvent::Switched(SwitchReason::Rotated)));
                        }
                        // renamed again before it could be opened
                        Err(e) if e.kind() == ErrorKind::NotFound => self.source = Source::Waiting,
                        Err(source) => {
                            return Err(Error::Open {
                                path: self.path.clone(),
                                source,
                            });
                        }
                    }
                }

                Source::Reading(reader) => {
                    if let Some(line) = reader.read_line()? {
                        return Ok(Some(TailEvent::Line(line)));
                    }

                    match check_identity(&self.path, reader) {
                        Identity::Same => {
                            self.wait()?;
                            return Ok(Some(TailEvent::Idle));
                        }
                        Identity::Replaced(new_id) => {
                            info!(
                                path = ?self.path,
                                old = %reader.file_id(),
                                new = %new_id,
                                "Live log rotated"
                            );
                            if let Source::Reading(old) =
                                std::mem::replace(&mut self.source, Source::Waiting)
                            {
                                self.source = Source::Draining(old);
                            }
                        }
                        Identity::Truncated(len) => {
                            warn!(
                                path = ?self.path,
                                offset = reader.offset(),
                                len,
                                "Live log truncated, reading from the start"
                            );
                            reader.rewind()?;
                            return Ok(Some(TailEvent::Switched(SwitchReason::Truncated)));
                        }
                    }
                }
            }
        }
    }

    fn wait(&mut self) -> Result<()> {
        let events = self.watcher.recv_timeout(self.poll_interval)?;
        if events.iter().any(|e| e.concerns(&self.path)) {
            debug!(path = ?self.path, count = events.len(), "Live log changed");
        }
        Ok(())
    }
}

fn check_identity(path: &Path, reader: &FileReader) -> Identity {
    match FileId::from_path(path) {
        Ok(id) if id != reader.file_id() => return Identity::Replaced(id),
        Ok(_) => {}
        // moved away and not yet recreated; keep reading the old handle
        Err(e) if e.kind() == ErrorKind::NotFound => return Identity::Same,
        Err(e) => {
            debug!(path = ?path, error = %e, "Unable to stat live log");
            return Identity::Same;
        }
    }

    let read_to = reader.offset() + reader.pending_len() as u64;
    match reader.metadata() {
        Ok(m) if m.len() < read_to => Identity::Truncated(m.len()),
        Ok(_) => Identity::Same,
        Err(e) => {
            debug!(path = ?path, error = %e, "Unable to stat open log handle");
            Identity::Same
        }
    }
}

/// Open the live log, letting `start_at` pick the initial offset from the
/// file's identity and length. Returns None if the file does not exist.
pub fn open_live(
    path: &Path,
    start_at: impl FnOnce(FileId, u64) -> u64,
) -> Result<Option<FileReader>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(Error::Open {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let id = FileId::from_file(&file)?;
    let len = file.metadata()?.len();
    let offset = start_at(id, len);
    Ok(Some(FileReader::from_file(path.to_path_buf(), file, offset)?))
}
