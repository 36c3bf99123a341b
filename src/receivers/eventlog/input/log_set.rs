// SPDX-License-Identifier: Apache-2.0

//! Discovers a log file and its rotated predecessors and orders them oldest
//! to newest.
//!
//! Rotation naming follows the scheduler's convention: `<base>.<n>` where a
//! higher `n` is older, and the unsuffixed `<base>` is the live file.

use std::cmp::{Ordering, Reverse};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::receivers::eventlog::input::file_id::FileId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub name: String,
    pub base_dir: PathBuf,
    pub mod_time: SystemTime,
    pub inode: u64,
}

impl LogFile {
    pub fn path(&self) -> PathBuf {
        self.base_dir.join(&self.name)
    }
}

/// Position of a file in rotation order. Variant order is sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RotationRank {
    /// `<base>.<n>`; larger n sorts first.
    Numbered(Reverse<u64>),
    /// Numeric suffix too large to represent. Sorts after every numbered
    /// file and before the live file.
    Unparsable,
    /// No numeric suffix.
    Current,
}

impl RotationRank {
    /// Rank by the part of `name` after `base_name`, so a base name that
    /// itself ends in `.<digits>` still ranks as the live file.
    fn of(base_name: &str, name: &str) -> Self {
        let suffix = name.strip_prefix(base_name).unwrap_or(name);
        match suffix.rsplit_once('.') {
            Some((_, suffix)) if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) => {
                suffix
                    .parse::<u64>()
                    .map(|n| RotationRank::Numbered(Reverse(n)))
                    .unwrap_or(RotationRank::Unparsable)
            }
            _ => RotationRank::Current,
        }
    }
}

/// Ordered set of rotations of one log, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSet {
    base_name: String,
    files: Vec<LogFile>,
}

impl LogSet {
    /// List every regular file in `dir` whose name starts with `base_name`.
    ///
    /// A directory that cannot be listed yields an empty set; replaying
    /// nothing is preferable to refusing to start.
    pub fn resolve(dir: &Path, base_name: &str) -> LogSet {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = ?dir, error = %e, "Unable to list log directory, assuming no rotated files");
                return LogSet::from_files(base_name, Vec::new());
            }
        };

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if !name.starts_with(base_name) {
                continue;
            }

            let metadata = match fs::metadata(entry.path()) {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    debug!(name = %name, error = %e, "Skipping unreadable log candidate");
                    continue;
                }
            };

            files.push(LogFile {
                mod_time: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                inode: FileId::from_metadata(&metadata).ino(),
                name,
                base_dir: dir.to_path_buf(),
            });
        }

        LogSet::from_files(base_name, files)
    }

    /// Build a set from already collected descriptors, applying rotation order.
    pub fn from_files(base_name: &str, mut files: Vec<LogFile>) -> LogSet {
        files.sort_by(|a, b| compare(base_name, a, b));
        LogSet {
            base_name: base_name.to_string(),
            files,
        }
    }

    /// The suffix of the set starting at the file with `inode`. An unknown
    /// inode returns the whole set so nothing is skipped.
    pub fn slice_from_inode(&self, inode: u64) -> LogSet {
        match self.files.iter().position(|f| f.inode == inode) {
            Some(idx) => LogSet {
                base_name: self.base_name.clone(),
                files: self.files[idx..].to_vec(),
            },
            None => {
                debug!(inode, "Checkpoint inode not among log files, keeping full set");
                self.clone()
            }
        }
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn files(&self) -> &[LogFile] {
        &self.files
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LogFile> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Rotated files only; the file named exactly like the live log is left
    /// to the live tail.
    pub fn backlog(&self) -> impl Iterator<Item = &LogFile> {
        self.files.iter().filter(|f| f.name != self.base_name)
    }
}

impl<'a> IntoIterator for &'a LogSet {
    type Item = &'a LogFile;
    type IntoIter = std::slice::Iter<'a, LogFile>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

fn compare(base_name: &str, a: &LogFile, b: &LogFile) -> Ordering {
    RotationRank::of(base_name, &a.name)
        .cmp(&RotationRank::of(base_name, &b.name))
        // the live file itself is newest among the unsuffixed names
        .then_with(|| (a.name == base_name).cmp(&(b.name == base_name)))
        .then_with(|| a.mod_time.cmp(&b.mod_time))
        .then_with(|| a.name.cmp(&b.name))
}
