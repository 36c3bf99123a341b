// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::receivers::eventlog::segmenter::{DEFAULT_END_PATTERN, DEFAULT_START_PATTERN};
use crate::receivers::eventlog::watcher::WatchMode;

/// Settings for tailing and recovering the scheduler event log.
#[derive(Debug, Clone)]
pub struct EventLogConfig {
    /// The live log. Rotations are siblings named `<file name>.<n>`.
    pub event_log: PathBuf,
    pub checkpoint_path: PathBuf,
    pub watch_mode: WatchMode,
    /// Upper bound on how long the tail sleeps between checks
    pub poll_interval: Duration,
    /// Minimum spacing between checkpoints written while live-tailing
    pub checkpoint_interval: Duration,
    pub start_pattern: String,
    pub end_pattern: String,
    /// Seek to the checkpoint position in the first backlog file instead of
    /// replaying it from the start.
    pub resume_backlog_position: bool,
    /// Events buffered between the reader thread and the publisher
    pub pipeline_capacity: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            event_log: PathBuf::new(),
            checkpoint_path: PathBuf::from("/tmp/logship.tombstone"),
            watch_mode: WatchMode::Auto,
            poll_interval: Duration::from_millis(250),
            checkpoint_interval: Duration::from_secs(30),
            start_pattern: DEFAULT_START_PATTERN.to_string(),
            end_pattern: DEFAULT_END_PATTERN.to_string(),
            resume_backlog_position: false,
            pipeline_capacity: 1024,
        }
    }
}

impl EventLogConfig {
    pub fn new(event_log: impl Into<PathBuf>) -> Self {
        Self {
            event_log: event_log.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.event_log.as_os_str().is_empty() {
            return Err("event log path must be specified".to_string());
        }
        if self.base_name().is_none() {
            return Err(format!(
                "event log path {} has no file name",
                self.event_log.display()
            ));
        }
        if self.poll_interval.is_zero() {
            return Err("poll interval must be greater than zero".to_string());
        }
        if self.pipeline_capacity == 0 {
            return Err("pipeline capacity must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Directory holding the live log and its rotations.
    pub fn log_dir(&self) -> &Path {
        match self.event_log.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    pub fn base_name(&self) -> Option<&str> {
        self.event_log.file_name().and_then(|n| n.to_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EventLogConfig::new("/var/log/condor/EventLog");
        assert_eq!(cfg.checkpoint_path, PathBuf::from("/tmp/logship.tombstone"));
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.checkpoint_interval, Duration::from_secs(30));
        assert!(!cfg.resume_backlog_position);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_dir_and_base_name() {
        let cfg = EventLogConfig::new("/var/log/condor/EventLog");
        assert_eq!(cfg.log_dir(), Path::new("/var/log/condor"));
        assert_eq!(cfg.base_name(), Some("EventLog"));

        let relative = EventLogConfig::new("EventLog");
        assert_eq!(relative.log_dir(), Path::new("."));
        assert_eq!(relative.base_name(), Some("EventLog"));
    }

    #[test]
    fn test_validate_rejects_empty_path() {
        assert!(EventLogConfig::default().validate().is_err());
        assert!(EventLogConfig::new("/").validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let mut cfg = EventLogConfig::new("/var/log/condor/EventLog");
        cfg.poll_interval = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }
}
