// SPDX-License-Identifier: Apache-2.0

//! Change notification for the live log.
//!
//! The live tail only uses notifications as a wake-up; it always re-checks
//! the file itself, so a missed or coalesced event costs at most one
//! `poll_interval` of latency.

mod native;
mod poll;
mod traits;

pub use native::NativeWatcher;
pub use poll::PollWatcher;
pub use traits::{FileEvent, FileEventKind, FileWatcher, WatcherError};

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Native notifications, falling back to polling if they cannot be set up.
    #[default]
    Auto,
    Native,
    #[serde(alias = "polling")]
    Poll,
}

impl std::str::FromStr for WatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(WatchMode::Auto),
            "native" => Ok(WatchMode::Native),
            "poll" | "polling" => Ok(WatchMode::Poll),
            _ => Err(format!(
                "Invalid watch mode '{}'. Valid options: auto, native, poll",
                s
            )),
        }
    }
}

pub type BoxedWatcher = Box<dyn FileWatcher + Send>;

/// Build a watcher for `dir` according to `mode`.
pub fn create_watcher(
    mode: WatchMode,
    dir: &Path,
    poll_interval: Duration,
) -> Result<BoxedWatcher, WatcherError> {
    let native = || -> Result<BoxedWatcher, WatcherError> {
        let mut watcher = NativeWatcher::new()?;
        watcher.watch(dir)?;
        Ok(Box::new(watcher))
    };
    let poll = || -> Result<BoxedWatcher, WatcherError> {
        let mut watcher = PollWatcher::new(poll_interval);
        watcher.watch(dir)?;
        Ok(Box::new(watcher))
    };

    let watcher = match mode {
        WatchMode::Native => native()?,
        WatchMode::Poll => poll()?,
        WatchMode::Auto => match native() {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "Native file watching unavailable, falling back to polling");
                poll()?
            }
        },
    };
    info!(dir = ?dir, backend = watcher.backend_name(), "Watching log directory");
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_watch_mode_from_str() {
        assert_eq!("auto".parse::<WatchMode>().unwrap(), WatchMode::Auto);
        assert_eq!("Native".parse::<WatchMode>().unwrap(), WatchMode::Native);
        assert_eq!("polling".parse::<WatchMode>().unwrap(), WatchMode::Poll);
        assert!("inotify".parse::<WatchMode>().is_err());
    }

    #[test]
    fn test_watch_mode_deserialize() {
        let mode: WatchMode = serde_json::from_str("\"poll\"").unwrap();
        assert_eq!(mode, WatchMode::Poll);
        let mode: WatchMode = serde_json::from_str("\"polling\"").unwrap();
        assert_eq!(mode, WatchMode::Poll);
    }

    #[test]
    fn test_create_poll_watcher() {
        let dir = TempDir::new().unwrap();
        let watcher = create_watcher(WatchMode::Poll, dir.path(), Duration::from_millis(10)).unwrap();
        assert!(!watcher.is_native());
        assert_eq!(watcher.backend_name(), "poll");
    }

    #[test]
    fn test_auto_mode_yields_a_watcher() {
        let dir = TempDir::new().unwrap();
        assert!(create_watcher(WatchMode::Auto, dir.path(), Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_missing_directory_fails_in_poll_mode() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");
        assert!(create_watcher(WatchMode::Poll, &missing, Duration::from_millis(10)).is_err());
    }
}
