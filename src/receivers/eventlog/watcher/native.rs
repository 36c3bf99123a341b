// SPDX-License-Identifier: Apache-2.0

//! Watcher backed by OS notifications through `notify` (inotify, FSEvents,
//! ReadDirectoryChangesW).

use std::path::Path;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError, channel};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::warn;

use super::traits::{FileEvent, FileEventKind, FileWatcher, WatcherError};

pub struct NativeWatcher {
    watcher: RecommendedWatcher,
    events: Receiver<Result<Event, notify::Error>>,
}

impl NativeWatcher {
    pub fn new() -> Result<Self, WatcherError> {
        let (tx, rx) = channel();
        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| WatcherError::Init(e.to_string()))?;

        Ok(Self {
            watcher,
            events: rx,
        })
    }

    fn convert(event: Event) -> Option<FileEvent> {
        let kind = match event.kind {
            EventKind::Create(_) => FileEventKind::Create,
            EventKind::Modify(_) => FileEventKind::Modify,
            EventKind::Remove(_) => FileEventKind::Remove,
            EventKind::Access(_) => return None,
            EventKind::Any | EventKind::Other => FileEventKind::Other,
        };
        if event.paths.is_empty() {
            return None;
        }
        Some(FileEvent::new(kind, event.paths))
    }

    fn accept(res: Result<Event, notify::Error>, out: &mut Vec<FileEvent>) {
        match res {
            Ok(event) => out.extend(Self::convert(event)),
            Err(e) => warn!(error = %e, "File watcher error"),
        }
    }
}

impl FileWatcher for NativeWatcher {
    fn watch(&mut self, dir: &Path) -> Result<(), WatcherError> {
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatcherError::Watch(e.to_string()))
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<FileEvent>, WatcherError> {
        let mut events = Vec::new();
        match self.events.recv_timeout(timeout) {
            Ok(res) => Self::accept(res, &mut events),
            Err(RecvTimeoutError::Timeout) => return Ok(events),
            Err(RecvTimeoutError::Disconnected) => return Err(WatcherError::Disconnected),
        }

        // drain whatever else is queued
        loop {
            match self.events.try_recv() {
                Ok(res) => Self::accept(res, &mut events),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err(WatcherError::Disconnected),
            }
        }
        Ok(events)
    }

    fn is_native(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        #[cfg(target_os = "linux")]
        {
            "inotify"
        }
        #[cfg(target_os = "macos")]
        {
            "FSEvents"
        }
        #[cfg(target_os = "windows")]
        {
            "ReadDirectoryChangesW"
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            "native"
        }
    }
}
