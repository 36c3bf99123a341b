// SPDX-License-Identifier: Apache-2.0

//! Startup recovery followed by the live tail.
//!
//! `LoadCheckpoint -> ResolveBacklog -> ReplayBacklog -> Checkpoint -> LiveTail`
//!
//! Runs on a blocking thread. Everything it produces, events and checkpoints
//! alike, goes through one ordered channel, so a checkpoint reaches the store
//! only after every event before it has been offered to the publisher.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bounded_channel::BoundedSender;
use crate::receivers::eventlog::config::EventLogConfig;
use crate::receivers::eventlog::error::{CheckpointError, Error, Result};
use crate::receivers::eventlog::event::PublishableEvent;
use crate::receivers::eventlog::input::{
    FileReader, LiveTail, LogFile, LogSet, SwitchReason, TailEvent, open_live,
};
use crate::receivers::eventlog::persistence::{Checkpoint, CheckpointStore};
use crate::receivers::eventlog::segmenter::Segmenter;
use crate::receivers::eventlog::watcher::{BoxedWatcher, create_watcher};

#[derive(Debug)]
pub enum PipelineMessage {
    Event(PublishableEvent),
    Checkpoint(Checkpoint),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    LoadCheckpoint,
    ResolveBacklog,
    ReplayBacklog,
    Checkpoint,
    LiveTail,
}

impl std::fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecoveryState::LoadCheckpoint => "load_checkpoint",
            RecoveryState::ResolveBacklog => "resolve_backlog",
            RecoveryState::ReplayBacklog => "replay_backlog",
            RecoveryState::Checkpoint => "checkpoint",
            RecoveryState::LiveTail => "live_tail",
        };
        f.write_str(name)
    }
}

pub struct RecoveryCoordinator {
    config: EventLogConfig,
    store: Arc<dyn CheckpointStore>,
    segmenter: Segmenter,
    tx: BoundedSender<PipelineMessage>,
    cancel: CancellationToken,
    watcher: Option<BoxedWatcher>,
}

impl RecoveryCoordinator {
    pub fn new(
        config: EventLogConfig,
        store: Arc<dyn CheckpointStore>,
        tx: BoundedSender<PipelineMessage>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate().map_err(Error::Config)?;
        let segmenter = Segmenter::new(&config.start_pattern, &config.end_pattern)?;
        Ok(Self {
            config,
            store,
            segmenter,
            tx,
            cancel,
            watcher: None,
        })
    }

    /// Use a specific watcher for the live tail instead of building one from
    /// the configured watch mode.
    pub fn with_watcher(mut self, watcher: BoxedWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Run recovery and then tail until cancelled or an unrecoverable tail
    /// error occurs.
    pub fn run(mut self) -> Result<()> {
        self.enter(RecoveryState::LoadCheckpoint);
        let checkpoint = self.load_checkpoint();

        self.enter(RecoveryState::ResolveBacklog);
        // Hold the live file open across replay. If the producer rotates it
        // meanwhile, the tail drains this handle before moving on.
        let reader = self.open_live(checkpoint.as_ref())?;
        let live_inode = reader.as_ref().map(|r| r.file_id().ino());
        let log_set = self.resolve_backlog(checkpoint.as_ref());

        self.enter(RecoveryState::ReplayBacklog);
        self.replay_backlog(&log_set, checkpoint.as_ref(), live_inode)?;
        if self.cancel.is_cancelled() {
            info!("Shutdown requested during backlog replay");
            return Ok(());
        }

        self.enter(RecoveryState::Checkpoint);
        let watcher = match self.watcher.take() {
            Some(w) => w,
            None => create_watcher(
                self.config.watch_mode,
                self.config.log_dir(),
                self.config.poll_interval,
            )?,
        };
        let mut tail = LiveTail::new(
            self.config.event_log.clone(),
            reader,
            watcher,
            self.config.poll_interval,
        );
        if let Some(cp) = tail.checkpoint() {
            self.send(PipelineMessage::Checkpoint(cp))?;
        }

        self.enter(RecoveryState::LiveTail);
        self.live_tail(&mut tail)
    }

    fn enter(&self, state: RecoveryState) {
        debug!(state = %state, "Recovery state");
    }

    /// Any failure means "no prior state": replay everything.
    fn load_checkpoint(&self) -> Option<Checkpoint> {
        match self.store.read() {
            Ok(cp) => {
                info!(
                    position = cp.position,
                    inode = cp.inode,
                    checkpoint_time = %cp.checkpoint_time,
                    "Loaded checkpoint"
                );
                Some(cp)
            }
            Err(CheckpointError::Missing(path)) => {
                info!(path = ?path, "No checkpoint found, replaying full log history");
                None
            }
            Err(e) => {
                warn!(error = %e, "Ignoring unusable checkpoint, replaying full log history");
                None
            }
        }
    }

    fn resolve_backlog(&self, checkpoint: Option<&Checkpoint>) -> LogSet {
        // validate() guarantees a file name
        let base_name = self.config.base_name().unwrap_or_default();
        let set = LogSet::resolve(self.config.log_dir(), base_name);
        let set = match checkpoint {
            Some(cp) if !set.is_empty() => set.slice_from_inode(cp.inode),
            _ => set,
        };
        info!(
            files = ?set.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            "Resolved log set"
        );
        set
    }

    fn replay_backlog(
        &mut self,
        set: &LogSet,
        checkpoint: Option<&Checkpoint>,
        live_inode: Option<u64>,
    ) -> Result<()> {
        for (idx, file) in set.backlog().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            // rotated between opening the live file and listing; the live
            // tail reads it
            if Some(file.inode) == live_inode {
                debug!(path = ?file.path(), "Skipping rotated copy of the open live log");
                continue;
            }
            let offset = if idx == 0 {
                self.backlog_start(file, checkpoint)
            } else {
                0
            };
            match self.replay_file(file, offset) {
                Ok(events) => info!(path = ?file.path(), events, "Replayed rotated log"),
                // the pipeline is gone; nothing further can be delivered
                Err(Error::ChannelSend) => return Err(Error::ChannelSend),
                Err(e) => warn!(path = ?file.path(), error = %e, "Failed to replay rotated log"),
            }
        }
        Ok(())
    }

    fn backlog_start(&self, file: &LogFile, checkpoint: Option<&Checkpoint>) -> u64 {
        if !self.config.resume_backlog_position {
            return 0;
        }
        match checkpoint {
            Some(cp) if cp.inode == file.inode => {
                let len = std::fs::metadata(file.path()).map(|m| m.len()).unwrap_or(0);
                if cp.position <= len {
                    cp.position
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    fn replay_file(&mut self, file: &LogFile, offset: u64) -> Result<usize> {
        let path = file.path();
        let mut reader = FileReader::open(&path, offset).map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?;

        self.segmenter.reset();
        let mut events = 0;
        let result = loop {
            if self.cancel.is_cancelled() {
                break Ok(());
            }
            match reader.read_final_line() {
                Ok(Some(line)) => {
                    if let Some(text) = self.segmenter.push_line(&line) {
                        if let Err(e) = self.emit(text) {
                            break Err(e);
                        }
                        events += 1;
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(Error::Io(e)),
            }
        };
        // no event spans a file boundary
        self.segmenter.reset();
        result.map(|_| events)
    }

    fn open_live(&self, checkpoint: Option<&Checkpoint>) -> Result<Option<FileReader>> {
        let reader = open_live(&self.config.event_log, |id, len| match checkpoint {
            Some(cp) if cp.inode == id.ino() && cp.position <= len => cp.position,
            _ => 0,
        })?;
        match &reader {
            Some(r) => info!(
                path = ?self.config.event_log,
                inode = r.file_id().ino(),
                offset = r.offset(),
                "Opened live log"
            ),
            None => info!(path = ?self.config.event_log, "Live log missing, waiting for it"),
        }
        Ok(reader)
    }

    fn live_tail(&mut self, tail: &mut LiveTail) -> Result<()> {
        self.segmenter.reset();
        let mut last_checkpoint = Instant::now();
        let mut checkpointed_at = tail.checkpoint().map(|cp| (cp.inode, cp.position));

        while let Some(event) = tail.next(&self.cancel)? {
            match event {
                TailEvent::Line(line) => {
                    if let Some(text) = self.segmenter.push_line(&line) {
                        self.emit(text)?;
                    }
                }
                TailEvent::Switched(reason) => {
                    if self.segmenter.reset() {
                        warn!(reason = ?reason, "Dropped unterminated event at file switch");
                    }
                    if reason != SwitchReason::Truncated {
                        info!(path = ?tail.path(), reason = ?reason, "Tailing new live log");
                    }
                    if let Some(cp) = tail.checkpoint() {
                        checkpointed_at = Some((cp.inode, cp.position));
                        last_checkpoint = Instant::now();
                        self.send(PipelineMessage::Checkpoint(cp))?;
                    }
                }
                TailEvent::Idle => {
                    if !self.segmenter.is_idle()
                        || last_checkpoint.elapsed() < self.config.checkpoint_interval
                    {
                        continue;
                    }
                    if let Some(cp) = tail.checkpoint() {
                        if checkpointed_at != Some((cp.inode, cp.position)) {
                            checkpointed_at = Some((cp.inode, cp.position));
                            self.send(PipelineMessage::Checkpoint(cp))?;
                        }
                    }
                    last_checkpoint = Instant::now();
                }
            }
        }

        // Cancelled. Record where we stopped unless mid-event.
        if self.segmenter.is_idle() {
            if let Some(cp) = tail.checkpoint() {
                if checkpointed_at != Some((cp.inode, cp.position)) {
                    self.send(PipelineMessage::Checkpoint(cp))?;
                }
            }
        }
        info!("Live tail stopped");
        Ok(())
    }

    fn emit(&self, text: String) -> Result<()> {
        let event = PublishableEvent::new(text);
        debug!(hash = %event.hash, bytes = event.event.len(), "Event segmented");
        self.send(PipelineMessage::Event(event))
    }

    fn send(&self, msg: PipelineMessage) -> Result<()> {
        self.tx.send_blocking(msg).map_err(|_| Error::ChannelSend)
    }
}
