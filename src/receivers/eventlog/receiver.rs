// SPDX-License-Identifier: Apache-2.0

//! Async side of the event log receiver.
//!
//! The recovery coordinator runs on a blocking thread and hands events and
//! checkpoints over a bounded channel. This loop publishes events in order
//! and persists each checkpoint once everything before it was published.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::{BoundedReceiver, bounded};
use crate::exporters::EventPublisher;
use crate::receivers::eventlog::config::EventLogConfig;
use crate::receivers::eventlog::persistence::{Checkpoint, CheckpointStore};
use crate::receivers::eventlog::recovery::{PipelineMessage, RecoveryCoordinator};
use crate::receivers::eventlog::watcher::BoxedWatcher;

pub struct EventLogReceiver<P> {
    config: EventLogConfig,
    store: Arc<dyn CheckpointStore>,
    publisher: P,
    watcher: Option<BoxedWatcher>,
}

/// Counters reported when the receiver stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ForwardStats {
    pub published: u64,
    pub publish_failures: u64,
    pub checkpoints: u64,
    pub checkpoint_failures: u64,
}

impl<P: EventPublisher> EventLogReceiver<P> {
    pub fn new(config: EventLogConfig, store: Arc<dyn CheckpointStore>, publisher: P) -> Self {
        Self {
            config,
            store,
            publisher,
            watcher: None,
        }
    }

    pub fn with_watcher(mut self, watcher: BoxedWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Run recovery and the live tail until `cancel` fires. Returns an error
    /// if the configuration is unusable or the tail fails unrecoverably.
    pub async fn run(self, cancel: CancellationToken) -> Result<ForwardStats, BoxError> {
        let (tx, rx) = bounded(self.config.pipeline_capacity);

        let mut coordinator =
            RecoveryCoordinator::new(self.config.clone(), self.store.clone(), tx, cancel.clone())?;
        if let Some(watcher) = self.watcher {
            coordinator = coordinator.with_watcher(watcher);
        }

        info!(path = ?self.config.event_log, "Starting event log receiver");
        let coordinator: JoinHandle<_> = tokio::task::spawn_blocking(move || coordinator.run());

        let stats = forward(rx, &self.publisher, &self.store).await;
        info!(
            published = stats.published,
            publish_failures = stats.publish_failures,
            checkpoints = stats.checkpoints,
            "Event log receiver stopped"
        );

        match coordinator.await {
            Ok(Ok(())) => Ok(stats),
            Ok(Err(e)) => {
                error!(error = %e, "Event log coordinator failed");
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Drain the pipeline until the coordinator drops its sender.
async fn forward<P: EventPublisher>(
    mut rx: BoundedReceiver<PipelineMessage>,
    publisher: &P,
    store: &Arc<dyn CheckpointStore>,
) -> ForwardStats {
    let mut stats = ForwardStats::default();

    while let Some(msg) = rx.next().await {
        match msg {
            PipelineMessage::Event(event) => {
                let payload = match event.encode() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(hash = %event.hash, error = %e, "Failed to encode event");
                        stats.publish_failures += 1;
                        continue;
                    }
                };
                match publisher.publish(payload).await {
                    Ok(()) => {
                        debug!(hash = %event.hash, "Event published");
                        stats.published += 1;
                    }
                    Err(e) => {
                        // not retried; segmentation carries on
                        warn!(hash = %event.hash, error = %e, "Failed to publish event");
                        stats.publish_failures += 1;
                    }
                }
            }
            PipelineMessage::Checkpoint(cp) => match write_checkpoint(store, cp).await {
                Ok(()) => stats.checkpoints += 1,
                Err(e) => {
                    warn!(error = %e, "Failed to write checkpoint");
                    stats.checkpoint_failures += 1;
                }
            },
        }
    }

    stats
}

async fn write_checkpoint(store: &Arc<dyn CheckpointStore>, cp: Checkpoint) -> Result<(), BoxError> {
    let store = store.clone();
    tokio::task::spawn_blocking(move || store.write(&cp)).await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receivers::eventlog::event::PublishableEvent;
    use crate::receivers::eventlog::persistence::MemoryCheckpointStore;
    use crate::receivers::eventlog::watcher::PollWatcher;
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Recorder {
        published: Arc<Mutex<Vec<PublishableEvent>>>,
        fail_every: Option<usize>,
        calls: Arc<AtomicUsize>,
    }

    impl EventPublisher for Recorder {
        async fn publish(&self, payload: Bytes) -> Result<(), BoxError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every.is_some_and(|k| n % k == 0) {
                return Err("broker unavailable".into());
            }
            let ev: PublishableEvent = serde_json::from_slice(&payload)?;
            self.published.lock().unwrap().push(ev);
            Ok(())
        }
    }

    fn event(n: u32) -> PublishableEvent {
        PublishableEvent::new(format!("{:03} e\n...\n", n))
    }

    #[tokio::test]
    async fn test_forward_publishes_in_order_and_persists_checkpoints() {
        let (tx, rx) = bounded(8);
        let store = MemoryCheckpointStore::new();
        let shared: Arc<dyn CheckpointStore> = Arc::new(store.clone());
        let recorder = Recorder::default();

        tx.send(PipelineMessage::Event(event(1))).await.unwrap();
        tx.send(PipelineMessage::Event(event(2))).await.unwrap();
        tx.send(PipelineMessage::Checkpoint(Checkpoint::now(
            99,
            3,
            SystemTime::now(),
        )))
        .await
        .unwrap();
        drop(tx);

        let stats = forward(rx, &recorder, &shared).await;
        assert_eq!(stats.published, 2);
        assert_eq!(stats.checkpoints, 1);

        let published = recorder.published.lock().unwrap();
        assert_eq!(*published, vec![event(1), event(2)]);
        assert_eq!(store.read().unwrap().position, 99);
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_stop_forwarding() {
        let (tx, rx) = bounded(8);
        let shared: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let recorder = Recorder {
            fail_every: Some(2),
            ..Default::default()
        };

        for n in 1..=4 {
            tx.send(PipelineMessage::Event(event(n))).await.unwrap();
        }
        drop(tx);

        let stats = forward(rx, &recorder, &shared).await;
        assert_eq!(stats.published, 2);
        assert_eq!(stats.publish_failures, 2);
        let published = recorder.published.lock().unwrap();
        assert_eq!(*published, vec![event(1), event(3)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_until_cancelled() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("EventLog");
        std::fs::write(dir.path().join("EventLog.1"), "000 a\n...\n").unwrap();
        std::fs::write(&log, "001 b\n...\n").unwrap();

        let mut config = EventLogConfig::new(&log);
        config.poll_interval = Duration::from_millis(10);
        let store = MemoryCheckpointStore::new();
        let recorder = Recorder::default();
        let receiver = EventLogReceiver::new(config, Arc::new(store.clone()), recorder.clone())
            .with_watcher(Box::new(PollWatcher::new(Duration::from_millis(10))));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(receiver.run(cancel.clone()));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while recorder.published.lock().unwrap().len() < 2 {
            assert!(tokio::time::Instant::now() < deadline, "events not published");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.published, 2);
        assert!(stats.checkpoints >= 1);
        let cp = store.read().unwrap();
        assert_eq!(cp.position, 10);

        let texts: Vec<_> = recorder
            .published
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event.clone())
            .collect();
        assert_eq!(texts, vec!["000 a\n...\n", "001 b\n...\n"]);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_fast() {
        let receiver = EventLogReceiver::new(
            EventLogConfig::default(),
            Arc::new(MemoryCheckpointStore::new()),
            Recorder::default(),
        );
        assert!(receiver.run(CancellationToken::new()).await.is_err());
    }
}
