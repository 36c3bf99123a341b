// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{info, warn};

use crate::exporters::amqp::{Connector, LapinConnector, ReliablePublisher};
use crate::init::config::ShipperConfig;
use crate::init::wait::{self, TaskSet};
use crate::receivers::eventlog::{CheckpointStore, EventLogReceiver, JsonFileCheckpointStore};

const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs the event log receiver against an AMQP publisher, together with the
/// publisher's reconnect supervisor.
pub struct Shipper {
    config: ShipperConfig,
}

impl Shipper {
    pub fn new(config: ShipperConfig) -> Self {
        Self { config }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), BoxError> {
        self.config.validate()?;
        let connector = LapinConnector::new(self.config.amqp_config()?);
        let store = Arc::new(JsonFileCheckpointStore::new(
            self.config.checkpoint_path.clone(),
        ));
        self.run_with(connector, store, cancel).await
    }

    /// Run until `cancel` fires or a task fails. Failing to reach the broker
    /// on the first connect is fatal.
    pub async fn run_with<C: Connector>(
        self,
        connector: C,
        store: Arc<dyn CheckpointStore>,
        cancel: CancellationToken,
    ) -> Result<(), BoxError> {
        let amqp = self.config.amqp_config()?;
        let publisher = ReliablePublisher::new(connector);
        let supervisor = publisher
            .take_supervisor(amqp.reconnect_initial_backoff, amqp.reconnect_max_backoff)
            .ok_or("reconnect supervisor already taken")?;

        // child token: a failing task stops the others without cancelling
        // the caller
        let tasks_cancel = cancel.child_token();
        let mut tasks = TaskSet::new();
        {
            let token = tasks_cancel.clone();
            wait::spawn_named(&mut tasks, "reconnect supervisor", async move {
                supervisor.run(token).await.map(|_| ())
            });
        }

        if let Err(e) = publisher.connect().await {
            tasks_cancel.cancel();
            if let Err(join_err) = wait::drain_tasks(&mut tasks, TASK_SHUTDOWN_TIMEOUT).await {
                warn!(error = %join_err, "Error stopping reconnect supervisor");
            }
            return Err(format!("failed to connect to AMQP broker: {}", e).into());
        }
        info!(exchange = %amqp.exchange_name, "AMQP publisher connected");

        let receiver =
            EventLogReceiver::new(self.config.event_log_config(), store, publisher.clone());
        {
            let token = tasks_cancel.clone();
            wait::spawn_named(&mut tasks, "event log receiver", async move {
                receiver.run(token).await.map(|_| ())
            });
        }

        let result = select! {
            _ = cancel.cancelled() => Ok(()),
            e = wait::wait_for_any_task(&mut tasks) => match e {
                Ok(name) => {
                    warn!(task = ?name, "Unexpected early exit of shipper task.");
                    Ok(())
                }
                Err(e) => Err(e),
            },
        };

        tasks_cancel.cancel();
        let drained = wait::drain_tasks(&mut tasks, TASK_SHUTDOWN_TIMEOUT).await;
        if let Err(e) = publisher.close().await {
            warn!(error = %e, "Error closing AMQP connection");
        }

        result.and(drained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporters::amqp::publisher::test_support::MockConnector;
    use crate::receivers::eventlog::{MemoryCheckpointStore, PublishableEvent, WatchMode};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> ShipperConfig {
        ShipperConfig {
            event_log: dir.path().join("EventLog"),
            amqp_uri: "amqp://mock".to_string(),
            watch_mode: WatchMode::Poll,
            poll_interval: Duration::from_millis(10),
            reconnect_initial_backoff: Duration::from_millis(5),
            reconnect_max_backoff: Duration::from_millis(20),
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_initial_connect_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let connector = MockConnector::default();
        connector.failures.store(1, Ordering::SeqCst);

        let result = Shipper::new(config(&dir))
            .run_with(
                connector.clone(),
                Arc::new(MemoryCheckpointStore::new()),
                CancellationToken::new(),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ships_events_and_survives_reconnect() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("EventLog.1"), "000 old\n...\n").unwrap();
        std::fs::write(dir.path().join("EventLog"), "001 new\n...\n").unwrap();

        let connector = MockConnector::default();
        let store = MemoryCheckpointStore::new();
        let cancel = CancellationToken::new();
        let shipper = Shipper::new(config(&dir));
        let task = tokio::spawn(shipper.run_with(
            connector.clone(),
            Arc::new(store.clone()),
            cancel.clone(),
        ));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while connector.published.lock().unwrap().len() < 2 {
            assert!(tokio::time::Instant::now() < deadline, "events not shipped");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        connector.drop_connection();
        while connector.connect_count() < 2 {
            assert!(tokio::time::Instant::now() < deadline, "no reconnect");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        cancel.cancel();
        task.await.unwrap().unwrap();

        let events: Vec<String> = connector
            .published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| serde_json::from_slice::<PublishableEvent>(p).unwrap().event)
            .collect();
        assert_eq!(events, vec!["000 old\n...\n", "001 new\n...\n"]);
        assert!(store.exists());
        assert!(connector.closed.load(Ordering::SeqCst) >= 1);
    }
}
