// SPDX-License-Identifier: Apache-2.0

//! Keeps the publisher connected.
//!
//! Two states: waiting for a handoff from `connect`, or watching the close
//! notifier of the current session. An abnormal close triggers one reconnect
//! cycle, retried with exponential backoff until it succeeds; a normal close
//! re-arms and waits for the next handoff. Reconnects run inline, so two can
//! never overlap.

use std::time::Duration;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, info, warn};

use crate::bounded_channel::BoundedReceiver;
use crate::exporters::amqp::publisher::{Handoff, ReliablePublisher};
use crate::exporters::amqp::transport::{CloseSignal, Connector};

enum State {
    AwaitingHandoff,
    Watching(Handoff),
}

pub struct ReconnectSupervisor<C: Connector> {
    publisher: ReliablePublisher<C>,
    handoffs: BoundedReceiver<Handoff>,
    initial_backoff: Duration,
    max_backoff: Duration,
    reconnects: u64,
}

impl<C: Connector> ReconnectSupervisor<C> {
    pub(crate) fn new(
        publisher: ReliablePublisher<C>,
        handoffs: BoundedReceiver<Handoff>,
        initial_backoff: Duration,
        max_backoff: Duration,
    ) -> Self {
        Self {
            publisher,
            handoffs,
            initial_backoff,
            max_backoff,
            reconnects: 0,
        }
    }

    /// Run until cancelled. Returns the number of reconnect cycles performed.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<u64, BoxError> {
        info!("AMQP reconnect supervisor started");
        let mut state = State::AwaitingHandoff;
        let mut newest = 0u64;

        loop {
            state = match state {
                State::AwaitingHandoff => select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    handoff = self.handoffs.next() => match handoff {
                        Some(h) if h.generation >= newest => {
                            newest = h.generation;
                            State::Watching(h)
                        }
                        Some(h) => {
                            debug!(generation = h.generation, "Ignoring stale handoff");
                            State::AwaitingHandoff
                        }
                        None => break,
                    },
                },

                State::Watching(mut current) => select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    // a newer session supersedes the one being watched
                    handoff = self.handoffs.next() => match handoff {
                        Some(h) if h.generation > current.generation => {
                            newest = h.generation;
                            State::Watching(h)
                        }
                        Some(_) => State::Watching(current),
                        None => break,
                    },

                    signal = current.notifier.closed() => match signal {
                        CloseSignal::Normal => {
                            debug!(generation = current.generation, "AMQP session closed normally");
                            State::AwaitingHandoff
                        }
                        CloseSignal::Abnormal(err) => {
                            warn!(
                                generation = current.generation,
                                error = %err,
                                "AMQP connection lost, reconnecting"
                            );
                            match self.reconnect(&cancel).await {
                                Some(h) => {
                                    newest = h.generation;
                                    State::Watching(h)
                                }
                                None => break,
                            }
                        }
                    },
                },
            };
        }

        info!(reconnects = self.reconnects, "AMQP reconnect supervisor stopped");
        Ok(self.reconnects)
    }

    /// One reconnect cycle. None if cancelled before it succeeded.
    async fn reconnect(&mut self, cancel: &CancellationToken) -> Option<Handoff> {
        self.reconnects += 1;
        let mut backoff = self.initial_backoff;
        let mut attempt = 1u32;

        loop {
            match self.publisher.establish().await {
                Ok(h) => {
                    info!(attempt, generation = h.generation, "Reconnected to AMQP broker");
                    return Some(h);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        error = %e,
                        retry_in = ?backoff,
                        "AMQP reconnect failed"
                    );
                }
            }

            select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.max_backoff);
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporters::amqp::publisher::test_support::MockConnector;
    use std::sync::atomic::Ordering;
    use tokio::task::JoinHandle;

    const BACKOFF: Duration = Duration::from_millis(5);

    fn start(
        connector: MockConnector,
    ) -> (
        ReliablePublisher<MockConnector>,
        CancellationToken,
        JoinHandle<Result<u64, BoxError>>,
    ) {
        let publisher = ReliablePublisher::new(connector);
        let supervisor = publisher.take_supervisor(BACKOFF, BACKOFF * 4).unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervisor.run(cancel.clone()));
        (publisher, cancel, handle)
    }

    async fn wait_for_connects(connector: &MockConnector, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while connector.connect_count() < n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {} connects, saw {}",
                n,
                connector.connect_count()
            );
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    async fn wait_connected(publisher: &ReliablePublisher<MockConnector>) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !publisher.is_connected().await {
            assert!(tokio::time::Instant::now() < deadline, "never reconnected");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    #[tokio::test]
    async fn test_abnormal_closures_each_trigger_one_reconnect() {
        let connector = MockConnector::default();
        let (publisher, cancel, handle) = start(connector.clone());

        publisher.connect().await.unwrap();
        for n in 1..=3 {
            connector.drop_connection();
            wait_for_connects(&connector, 1 + n).await;
        }
        // give a spurious extra reconnect a chance to show up
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connector.connect_count(), 4);

        cancel.cancel();
        assert_eq!(handle.await.unwrap().unwrap(), 3);
        assert_eq!(connector.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_normal_close_rearms_without_reconnecting() {
        let connector = MockConnector::default();
        let (publisher, cancel, handle) = start(connector.clone());

        publisher.connect().await.unwrap();
        connector.close_quietly();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connector.connect_count(), 1);

        // the supervisor is waiting for the next handoff again
        publisher.connect().await.unwrap();
        connector.drop_connection();
        wait_for_connects(&connector, 3).await;

        cancel.cancel();
        assert_eq!(handle.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_reconnect_is_retried_with_backoff() {
        let connector = MockConnector::default();
        let (publisher, cancel, handle) = start(connector.clone());

        publisher.connect().await.unwrap();
        connector.failures.store(2, Ordering::SeqCst);
        connector.drop_connection();

        // two refused attempts, then success
        wait_for_connects(&connector, 4).await;
        wait_connected(&publisher).await;
        publisher.publish(b"back").await.unwrap();

        cancel.cancel();
        assert_eq!(handle.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_newer_handoff_supersedes_watched_session() {
        let connector = MockConnector::default();
        let (publisher, cancel, handle) = start(connector.clone());

        publisher.connect().await.unwrap();
        publisher.connect().await.unwrap();
        // the first session was replaced; dropping the newest one must still
        // be noticed
        connector.drop_connection();
        wait_for_connects(&connector, 3).await;

        cancel.cancel();
        assert_eq!(handle.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_stops_supervisor() {
        let connector = MockConnector::default();
        let publisher = ReliablePublisher::new(connector.clone());
        let supervisor = publisher
            .take_supervisor(Duration::from_secs(60), Duration::from_secs(60))
            .unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervisor.run(cancel.clone()));

        publisher.connect().await.unwrap();
        connector.failures.store(usize::MAX, Ordering::SeqCst);
        connector.drop_connection();
        wait_for_connects(&connector, 2).await;

        cancel.cancel();
        let reconnects = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("supervisor did not stop")
            .unwrap()
            .unwrap();
        assert_eq!(reconnects, 1);
    }

    #[tokio::test]
    async fn test_reconnects_never_overlap() {
        let connector = MockConnector::default().with_connect_delay(Duration::from_millis(5));
        let (publisher, cancel, handle) = start(connector.clone());

        publisher.connect().await.unwrap();
        // a caller connecting while the supervisor reconnects is serialized
        connector.drop_connection();
        let other = publisher.clone();
        let concurrent = tokio::spawn(async move { other.connect().await });
        concurrent.await.unwrap().unwrap();
        // the concurrent connect may supersede the dropped session before the
        // supervisor sees the close, so only two connects are guaranteed
        wait_for_connects(&connector, 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(publisher.is_connected().await);

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(connector.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
