// SPDX-License-Identifier: Apache-2.0

//! Publisher that keeps one broker session alive.
//!
//! Every successful `connect` hands the new session's close notifier to the
//! [`ReconnectSupervisor`], which reconnects when the broker drops the
//! session. Publishing while disconnected fails immediately; nothing is
//! buffered.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};
use tower::BoxError;
use tracing::{debug, warn};

use crate::bounded_channel::{BoundedReceiver, BoundedSender, bounded};
use crate::exporters::EventPublisher;
use crate::exporters::amqp::errors::{AmqpError, Result};
use crate::exporters::amqp::supervisor::ReconnectSupervisor;
use crate::exporters::amqp::transport::{BrokerSession, CloseNotifier, Connector};

/// A close notifier tagged with the session generation it belongs to, so a
/// late handoff can never displace a newer one.
#[derive(Debug)]
pub struct Handoff {
    pub generation: u64,
    pub notifier: CloseNotifier,
}

struct Inner<C: Connector> {
    connector: C,
    session: RwLock<Option<Arc<C::Session>>>,
    /// Serializes connects so two can never overlap
    connect_lock: Mutex<u64>,
    handoff_tx: BoundedSender<Handoff>,
    handoff_rx: StdMutex<Option<BoundedReceiver<Handoff>>>,
}

pub struct ReliablePublisher<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for ReliablePublisher<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> ReliablePublisher<C> {
    pub fn new(connector: C) -> Self {
        let (handoff_tx, handoff_rx) = bounded(1);
        Self {
            inner: Arc::new(Inner {
                connector,
                session: RwLock::new(None),
                connect_lock: Mutex::new(0),
                handoff_tx,
                handoff_rx: StdMutex::new(Some(handoff_rx)),
            }),
        }
    }

    /// Take the reconnect supervisor. Returns None after the first call.
    ///
    /// The supervisor must be running before a second `connect`, since each
    /// connect waits for its handoff to be accepted.
    pub fn take_supervisor(
        &self,
        initial_backoff: Duration,
        max_backoff: Duration,
    ) -> Option<ReconnectSupervisor<C>> {
        let rx = self.inner.handoff_rx.lock().ok()?.take()?;
        Some(ReconnectSupervisor::new(
            self.clone(),
            rx,
            initial_backoff,
            max_backoff,
        ))
    }

    /// Establish a session, declare the destination and hand its close
    /// notifier to the supervisor.
    pub async fn connect(&self) -> Result<()> {
        let handoff = self.establish().await?;
        // sent after the connect lock is released so a reconnecting
        // supervisor is never waiting on us while we wait on it
        self.inner
            .handoff_tx
            .send(handoff)
            .await
            .map_err(|_| AmqpError::SupervisorGone)
    }

    /// Open a new session and swap it in, closing the one it replaces.
    /// Returns the handoff for the new session without sending it.
    pub(crate) async fn establish(&self) -> Result<Handoff> {
        let mut generation = self.inner.connect_lock.lock().await;

        let (session, notifier) = self.inner.connector.connect().await?;
        *generation += 1;

        let previous = self.inner.session.write().await.replace(Arc::new(session));
        if let Some(previous) = previous {
            if let Err(e) = previous.close().await {
                debug!(error = %e, "Error closing replaced AMQP session");
            }
        }

        debug!(generation = *generation, "AMQP session established");
        Ok(Handoff {
            generation: *generation,
            notifier,
        })
    }

    pub async fn publish(&self, payload: &[u8]) -> Result<()> {
        // clone out of the lock so a reconnect can swap while we publish
        let session = self
            .inner
            .session
            .read()
            .await
            .clone()
            .ok_or(AmqpError::NotConnected)?;
        session.publish(payload).await
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.session.read().await.is_some()
    }

    /// Close the current session. A later `connect` opens a new one.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.inner.connect_lock.lock().await;
        let session = self.inner.session.write().await.take();
        match session {
            Some(s) => s.close().await,
            None => Ok(()),
        }
    }
}

impl<C: Connector> EventPublisher for ReliablePublisher<C> {
    async fn publish(&self, payload: Bytes) -> std::result::Result<(), BoxError> {
        ReliablePublisher::publish(self, &payload).await.map_err(|e| {
            if matches!(e, AmqpError::NotConnected) {
                warn!("Dropping event while AMQP broker is disconnected");
            }
            e.into()
        })
    }
}
