// SPDX-License-Identifier: Apache-2.0

//! Seams between the reconnect policy and the wire client.

use std::future::Future;

use tokio::sync::oneshot;

use crate::exporters::amqp::errors::{AmqpError, Result};

/// How a session's lifetime ended.
#[derive(Debug)]
pub enum CloseSignal {
    /// The broker or network dropped the connection.
    Abnormal(AmqpError),
    /// The session was closed or dropped locally.
    Normal,
}

/// Fires once when the session it was created with goes away.
#[derive(Debug)]
pub struct CloseNotifier {
    rx: oneshot::Receiver<AmqpError>,
}

/// Held by the transport; report an unexpected close through it. Dropping
/// it without reporting counts as a normal close.
#[derive(Debug)]
pub struct CloseReporter {
    tx: Option<oneshot::Sender<AmqpError>>,
}

pub fn close_channel() -> (CloseReporter, CloseNotifier) {
    let (tx, rx) = oneshot::channel();
    (CloseReporter { tx: Some(tx) }, CloseNotifier { rx })
}

impl CloseReporter {
    /// Only the first report is delivered.
    pub fn report(&mut self, err: AmqpError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(err);
        }
    }
}

impl CloseNotifier {
    /// Wait for the close. Cancel safe; must not be awaited again once it
    /// has returned.
    pub async fn closed(&mut self) -> CloseSignal {
        match (&mut self.rx).await {
            Ok(err) => CloseSignal::Abnormal(err),
            Err(_) => CloseSignal::Normal,
        }
    }
}

/// One established connection with its destination declared.
pub trait BrokerSession: Send + Sync + 'static {
    /// Fire-and-forget publish of one message.
    fn publish(&self, payload: &[u8]) -> impl Future<Output = Result<()>> + Send;

    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens sessions. Each call yields a fresh session and the notifier that
/// reports its closure.
pub trait Connector: Send + Sync + 'static {
    type Session: BrokerSession;

    fn connect(&self) -> impl Future<Output = Result<(Self::Session, CloseNotifier)>> + Send;
}
