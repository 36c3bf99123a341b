// SPDX-License-Identifier: Apache-2.0

pub mod amqp;

use bytes::Bytes;
use std::future::Future;
use tower::BoxError;

/// Sink for encoded events at the end of the pipeline.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, payload: Bytes) -> impl Future<Output = Result<(), BoxError>> + Send;
}
