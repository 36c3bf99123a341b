// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Errors that can occur while talking to the AMQP broker
#[derive(Error, Debug)]
pub enum AmqpError {
    /// Error from the AMQP client
    #[error("AMQP client error: {0}")]
    Client(#[from] lapin::Error),

    /// Connection-level failure reported by a transport
    #[error("AMQP transport error: {0}")]
    Transport(String),

    /// No live session; a reconnect may be in progress
    #[error("not connected to AMQP broker")]
    NotConnected,

    /// The reconnect supervisor has exited
    #[error("reconnect supervisor is not running")]
    SupervisorGone,

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

/// Result type for AMQP operations
pub type Result<T> = std::result::Result<T, AmqpError>;
