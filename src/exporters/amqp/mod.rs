// SPDX-License-Identifier: Apache-2.0

//! AMQP exporter.
//!
//! Publishes encoded events to a declared exchange over a single broker
//! session. The session is watched by a [`ReconnectSupervisor`] which
//! re-establishes it after an abnormal close.
//!
//! # Modules
//!
//! - `config`: exchange and connection settings
//! - `errors`: error types for broker operations
//! - `transport`: the connector/session seams and close notification
//! - `client`: the lapin-backed connector
//! - `publisher`: the publisher shared with the pipeline
//! - `supervisor`: the reconnect loop

pub mod client;
pub mod config;
pub mod errors;
pub mod publisher;
pub mod supervisor;
pub mod transport;

pub use client::LapinConnector;
pub use config::{AmqpExporterConfig, ExchangeType};
pub use errors::AmqpError;
pub use publisher::ReliablePublisher;
pub use supervisor::ReconnectSupervisor;
pub use transport::{BrokerSession, CloseNotifier, CloseSignal, Connector};
