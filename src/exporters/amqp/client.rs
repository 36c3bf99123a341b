// SPDX-License-Identifier: Apache-2.0

//! lapin-backed transport.

use lapin::options::BasicPublishOptions;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::{debug, info};

use crate::exporters::amqp::config::AmqpExporterConfig;
use crate::exporters::amqp::errors::{AmqpError, Result};
use crate::exporters::amqp::transport::{BrokerSession, CloseNotifier, Connector, close_channel};

/// Transient delivery: the broker may keep the message in memory only.
const DELIVERY_MODE_TRANSIENT: u8 = 1;

pub struct LapinConnector {
    config: AmqpExporterConfig,
}

impl LapinConnector {
    pub fn new(config: AmqpExporterConfig) -> Self {
        Self { config }
    }
}

pub struct LapinSession {
    connection: Connection,
    channel: Channel,
    exchange: String,
    routing_key: String,
    properties: BasicProperties,
}

impl Connector for LapinConnector {
    type Session = LapinSession;

    async fn connect(&self) -> Result<(LapinSession, CloseNotifier)> {
        let connection = Connection::connect(&self.config.uri, ConnectionProperties::default()).await?;

        let (mut reporter, notifier) = close_channel();
        connection.on_error(move |err| reporter.report(AmqpError::Client(err)));

        let channel = connection.create_channel().await?;
        channel
            .exchange_declare(
                &self.config.exchange_name,
                self.config.exchange_type.to_lapin(),
                self.config.declare_options(),
                FieldTable::default(),
            )
            .await?;

        info!(
            exchange = %self.config.exchange_name,
            exchange_type = ?self.config.exchange_type,
            durable = self.config.durable,
            "Connected to AMQP broker"
        );

        let properties = BasicProperties::default()
            .with_content_type(self.config.content_type.clone().into())
            .with_delivery_mode(DELIVERY_MODE_TRANSIENT);

        Ok((
            LapinSession {
                connection,
                channel,
                exchange: self.config.exchange_name.clone(),
                routing_key: self.config.routing_key.clone(),
                properties,
            },
            notifier,
        ))
    }
}

impl BrokerSession for LapinSession {
    async fn publish(&self, payload: &[u8]) -> Result<()> {
        // The returned confirm is not awaited: publishes are best effort.
        self.channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                payload,
                self.properties.clone(),
            )
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing AMQP connection");
        self.connection.close(200, "shutdown").await?;
        Ok(())
    }
}
