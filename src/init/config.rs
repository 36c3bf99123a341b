// SPDX-License-Identifier: Apache-2.0

//! Shipper configuration.
//!
//! Loaded from a JSON file and overlaid with `LOGSHIP_`-prefixed environment
//! variables. The file may use either the snake_case keys below or the
//! PascalCase keys of older deployments (`EventLog`, `AMQPURI`, ...).

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use figment::value::Dict;
use serde::Deserialize;
use tower::BoxError;

use crate::exporters::amqp::{AmqpExporterConfig, ExchangeType};
use crate::receivers::eventlog::EventLogConfig;
use crate::receivers::eventlog::segmenter::{DEFAULT_END_PATTERN, DEFAULT_START_PATTERN};
use crate::receivers::eventlog::watcher::WatchMode;

const ENV_PREFIX: &str = "LOGSHIP_";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShipperConfig {
    pub event_log: PathBuf,

    pub amqp_uri: String,
    pub exchange_name: String,
    pub exchange_type: String,
    pub routing_key: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub nowait: bool,

    pub checkpoint_path: PathBuf,
    pub watch_mode: WatchMode,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub checkpoint_interval: Duration,
    pub start_pattern: String,
    pub end_pattern: String,
    pub resume_backlog_position: bool,
    pub pipeline_capacity: usize,

    #[serde(with = "humantime_serde")]
    pub reconnect_initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub reconnect_max_backoff: Duration,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        let event_log = EventLogConfig::default();
        let amqp = AmqpExporterConfig::default();
        Self {
            event_log: PathBuf::new(),
            amqp_uri: String::new(),
            exchange_name: String::new(),
            exchange_type: "direct".to_string(),
            routing_key: String::new(),
            durable: amqp.durable,
            auto_delete: amqp.auto_delete,
            internal: amqp.internal,
            nowait: amqp.nowait,
            checkpoint_path: event_log.checkpoint_path,
            watch_mode: event_log.watch_mode,
            poll_interval: event_log.poll_interval,
            checkpoint_interval: event_log.checkpoint_interval,
            start_pattern: DEFAULT_START_PATTERN.to_string(),
            end_pattern: DEFAULT_END_PATTERN.to_string(),
            resume_backlog_position: event_log.resume_backlog_position,
            pipeline_capacity: event_log.pipeline_capacity,
            reconnect_initial_backoff: amqp.reconnect_initial_backoff,
            reconnect_max_backoff: amqp.reconnect_max_backoff,
        }
    }
}

/// Map the legacy PascalCase keys onto field names.
fn canonical_key(key: &str) -> &str {
    match key {
        "EventLog" => "event_log",
        "AMQPURI" => "amqp_uri",
        "ExchangeName" => "exchange_name",
        "ExchangeType" => "exchange_type",
        "RoutingKey" => "routing_key",
        "Durable" => "durable",
        "Autodelete" => "auto_delete",
        "Internal" => "internal",
        "NoWait" => "nowait",
        other => other,
    }
}

fn normalize_keys(dict: Dict) -> Dict {
    dict.into_iter()
        .map(|(k, v)| (canonical_key(&k).to_string(), v))
        .collect()
}

impl ShipperConfig {
    /// Load the file at `path` and overlay the environment. A missing or
    /// unparsable file is an error.
    pub fn load(path: &Path) -> Result<Self, BoxError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file {}: {}", path.display(), e))?;
        Self::from_json(&contents, Env::prefixed(ENV_PREFIX).ignore(&["config"]))
    }

    fn from_json(contents: &str, env: Env) -> Result<Self, BoxError> {
        let file: Dict = Figment::from(Json::string(contents))
            .extract()
            .map_err(|e| format!("failed to parse config file: {}", e))?;

        let config: ShipperConfig = Figment::new()
            .merge(Serialized::defaults(normalize_keys(file)))
            .merge(env)
            .extract()
            .map_err(|e| format!("invalid configuration: {}", e))?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BoxError> {
        if self.amqp_uri.trim().is_empty() {
            return Err("amqp_uri must be specified".into());
        }
        self.event_log_config().validate()?;
        self.amqp_config()?.validate()?;
        Ok(())
    }

    pub fn event_log_config(&self) -> EventLogConfig {
        EventLogConfig {
            event_log: self.event_log.clone(),
            checkpoint_path: self.checkpoint_path.clone(),
            watch_mode: self.watch_mode,
            poll_interval: self.poll_interval,
            checkpoint_interval: self.checkpoint_interval,
            start_pattern: self.start_pattern.clone(),
            end_pattern: self.end_pattern.clone(),
            resume_backlog_position: self.resume_backlog_position,
            pipeline_capacity: self.pipeline_capacity,
        }
    }

    pub fn amqp_config(&self) -> Result<AmqpExporterConfig, BoxError> {
        let exchange_type: ExchangeType = self.exchange_type.parse()?;
        Ok(AmqpExporterConfig::new(self.amqp_uri.clone())
            .with_exchange(self.exchange_name.clone(), exchange_type)
            .with_routing_key(self.routing_key.clone())
            .with_durable(self.durable)
            .with_auto_delete(self.auto_delete)
            .with_internal(self.internal)
            .with_nowait(self.nowait)
            .with_reconnect_backoff(self.reconnect_initial_backoff, self.reconnect_max_backoff))
    }
}
