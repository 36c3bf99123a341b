// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use std::path::PathBuf;

#[derive(Debug, Args, Clone, Default)]
pub struct ShipperRun {
    /// JSON configuration file
    #[arg(long, env = "LOGSHIP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Event log to follow, overriding the configured path
    #[arg(long)]
    pub event_log: Option<PathBuf>,
}
