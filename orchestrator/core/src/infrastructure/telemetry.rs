// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Process-wide tracing setup. `RUST_LOG` takes precedence over the
//! configured level.
//!
//! Call [`init_logging`] once from the node binary's `main`, after loading the
//! [`DistributedNodeConfigManifest`](crate::domain::node_config::DistributedNodeConfigManifest):
//!
//! ```no_run
//! use aegis_team_core::domain::node_config::DistributedNodeConfigManifest;
//! use aegis_team_core::infrastructure::telemetry::init_logging;
//!
//! # fn main() -> anyhow::Result<()> {
//! let manifest = DistributedNodeConfigManifest::load_or_default(None)?;
//! init_logging(&manifest.spec.observability.logging)?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};

use crate::domain::node_config::{LogFormat, LoggingConfig};

pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let result = match config.format {
        LogFormat::Json => builder.json().with_target(true).try_init(),
        LogFormat::Text => builder.compact().with_target(false).try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_installs_once() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Json,
        };

        assert!(init_logging(&config).is_ok());
        tracing::info!(component = "telemetry", "Logging initialized");

        // A global subscriber is already set for this process
        assert!(init_logging(&LoggingConfig::default()).is_err());
    }
}
