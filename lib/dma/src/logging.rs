// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Logging setup for processes that embed the DMA engine.
//!
//! - Configuration loaded from:
//!   1. Environment variables (highest priority).
//!   2. Optional TOML file pointed to by the `DYN_LOGGING_CONFIG_PATH` environment variable.
//!
//! Output is compact text on stderr, or one JSON object per line when
//! `DYN_LOGGING_JSONL` is truthy. Filters come from `DYN_LOG` or the
//! `log_filters` table of the TOML file:
//!
//! ```toml
//! log_level = "warn"
//!
//! [log_filters]
//! "dynamo_dma::stream" = "debug"
//! ```

use std::collections::HashMap;
use std::sync::Once;

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::env_is_truthy;
use crate::config::environment_names::logging as env_logging;

/// Default log level
const DEFAULT_FILTER_LEVEL: &str = "info";

/// Once instance to ensure the logger is only initialized once
static INIT: Once = Once::new();

#[derive(Serialize, Deserialize, Debug)]
struct LoggingConfig {
    log_level: String,
    log_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: DEFAULT_FILTER_LEVEL.to_string(),
            log_filters: HashMap::new(),
        }
    }
}

/// Install the global subscriber. Later calls do nothing.
pub fn init() {
    INIT.call_once(|| {
        if let Err(e) = setup_logging() {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    });
}

fn setup_logging() -> Result<(), Box<dyn std::error::Error>> {
    let filter = filters(load_config()?);

    if env_is_truthy(env_logging::DYN_LOGGING_JSONL) {
        let l = fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .with_filter(filter);
        tracing_subscriber::registry().with(l).try_init()?;
    } else {
        let l = fmt::layer()
            .compact()
            .with_ansi(!env_is_truthy(env_logging::DYN_SDK_DISABLE_ANSI_LOGGING))
            .with_writer(std::io::stderr)
            .with_filter(filter);
        tracing_subscriber::registry().with(l).try_init()?;
    }
    Ok(())
}

fn filters(config: LoggingConfig) -> EnvFilter {
    let default_directive = config
        .log_level
        .parse::<Directive>()
        .unwrap_or_else(|_| tracing::level_filters::LevelFilter::INFO.into());

    let mut filter_layer = EnvFilter::builder()
        .with_default_directive(default_directive)
        .with_env_var(env_logging::DYN_LOG)
        .from_env_lossy();

    for (module, level) in config.log_filters {
        match format!("{module}={level}").parse::<Directive>() {
            Ok(d) => {
                filter_layer = filter_layer.add_directive(d);
            }
            Err(e) => {
                eprintln!("Failed parsing filter '{level}' for module '{module}': {e}");
            }
        }
    }
    filter_layer
}

fn load_config() -> Result<LoggingConfig, figment::Error> {
    let mut figment = Figment::new().merge(Serialized::defaults(LoggingConfig::default()));
    if let Ok(path) = std::env::var(env_logging::DYN_LOGGING_CONFIG_PATH) {
        figment = figment.merge(Toml::file(path));
    }
    figment.extract()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_filters() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "logging.toml",
                r#"
                    log_level = "warn"

                    [log_filters]
                    "dynamo_dma::stream" = "debug"
                "#,
            )?;
            jail.set_env(env_logging::DYN_LOGGING_CONFIG_PATH, "logging.toml");

            let config = load_config()?;
            assert_eq!(config.log_level, "warn");
            assert_eq!(
                config.log_filters.get("dynamo_dma::stream").map(String::as_str),
                Some("debug")
            );

            let filter = filters(config).to_string();
            assert!(filter.contains("dynamo_dma::stream=debug"));
            Ok(())
        });
    }

    #[test]
    fn test_defaults_without_file() {
        figment::Jail::expect_with(|_jail| {
            let config = load_config()?;
            assert_eq!(config.log_level, DEFAULT_FILTER_LEVEL);
            assert!(config.log_filters.is_empty());
            Ok(())
        });
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        tracing::debug!("logging initialized twice");
    }
}
