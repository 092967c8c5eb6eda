// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use anyhow::Result;
use derive_builder::Builder;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

pub mod environment_names;

use environment_names::dma as env_dma;

/// Default minimum address slice for copies
pub const DEFAULT_MIN_COPY_CHUNK_BYTES: usize = 4 << 20;

/// Default minimum address slice for fills
pub const DEFAULT_MIN_FILL_CHUNK_BYTES: usize = 4096;

/// Default clamp for a single host<->device copy
pub const DEFAULT_HOST_COPY_MAX_BYTES: usize = 4 << 20;

/// Default number of device-to-device streams per device
pub const DEFAULT_D2D_STREAMS: usize = 4;

/// DMA engine configuration
#[derive(Serialize, Deserialize, Validate, Debug, Builder, Clone, PartialEq)]
#[builder(build_fn(private, name = "build_internal"), derive(Debug, Serialize))]
pub struct DmaConfig {
    /// Do not start a copy batch smaller than this while more addresses may
    /// still arrive.
    /// Set this at runtime with environment variable DYN_DMA_MIN_COPY_CHUNK_BYTES
    #[builder(default = "DEFAULT_MIN_COPY_CHUNK_BYTES")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub min_copy_chunk_bytes: usize,

    /// Same as `min_copy_chunk_bytes`, for fills.
    #[builder(default = "DEFAULT_MIN_FILL_CHUNK_BYTES")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub min_fill_chunk_bytes: usize,

    /// Largest single operation on a host-to-device or device-to-host stream.
    #[validate(range(min = 1))]
    #[builder(default = "DEFAULT_HOST_COPY_MAX_BYTES")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub host_copy_max_bytes: usize,

    /// Device-to-device streams per device, used round robin.
    /// Set this at runtime with environment variable DYN_DMA_D2D_STREAMS
    #[validate(range(min = 1))]
    #[builder(default = "DEFAULT_D2D_STREAMS")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub d2d_streams: usize,

    /// Progress every queued descriptor on each call. When false a channel
    /// only progresses the head of its queue.
    #[builder(default = "false")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub multithread_dma: bool,

    /// Throttle each stream to its path bandwidth estimate.
    #[builder(default = "true")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub rate_limit_enabled: bool,

    /// Length of a rate limiter window in microseconds.
    #[validate(range(min = 1))]
    #[builder(default = "1000")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub rate_window_us: u64,

    /// Warn about completions pending longer than this.
    #[builder(default = "60")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub slow_completion_warn_secs: u64,

    /// Time slice the background driver hands to each progress call.
    #[validate(range(min = 1))]
    #[builder(default = "1000")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub work_slice_us: u64,
}

impl Default for DmaConfig {
    fn default() -> Self {
        Self {
            min_copy_chunk_bytes: DEFAULT_MIN_COPY_CHUNK_BYTES,
            min_fill_chunk_bytes: DEFAULT_MIN_FILL_CHUNK_BYTES,
            host_copy_max_bytes: DEFAULT_HOST_COPY_MAX_BYTES,
            d2d_streams: DEFAULT_D2D_STREAMS,
            multithread_dma: false,
            rate_limit_enabled: true,
            rate_window_us: 1000,
            slow_completion_warn_secs: 60,
            work_slice_us: 1000,
        }
    }
}

impl DmaConfig {
    pub fn builder() -> DmaConfigBuilder {
        DmaConfigBuilder::default()
    }

    pub(crate) fn figment() -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(DmaConfig::default()));
        if let Ok(path) = std::env::var(env_dma::DYN_DMA_CONFIG_PATH) {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(env_dma::DYN_DMA_PREFIX).filter_map(|k| {
            let full_key = format!("{}{}", env_dma::DYN_DMA_PREFIX, k.as_str());
            // filters out empty environment variables
            match std::env::var(&full_key) {
                Ok(v) if !v.is_empty() && !k.as_str().eq_ignore_ascii_case("CONFIG_PATH") => {
                    Some(k.into())
                }
                _ => None,
            }
        }))
    }

    /// Load the DMA configuration.
    ///
    /// Later sources override earlier ones:
    /// 1. built-in defaults
    /// 2. the TOML file named by `DYN_DMA_CONFIG_PATH`, if set
    /// 3. environment variables prefixed with `DYN_DMA_`
    pub fn from_settings() -> Result<DmaConfig> {
        let config: DmaConfig = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_micros(self.rate_window_us)
    }

    pub fn work_slice(&self) -> Duration {
        Duration::from_micros(self.work_slice_us)
    }

    pub fn slow_completion_warn(&self) -> Duration {
        Duration::from_secs(self.slow_completion_warn_secs)
    }
}

impl DmaConfigBuilder {
    /// Build and validate the DMA configuration
    pub fn build(&self) -> Result<DmaConfig> {
        let config = self.build_internal()?;
        config.validate()?;
        Ok(config)
    }
}

/// Check if a string is truthy
pub fn is_truthy(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "1" | "true" | "on" | "yes")
}

/// Check if an environment variable is set to a truthy value
pub fn env_is_truthy(env: &str) -> bool {
    match std::env::var(env) {
        Ok(val) => is_truthy(val.as_str()),
        Err(_) => false,
    }
}
