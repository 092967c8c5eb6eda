// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Environment variable names read by the DMA engine.

/// Logging and tracing environment variables
pub mod logging {
    /// Log filter directives (e.g., "debug", "dynamo_dma=trace")
    pub const DYN_LOG: &str = "DYN_LOG";

    /// Path to logging configuration file
    pub const DYN_LOGGING_CONFIG_PATH: &str = "DYN_LOGGING_CONFIG_PATH";

    /// Enable JSONL logging format
    pub const DYN_LOGGING_JSONL: &str = "DYN_LOGGING_JSONL";

    /// Disable ANSI terminal colors in logs
    pub const DYN_SDK_DISABLE_ANSI_LOGGING: &str = "DYN_SDK_DISABLE_ANSI_LOGGING";
}

/// DMA engine configuration
///
/// Every field of `DmaConfig` can be set as `DYN_DMA_<FIELD>`; the ones below
/// are read directly.
pub mod dma {
    /// Prefix for environment overrides of `DmaConfig` fields
    pub const DYN_DMA_PREFIX: &str = "DYN_DMA_";

    /// Path to a TOML file with `DmaConfig` settings
    pub const DYN_DMA_CONFIG_PATH: &str = "DYN_DMA_CONFIG_PATH";

    /// Minimum address slice for copies, in bytes
    pub const DYN_DMA_MIN_COPY_CHUNK_BYTES: &str = "DYN_DMA_MIN_COPY_CHUNK_BYTES";

    /// Number of device-to-device streams per device
    pub const DYN_DMA_D2D_STREAMS: &str = "DYN_DMA_D2D_STREAMS";

    /// Progress every queued descriptor instead of only the head
    pub const DYN_DMA_MULTITHREAD_DMA: &str = "DYN_DMA_MULTITHREAD_DMA";

    /// Enable per-stream rate limiting
    pub const DYN_DMA_RATE_LIMIT_ENABLED: &str = "DYN_DMA_RATE_LIMIT_ENABLED";
}
