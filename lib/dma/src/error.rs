// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use dynamo_memory::StorageError;
use thiserror::Error;

use crate::route::MemoryClass;

/// Result type for DMA operations.
pub type Result<T> = std::result::Result<T, DmaError>;

/// Errors surfaced by the DMA engine.
///
/// Construction-time errors (`InvalidPortWiring`, `UnsupportedRedop`,
/// `InvalidFillSize`, `EmptyAddressList`) reject a descriptor before any work
/// is queued. `Device` errors come from the device runtime and are fatal to the
/// progress path; the engine never retries them.
#[derive(Debug, Error)]
pub enum DmaError {
    #[error("invalid port wiring: {0}")]
    InvalidPortWiring(String),

    #[error("reduction operator {0} is not supported by this channel")]
    UnsupportedRedop(u32),

    #[error("invalid fill: {0}")]
    InvalidFillSize(String),

    #[error("address list entry has no dimensions or a zero extent")]
    EmptyAddressList,

    #[error("address list entry does not fit the address space")]
    AddressOverflow,

    #[error("no device endpoint between {src} and {dst}")]
    NoDeviceEndpoint { src: MemoryClass, dst: MemoryClass },

    #[error("unknown device {0}")]
    UnknownDevice(u32),

    #[error("no peer stream from device {src} to device {dst}")]
    NoPeerStream { src: u32, dst: u32 },

    #[error("device runtime error: {0}")]
    Device(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(feature = "cuda")]
impl From<cudarc::driver::DriverError> for DmaError {
    fn from(e: cudarc::driver::DriverError) -> Self {
        DmaError::Device(format!("{e:?}"))
    }
}
