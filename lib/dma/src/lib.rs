// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Accelerator DMA transfer engine.
//!
//! The engine turns arbitrary, possibly non-contiguous, multi-dimensional copy
//! and fill requests into ordered sequences of native device operations:
//!
//! - [`address`] describes and walks multi-dimensional address ranges, and
//!   [`decompose`] plans the largest 1D, 2D or 3D operation two cursors allow.
//! - [`descriptor`] holds the unit of work and its cooperative progress loop.
//! - [`channel`] models data paths and their cost, and queues descriptors.
//! - [`stream`] wraps device streams with a rate limiter and an ordered queue
//!   of completion records ([`completion`]).
//! - [`engine`] assembles streams and channels for every device of a
//!   [`device::DeviceBackend`], and [`bgwork`] drives them on tokio tasks.

pub mod address;
pub mod assembler;
pub mod bgwork;
pub mod channel;
pub mod completion;
pub mod config;
pub mod decompose;
pub mod descriptor;
pub mod device;
pub mod engine;
mod error;
pub mod fill;
pub mod logging;
pub mod port;
pub mod route;
pub mod stream;
pub mod time;

#[cfg(test)]
mod testing;

pub use address::{AddressEntry, AddressList, AddressListCursor};
pub use bgwork::BackgroundWorkManager;
pub use channel::{Channel, ChannelKind, Path};
pub use config::DmaConfig;
pub use descriptor::{DescriptorRequest, IterationState, TransferDescriptor};
pub use device::{DeviceBackend, HostBackend};
pub use engine::{DmaEngine, Route};
pub use error::{DmaError, Result};
pub use fill::FillReduction;
pub use port::PortSpec;
pub use route::{MemoryClass, StreamKind, select_stream};
pub use time::TimeLimit;
