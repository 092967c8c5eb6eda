// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Memory classification and stream selection.

use std::fmt;

use dynamo_memory::StorageKind;
use serde::{Deserialize, Serialize};

use crate::{DmaError, Result};

/// Where a port's memory lives, seen from the device that drives a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryClass {
    /// Host memory reachable over the bus.
    Host,
    /// Frame-buffer (or scratch) memory of the driving device.
    DeviceLocal(u32),
    /// Frame-buffer memory of another device.
    DevicePeer(u32),
}

impl MemoryClass {
    /// Classify `kind` relative to `local_device`.
    ///
    /// Scratch memory is treated exactly like frame-buffer memory.
    pub fn classify(kind: StorageKind, local_device: u32) -> Self {
        match kind.device_id() {
            None => MemoryClass::Host,
            Some(id) if id == local_device => MemoryClass::DeviceLocal(id),
            Some(id) => MemoryClass::DevicePeer(id),
        }
    }

    pub fn device(&self) -> Option<u32> {
        match self {
            MemoryClass::Host => None,
            MemoryClass::DeviceLocal(id) | MemoryClass::DevicePeer(id) => Some(*id),
        }
    }
}

impl fmt::Display for MemoryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryClass::Host => write!(f, "host"),
            MemoryClass::DeviceLocal(id) => write!(f, "device-local({id})"),
            MemoryClass::DevicePeer(id) => write!(f, "device-peer({id})"),
        }
    }
}

/// Identifies one of a device's streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    HostToDevice { device: u32 },
    DeviceToHost { device: u32 },
    /// Round-robin over the device's device-to-device streams.
    DeviceToDevice { device: u32 },
    PeerToPeer { src: u32, dst: u32 },
}

impl StreamKind {
    /// Device whose runtime owns the stream.
    pub fn device(&self) -> u32 {
        match *self {
            StreamKind::HostToDevice { device }
            | StreamKind::DeviceToHost { device }
            | StreamKind::DeviceToDevice { device } => device,
            StreamKind::PeerToPeer { src, .. } => src,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::HostToDevice { device } => write!(f, "h2d[{device}]"),
            StreamKind::DeviceToHost { device } => write!(f, "d2h[{device}]"),
            StreamKind::DeviceToDevice { device } => write!(f, "d2d[{device}]"),
            StreamKind::PeerToPeer { src, dst } => write!(f, "p2p[{src}->{dst}]"),
        }
    }
}

/// Pick the stream for a copy from `src` to `dst`.
///
/// Same device goes to a device-to-device stream, different devices to the
/// source device's peer stream for the destination, and host transfers to the
/// fixed directional stream of the device involved.
pub fn select_stream(src: MemoryClass, dst: MemoryClass) -> Result<StreamKind> {
    use MemoryClass::*;

    match (src, dst) {
        (Host, Host) => Err(DmaError::NoDeviceEndpoint { src, dst }),
        (Host, DeviceLocal(device) | DevicePeer(device)) => {
            Ok(StreamKind::HostToDevice { device })
        }
        (DeviceLocal(device) | DevicePeer(device), Host) => {
            Ok(StreamKind::DeviceToHost { device })
        }
        (DeviceLocal(s) | DevicePeer(s), DeviceLocal(d) | DevicePeer(d)) if s == d => {
            Ok(StreamKind::DeviceToDevice { device: s })
        }
        (DeviceLocal(s) | DevicePeer(s), DeviceLocal(d) | DevicePeer(d)) => {
            Ok(StreamKind::PeerToPeer { src: s, dst: d })
        }
    }
}
