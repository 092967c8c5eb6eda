// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::Stream;
use crate::route::StreamKind;
use crate::{DmaError, Result};

/// The streams of one device.
#[derive(Debug)]
pub struct DeviceStreams {
    pub(crate) host_to_device: Arc<Stream>,
    pub(crate) device_to_host: Arc<Stream>,
    pub(crate) device_to_device: Vec<Arc<Stream>>,
    pub(crate) peer_to_peer: HashMap<u32, Arc<Stream>>,
    next_d2d: AtomicUsize,
}

impl DeviceStreams {
    pub fn new(
        host_to_device: Arc<Stream>,
        device_to_host: Arc<Stream>,
        device_to_device: Vec<Arc<Stream>>,
        peer_to_peer: HashMap<u32, Arc<Stream>>,
    ) -> Self {
        debug_assert!(!device_to_device.is_empty());
        Self {
            host_to_device,
            device_to_host,
            device_to_device,
            peer_to_peer,
            next_d2d: AtomicUsize::new(0),
        }
    }

    /// Next device-to-device stream in round-robin order.
    pub fn next_d2d_stream(&self) -> Arc<Stream> {
        let idx = self.next_d2d.fetch_add(1, Ordering::Relaxed) % self.device_to_device.len();
        self.device_to_device[idx].clone()
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<Stream>> {
        [&self.host_to_device, &self.device_to_host]
            .into_iter()
            .chain(self.device_to_device.iter())
            .chain(self.peer_to_peer.values())
    }
}

/// Every stream the engine owns, indexed by device.
#[derive(Debug, Default)]
pub struct StreamTable {
    devices: HashMap<u32, DeviceStreams>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, device: u32, streams: DeviceStreams) {
        self.devices.insert(device, streams);
    }

    pub fn device(&self, device: u32) -> Result<&DeviceStreams> {
        self.devices
            .get(&device)
            .ok_or(DmaError::UnknownDevice(device))
    }

    /// Resolve a stream kind to a concrete stream.
    pub fn get(&self, kind: StreamKind) -> Result<Arc<Stream>> {
        let streams = self.device(kind.device())?;
        match kind {
            StreamKind::HostToDevice { .. } => Ok(streams.host_to_device.clone()),
            StreamKind::DeviceToHost { .. } => Ok(streams.device_to_host.clone()),
            StreamKind::DeviceToDevice { .. } => Ok(streams.next_d2d_stream()),
            StreamKind::PeerToPeer { src, dst } => streams
                .peer_to_peer
                .get(&dst)
                .cloned()
                .ok_or(DmaError::NoPeerStream { src, dst }),
        }
    }

    /// All streams of all devices.
    pub fn streams(&self) -> Vec<Arc<Stream>> {
        let mut devices: Vec<_> = self.devices.iter().collect();
        devices.sort_by_key(|(id, _)| **id);
        devices
            .into_iter()
            .flat_map(|(_, streams)| streams.iter().cloned())
            .collect()
    }

    /// Fire completed records on every stream. Returns how many fired.
    pub fn reap_completions(&self) -> Result<usize> {
        let mut fired = 0;
        for streams in self.devices.values() {
            for stream in streams.iter() {
                fired += stream.reap_completions()?;
            }
        }
        Ok(fired)
    }

    /// Records still waiting to fire across all streams.
    pub fn pending_completions(&self) -> usize {
        self.devices
            .values()
            .flat_map(|s| s.iter())
            .map(|s| s.pending_completions())
            .sum()
    }
}
