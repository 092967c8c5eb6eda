// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The DMA engine: streams and channels for every device of a backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use derive_getters::Getters;
use dynamo_memory::StorageKind;
use tracing::info;

use crate::channel::{Channel, ChannelKind, ChannelSettings, Path};
use crate::config::DmaConfig;
use crate::descriptor::{DescriptorRequest, TransferDescriptor};
use crate::device::DeviceBackend;
use crate::route::{MemoryClass, StreamKind};
use crate::stream::{DeviceStreams, RateLimiter, Stream, StreamTable};
use crate::{DmaError, Result};

/// Path estimates: bandwidth (MB/s), latency, fragment overhead, max dims.
struct PathEstimate {
    bandwidth_mbps: u64,
    latency: Duration,
    frag_overhead: Duration,
    max_dim: usize,
}

const TO_DEVICE: PathEstimate = PathEstimate {
    bandwidth_mbps: 10_000,
    latency: Duration::from_micros(1),
    frag_overhead: Duration::from_micros(2),
    max_dim: 2,
};

const FROM_DEVICE: PathEstimate = PathEstimate {
    bandwidth_mbps: 10_000,
    latency: Duration::from_micros(1),
    frag_overhead: Duration::from_micros(2),
    max_dim: 2,
};

const IN_DEVICE: PathEstimate = PathEstimate {
    bandwidth_mbps: 200_000,
    latency: Duration::from_nanos(250),
    frag_overhead: Duration::from_micros(2),
    max_dim: 3,
};

const PEER_DEVICE: PathEstimate = PathEstimate {
    bandwidth_mbps: 50_000,
    latency: Duration::from_micros(1),
    frag_overhead: Duration::from_micros(2),
    max_dim: 3,
};

const FILL: PathEstimate = PathEstimate {
    bandwidth_mbps: 300_000,
    latency: Duration::from_nanos(250),
    frag_overhead: Duration::from_micros(2),
    max_dim: 3,
};

impl PathEstimate {
    fn path(&self, src: Vec<MemoryClass>, dst: Vec<MemoryClass>) -> Path {
        Path::new(
            src,
            dst,
            self.bandwidth_mbps,
            self.latency,
            self.frag_overhead,
            self.max_dim,
        )
    }
}

/// The cheapest channel for a transfer and its estimated cost.
#[derive(Debug, Clone, Getters)]
pub struct Route {
    channel: Arc<Channel>,
    cost: Duration,
}

/// Owns the streams and channels of every device a backend exposes.
#[derive(Debug)]
pub struct DmaEngine {
    config: DmaConfig,
    streams: Arc<StreamTable>,
    channels: Vec<Arc<Channel>>,
}

impl DmaEngine {
    pub fn new(backend: Arc<dyn DeviceBackend>, config: DmaConfig) -> Result<Self> {
        let devices = backend.devices();
        if devices.is_empty() {
            return Err(DmaError::Config("device backend exposes no devices".into()));
        }
        let mut table = StreamTable::new();
        for &device in &devices {
            table.insert(device, Self::device_streams(backend.as_ref(), &config, device)?);
        }
        let streams = Arc::new(table);

        let mut channels = Vec::new();
        for &device in &devices {
            channels.extend(Self::device_channels(&config, &streams, device, &backend.peers(device)));
        }

        info!(
            devices = devices.len(),
            channels = channels.len(),
            d2d_streams = config.d2d_streams,
            rate_limit = config.rate_limit_enabled,
            "dma engine initialized"
        );

        Ok(Self {
            config,
            streams,
            channels,
        })
    }

    fn device_streams(
        backend: &dyn DeviceBackend,
        config: &DmaConfig,
        device: u32,
    ) -> Result<DeviceStreams> {
        let stream = |kind: StreamKind, estimate: &PathEstimate| -> Result<Arc<Stream>> {
            let limiter = if config.rate_limit_enabled {
                RateLimiter::new(estimate.bandwidth_mbps, config.rate_window())
            } else {
                RateLimiter::unlimited()
            };
            Ok(Arc::new(Stream::new(
                kind,
                backend.create_stream(kind)?,
                limiter,
                config.slow_completion_warn(),
            )))
        };

        let h2d = stream(StreamKind::HostToDevice { device }, &TO_DEVICE)?;
        let d2h = stream(StreamKind::DeviceToHost { device }, &FROM_DEVICE)?;
        let d2d = (0..config.d2d_streams.max(1))
            .map(|_| stream(StreamKind::DeviceToDevice { device }, &IN_DEVICE))
            .collect::<Result<Vec<_>>>()?;
        let p2p = backend
            .peers(device)
            .into_iter()
            .map(|peer| {
                let kind = StreamKind::PeerToPeer {
                    src: device,
                    dst: peer,
                };
                Ok((peer, stream(kind, &PEER_DEVICE)?))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(DeviceStreams::new(h2d, d2h, d2d, p2p))
    }

    fn device_channels(
        config: &DmaConfig,
        streams: &Arc<StreamTable>,
        device: u32,
        peers: &[u32],
    ) -> Vec<Arc<Channel>> {
        let local = MemoryClass::DeviceLocal(device);
        let copy_settings = ChannelSettings {
            min_chunk: config.min_copy_chunk_bytes,
            host_copy_max: config.host_copy_max_bytes,
            multithread: config.multithread_dma,
        };
        let channel = |kind, settings, paths: Vec<Path>| {
            let mut channel = Channel::new(kind, device, settings, streams.clone());
            for path in paths {
                channel.add_path(path);
            }
            Arc::new(channel)
        };

        let mut channels = vec![
            channel(
                ChannelKind::ToDevice,
                copy_settings,
                vec![TO_DEVICE.path(vec![MemoryClass::Host], vec![local])],
            ),
            channel(
                ChannelKind::FromDevice,
                copy_settings,
                vec![FROM_DEVICE.path(vec![local], vec![MemoryClass::Host])],
            ),
            channel(
                ChannelKind::InDevice,
                copy_settings,
                vec![IN_DEVICE.path(vec![local], vec![local])],
            ),
        ];

        if !peers.is_empty() {
            let remote: Vec<_> = peers.iter().map(|&p| MemoryClass::DevicePeer(p)).collect();
            channels.push(channel(
                ChannelKind::PeerDevice,
                copy_settings,
                vec![
                    PEER_DEVICE.path(vec![local], remote.clone()),
                    PEER_DEVICE.path(remote, vec![local]),
                ],
            ));
        }

        channels.push(channel(
            ChannelKind::Fill,
            ChannelSettings {
                min_chunk: config.min_fill_chunk_bytes,
                ..copy_settings
            },
            vec![FILL.path(Vec::new(), vec![local])],
        ));

        channels
    }

    pub fn config(&self) -> &DmaConfig {
        &self.config
    }

    pub fn streams(&self) -> &Arc<StreamTable> {
        &self.streams
    }

    pub fn channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    /// The channel of `kind` owned by `device`, if the engine created one.
    pub fn channel(&self, device: u32, kind: ChannelKind) -> Option<Arc<Channel>> {
        self.channels
            .iter()
            .find(|c| c.device() == device && c.kind() == kind)
            .cloned()
    }

    /// Cheapest channel that can move `bytes` in `fragments` pieces from `src`
    /// to `dst`. A missing `src` asks for a fill.
    pub fn find_route(
        &self,
        src: Option<StorageKind>,
        dst: StorageKind,
        bytes: u64,
        fragments: u64,
    ) -> Option<Route> {
        self.channels
            .iter()
            .filter_map(|channel| {
                let device = channel.device();
                let src = src.map(|kind| MemoryClass::classify(kind, device));
                let dst = MemoryClass::classify(dst, device);
                let cost = channel.cost(src, dst, bytes, fragments)?;
                Some(Route {
                    channel: channel.clone(),
                    cost,
                })
            })
            .min_by_key(|route| route.cost)
    }

    /// Route `request` over the cheapest channel and queue it there.
    ///
    /// The route is chosen from the first input and output that have
    /// addressable memory.
    pub fn create_descriptor(&self, request: DescriptorRequest) -> Result<Arc<TransferDescriptor>> {
        let kind_of = |specs: &[crate::port::PortSpec]| {
            specs
                .iter()
                .find_map(|spec| spec.memory.as_ref().map(|m| m.storage_kind()))
        };
        let dst = kind_of(&request.outputs).ok_or_else(|| {
            DmaError::InvalidPortWiring("no output has addressable memory".into())
        })?;
        let src = if request.fill_pattern.is_some() {
            None
        } else {
            Some(kind_of(&request.inputs).ok_or_else(|| {
                DmaError::InvalidPortWiring("no input has addressable memory".into())
            })?)
        };

        let bytes: usize = request
            .outputs
            .iter()
            .map(|spec| spec.addresses.bytes_pending())
            .sum();
        let fragments: usize = request.outputs.iter().map(|spec| spec.addresses.len()).sum();

        let route = self
            .find_route(src, dst, bytes as u64, fragments as u64)
            .ok_or_else(|| {
                DmaError::InvalidPortWiring(format!("no channel moves {src:?} to {dst}"))
            })?;
        route.channel.create_descriptor(request)
    }

    /// Fire every completion whose fence finished, on every stream.
    pub fn reap_completions(&self) -> Result<usize> {
        self.streams.reap_completions()
    }
}
