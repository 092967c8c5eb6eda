// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dynamo_dma::channel::{Channel, ChannelKind, ChannelSettings, Path};
use dynamo_dma::device::{DeviceBackend, HostBackend};
use dynamo_dma::stream::{DeviceStreams, RateLimiter, Stream, StreamTable};
use dynamo_dma::{MemoryClass, StreamKind};
use dynamo_memory::actions::host_bytes;
use dynamo_memory::{Buffer, MemoryDescription, StorageKind, SystemStorage, create_buffer};

/// Streams of a single emulated device 0, all sharing `limiter`'s settings.
pub fn streams(backend: &HostBackend, limiter: RateLimiter, d2d: usize) -> Arc<StreamTable> {
    let stream = |kind| {
        Arc::new(Stream::new(
            kind,
            backend.create_stream(kind).unwrap(),
            limiter.clone(),
            Duration::from_secs(60),
        ))
    };
    let mut table = StreamTable::new();
    table.insert(
        0,
        DeviceStreams::new(
            stream(StreamKind::HostToDevice { device: 0 }),
            stream(StreamKind::DeviceToHost { device: 0 }),
            (0..d2d)
                .map(|_| stream(StreamKind::DeviceToDevice { device: 0 }))
                .collect(),
            HashMap::new(),
        ),
    );
    Arc::new(table)
}

pub fn settings(host_copy_max: usize) -> ChannelSettings {
    ChannelSettings {
        min_chunk: 0,
        host_copy_max,
        multithread: false,
    }
}

/// A channel of device 0 with a single path.
pub fn channel(
    kind: ChannelKind,
    src: Vec<MemoryClass>,
    dst: Vec<MemoryClass>,
    max_dim: usize,
    settings: ChannelSettings,
    streams: Arc<StreamTable>,
) -> Channel {
    let mut channel = Channel::new(kind, 0, settings, streams);
    channel.add_path(Path::new(
        src,
        dst,
        10_000,
        Duration::from_micros(1),
        Duration::from_micros(2),
        max_dim,
    ));
    channel
}

pub fn fill_channel(max_dim: usize, streams: Arc<StreamTable>) -> Channel {
    channel(
        ChannelKind::Fill,
        Vec::new(),
        vec![MemoryClass::DeviceLocal(0)],
        max_dim,
        settings(usize::MAX),
        streams,
    )
}

pub fn buffer(len: usize, kind: StorageKind) -> Buffer {
    create_buffer(SystemStorage::emulating(len, kind).unwrap())
}

pub fn read_bytes(buffer: &Buffer) -> Vec<u8> {
    // SAFETY: host backend operations complete before submission returns
    unsafe { host_bytes(buffer) }.unwrap().to_vec()
}

/// Write `i % 251` to every byte `i` of a host-mapped buffer.
pub fn fill_sequence(buffer: &Buffer) {
    let ptr = buffer.addr() as *mut u8;
    for i in 0..buffer.size() {
        // SAFETY: the buffer is host memory of `size()` bytes
        unsafe { ptr.add(i).write((i % 251) as u8) };
    }
}
