// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Channels.
//!
//! A [`Channel`] is a data path of one device between classes of memory. It
//! describes itself with one or more [`Path`]s, each carrying a cost model
//! used for route selection, builds the descriptors that travel over it, and
//! owns their queue.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use strum::Display;
use tracing::{debug, info};

use crate::descriptor::{DescriptorKind, DescriptorRequest, TransferDescriptor, TransferLimits};
use crate::fill::FillReduction;
use crate::port::PortSpec;
use crate::route::MemoryClass;
use crate::stream::StreamTable;
use crate::time::TimeLimit;
use crate::{DmaError, Result};

static NEXT_GUID: AtomicU64 = AtomicU64::new(1);

/// What a channel is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ChannelKind {
    ToDevice,
    FromDevice,
    InDevice,
    PeerDevice,
    Fill,
}

/// One source/destination pairing of a channel and its cost estimates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub src_kinds: Vec<MemoryClass>,
    pub dst_kinds: Vec<MemoryClass>,
    /// Sustained bandwidth in MB/s.
    pub bandwidth_mbps: u64,
    pub latency: Duration,
    /// Cost of each fragment of a transfer.
    pub frag_overhead: Duration,
    pub max_dim: usize,
}

impl Path {
    pub fn new(
        src_kinds: impl Into<Vec<MemoryClass>>,
        dst_kinds: impl Into<Vec<MemoryClass>>,
        bandwidth_mbps: u64,
        latency: Duration,
        frag_overhead: Duration,
        max_dim: usize,
    ) -> Self {
        Self {
            src_kinds: src_kinds.into(),
            dst_kinds: dst_kinds.into(),
            bandwidth_mbps,
            latency,
            frag_overhead,
            max_dim,
        }
    }

    /// Estimated time to move `bytes` split over `fragments` pieces.
    pub fn cost(&self, bytes: u64, fragments: u64) -> Duration {
        let transfer_ns = if self.bandwidth_mbps == 0 {
            u64::MAX
        } else {
            // MB/s is bytes per microsecond
            bytes.saturating_mul(1000) / self.bandwidth_mbps
        };
        self.latency
            + Duration::from_nanos(transfer_ns)
            + self.frag_overhead * fragments.min(u32::MAX as u64) as u32
    }

    pub fn matches(&self, src: Option<MemoryClass>, dst: MemoryClass) -> bool {
        let src_ok = match src {
            Some(src) => self.src_kinds.contains(&src),
            None => self.src_kinds.is_empty(),
        };
        src_ok && self.dst_kinds.contains(&dst)
    }
}

/// Per-channel settings handed down to descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    pub min_chunk: usize,
    pub host_copy_max: usize,
    /// Progress every queued descriptor instead of only the head.
    pub multithread: bool,
}

#[derive(Debug)]
struct Queued {
    priority: i32,
    seq: u64,
    xd: Arc<TransferDescriptor>,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // max-heap: higher priority first, then older first
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A data path of one device.
#[derive(Debug)]
pub struct Channel {
    kind: ChannelKind,
    device: u32,
    paths: Vec<Path>,
    settings: ChannelSettings,
    streams: Arc<StreamTable>,
    queue: Mutex<BinaryHeap<Queued>>,
    next_seq: AtomicU64,
    progress_lock: Mutex<()>,
}

impl Channel {
    pub fn new(
        kind: ChannelKind,
        device: u32,
        settings: ChannelSettings,
        streams: Arc<StreamTable>,
    ) -> Self {
        Self {
            kind,
            device,
            paths: Vec::new(),
            settings,
            streams,
            queue: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
            progress_lock: Mutex::new(()),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn device(&self) -> u32 {
        self.device
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    /// Register a path. A fill channel's paths have no source kinds.
    pub fn add_path(&mut self, path: Path) {
        debug!(
            channel = %self.kind,
            device = self.device,
            src = ?path.src_kinds,
            dst = ?path.dst_kinds,
            bandwidth_mbps = path.bandwidth_mbps,
            max_dim = path.max_dim,
            "path added"
        );
        self.paths.push(path);
    }

    /// Cheapest cost of moving `bytes` in `fragments` pieces over this
    /// channel, if any path connects `src` to `dst`.
    pub fn cost(
        &self,
        src: Option<MemoryClass>,
        dst: MemoryClass,
        bytes: u64,
        fragments: u64,
    ) -> Option<Duration> {
        self.paths
            .iter()
            .filter(|p| p.matches(src, dst))
            .map(|p| p.cost(bytes, fragments))
            .min()
    }

    /// Build a descriptor for `request` and queue it on this channel.
    pub fn create_descriptor(&self, request: DescriptorRequest) -> Result<Arc<TransferDescriptor>> {
        if let Some(redop) = request.redop {
            return Err(DmaError::UnsupportedRedop(redop));
        }

        let kind = match (&request.fill_pattern, self.kind) {
            (Some(pattern), ChannelKind::Fill) => DescriptorKind::Fill {
                pattern_len: pattern.len(),
                reduction: FillReduction::reduce(pattern)?,
            },
            (Some(_), other) => {
                return Err(DmaError::InvalidFillSize(format!(
                    "{other} channel cannot fill"
                )));
            }
            (None, ChannelKind::Fill) => {
                return Err(DmaError::InvalidPortWiring(
                    "fill channel needs a fill pattern".into(),
                ));
            }
            (None, _) => DescriptorKind::Copy,
        };

        let path = self.select_path(&request.inputs, &request.outputs)?;
        let min_chunk = self.settings.min_chunk;
        let limits = TransferLimits {
            min_chunk,
            host_copy_max: self.settings.host_copy_max,
            max_dim: path.max_dim,
        };

        let guid = request
            .guid
            .unwrap_or_else(|| NEXT_GUID.fetch_add(1, Ordering::Relaxed));
        let xd = TransferDescriptor::new(
            guid,
            request.priority,
            self.device,
            kind,
            request.inputs,
            request.outputs,
            limits,
            self.streams.clone(),
        )?;

        info!(
            channel = %self.kind,
            device = self.device,
            xd = guid,
            priority = request.priority,
            max_dim = limits.max_dim,
            "descriptor created"
        );

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.queue.lock().push(Queued {
            priority: xd.priority(),
            seq,
            xd: xd.clone(),
        });
        Ok(xd)
    }

    /// Choose the path every addressable port of the request fits.
    fn select_path(&self, inputs: &[PortSpec], outputs: &[PortSpec]) -> Result<&Path> {
        let classify = |spec: &PortSpec| {
            spec.memory
                .as_ref()
                .map(|m| MemoryClass::classify(m.storage_kind(), self.device))
        };
        let srcs: Vec<_> = inputs.iter().filter_map(classify).collect();
        let dsts: Vec<_> = outputs.iter().filter_map(classify).collect();

        self.paths
            .iter()
            .find(|path| {
                let src_ok = srcs.iter().all(|s| path.src_kinds.contains(s));
                let dst_ok = dsts.iter().all(|d| path.dst_kinds.contains(d));
                src_ok && dst_ok
            })
            .ok_or_else(|| {
                DmaError::InvalidPortWiring(format!(
                    "{} channel of device {} has no path from {:?} to {:?}",
                    self.kind, self.device, srcs, dsts
                ))
            })
    }

    /// Descriptors waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Progress queued descriptors within `time_limit`. Returns whether any
    /// bytes moved.
    ///
    /// Descriptors whose iteration completed leave the queue; their remaining
    /// completions are delivered by the streams. Only one caller progresses a
    /// channel at a time; concurrent callers return immediately.
    pub fn progress(&self, time_limit: &TimeLimit) -> Result<bool> {
        let Some(_active) = self.progress_lock.try_lock() else {
            return Ok(false);
        };

        let batch: Vec<Queued> = {
            let mut queue = self.queue.lock();
            if self.settings.multithread {
                std::mem::take(&mut *queue).into_sorted_vec().into_iter().rev().collect()
            } else {
                queue.pop().into_iter().collect()
            }
        };

        let mut did_work = false;
        let mut requeue = Vec::with_capacity(batch.len());
        let mut result = Ok(());

        for entry in batch {
            if result.is_ok() && !time_limit.is_expired() {
                match entry.xd.progress(time_limit) {
                    Ok(work) => did_work |= work,
                    Err(e) => result = Err(e),
                }
            }
            if !entry.xd.is_iteration_completed() {
                requeue.push(entry);
            }
        }

        if !requeue.is_empty() {
            self.queue.lock().extend(requeue);
        }
        result.map(|_| did_work)
    }
}
