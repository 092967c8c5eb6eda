// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Host-executed device backend.
//!
//! Operations run synchronously on the submitting thread with plain memory
//! copies, so every address handed to a [`HostStream`] must be host-mapped
//! (`SystemStorage`, including storage emulating device kinds). Fences complete
//! immediately unless the backend is holding them, in which case they complete
//! in recording order when released.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{
    CompletionChecker, CopyOp, CopyShape, DeviceBackend, DeviceStream, FillOp, FillShape,
};
use crate::route::StreamKind;
use crate::{DmaError, Result};

/// An operation as submitted to a host stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpRecord {
    Copy { stream: StreamKind, op: CopyOp },
    Fill { stream: StreamKind, op: FillOp },
}

impl OpRecord {
    pub fn stream(&self) -> StreamKind {
        match self {
            OpRecord::Copy { stream, .. } | OpRecord::Fill { stream, .. } => *stream,
        }
    }

    pub fn dims(&self) -> usize {
        match self {
            OpRecord::Copy { op, .. } => op.shape.dims(),
            OpRecord::Fill { op, .. } => op.shape.dims(),
        }
    }

    pub fn bytes(&self) -> usize {
        match self {
            OpRecord::Copy { op, .. } => op.shape.bytes(),
            OpRecord::Fill { op, .. } => op.bytes(),
        }
    }
}

#[derive(Debug, Default)]
struct HostState {
    ops: Mutex<Vec<OpRecord>>,
    next_fence: AtomicU64,
    released: AtomicU64,
    hold: AtomicBool,
    fail_next: AtomicBool,
}

impl HostState {
    fn check_injected_failure(&self) -> Result<()> {
        if self.fail_next.swap(false, Ordering::AcqRel) {
            return Err(DmaError::Device("injected device failure".into()));
        }
        Ok(())
    }
}

/// Backend that executes operations on the host.
#[derive(Debug, Clone)]
pub struct HostBackend {
    devices: Vec<u32>,
    peers_enabled: bool,
    state: Arc<HostState>,
}

impl HostBackend {
    /// Emulate `device_count` devices, all peers of each other.
    pub fn new(device_count: u32) -> Self {
        Self {
            devices: (0..device_count).collect(),
            peers_enabled: true,
            state: Arc::new(HostState::default()),
        }
    }

    /// Disable peer access between the emulated devices.
    pub fn without_peers(mut self) -> Self {
        self.peers_enabled = false;
        self
    }

    /// Keep every fence recorded from now on pending until released.
    pub fn hold_fences(&self, hold: bool) {
        self.state.hold.store(hold, Ordering::Release);
    }

    /// Complete every fence recorded so far.
    pub fn release_fences(&self) {
        let recorded = self.state.next_fence.load(Ordering::Acquire);
        self.state.released.fetch_max(recorded, Ordering::AcqRel);
    }

    /// Complete the fences recorded so far, up to `count` of them, in order.
    pub fn release_fences_up_to(&self, count: u64) {
        let recorded = self.state.next_fence.load(Ordering::Acquire);
        self.state
            .released
            .fetch_max(count.min(recorded), Ordering::AcqRel);
    }

    /// Number of fences recorded on all streams.
    pub fn fences_recorded(&self) -> u64 {
        self.state.next_fence.load(Ordering::Acquire)
    }

    /// Make the next submission fail with a device error.
    pub fn fail_next_submission(&self) {
        self.state.fail_next.store(true, Ordering::Release);
    }

    /// Snapshot of the operation log.
    pub fn ops(&self) -> Vec<OpRecord> {
        self.state.ops.lock().clone()
    }

    /// Largest dimensionality of any logged operation.
    pub fn max_op_dims(&self) -> usize {
        self.state
            .ops
            .lock()
            .iter()
            .map(OpRecord::dims)
            .max()
            .unwrap_or(0)
    }
}

impl DeviceBackend for HostBackend {
    fn devices(&self) -> Vec<u32> {
        self.devices.clone()
    }

    fn peers(&self, device: u32) -> Vec<u32> {
        if !self.peers_enabled {
            return Vec::new();
        }
        self.devices
            .iter()
            .copied()
            .filter(|&d| d != device)
            .collect()
    }

    fn create_stream(&self, kind: StreamKind) -> Result<Box<dyn DeviceStream>> {
        if !self.devices.contains(&kind.device()) {
            return Err(DmaError::UnknownDevice(kind.device()));
        }
        Ok(Box::new(HostStream {
            kind,
            state: self.state.clone(),
        }))
    }
}

/// Stream of a [`HostBackend`].
#[derive(Debug)]
pub struct HostStream {
    kind: StreamKind,
    state: Arc<HostState>,
}

struct HostFence {
    seq: u64,
    state: Arc<HostState>,
}

impl CompletionChecker for HostFence {
    fn is_complete(&self) -> Result<bool> {
        Ok(self.state.released.load(Ordering::Acquire) >= self.seq)
    }
}

impl DeviceStream for HostStream {
    fn submit_copy(&self, op: &CopyOp) -> Result<()> {
        self.state.check_injected_failure()?;

        // SAFETY: host streams only receive addresses of host-mapped storage
        // that ports validated against their buffer bounds.
        unsafe {
            match op.shape {
                CopyShape::Linear { bytes } => copy_bytes(op.src, op.dst, bytes),
                CopyShape::Strided2d {
                    width,
                    lines,
                    src_pitch,
                    dst_pitch,
                } => {
                    for l in 0..lines {
                        copy_bytes(op.src + l * src_pitch, op.dst + l * dst_pitch, width);
                    }
                }
                CopyShape::Strided3d {
                    width,
                    lines,
                    planes,
                    src_pitch,
                    dst_pitch,
                    src_plane_stride,
                    dst_plane_stride,
                } => {
                    for p in 0..planes {
                        for l in 0..lines {
                            copy_bytes(
                                op.src + p * src_plane_stride + l * src_pitch,
                                op.dst + p * dst_plane_stride + l * dst_pitch,
                                width,
                            );
                        }
                    }
                }
            }
        }

        self.state.ops.lock().push(OpRecord::Copy {
            stream: self.kind,
            op: *op,
        });
        Ok(())
    }

    fn submit_fill(&self, op: &FillOp) -> Result<()> {
        self.state.check_injected_failure()?;

        let value = op.value.to_bytes();
        let (width, lines, pitch) = match op.shape {
            FillShape::Linear { count } => (count, 1, 0),
            FillShape::Strided2d {
                width,
                lines,
                pitch,
            } => (width, lines, pitch),
        };

        // SAFETY: see submit_copy
        unsafe {
            for l in 0..lines {
                let row = (op.dst + l * pitch) as *mut u8;
                for e in 0..width {
                    std::ptr::copy_nonoverlapping(
                        value.as_ptr(),
                        row.add(e * value.len()),
                        value.len(),
                    );
                }
            }
        }

        self.state.ops.lock().push(OpRecord::Fill {
            stream: self.kind,
            op: *op,
        });
        Ok(())
    }

    fn record_fence(&self) -> Result<Box<dyn CompletionChecker>> {
        let seq = self.state.next_fence.fetch_add(1, Ordering::AcqRel) + 1;
        if !self.state.hold.load(Ordering::Acquire) {
            self.state.released.fetch_max(seq, Ordering::AcqRel);
        }
        Ok(Box::new(HostFence {
            seq,
            state: self.state.clone(),
        }))
    }
}

unsafe fn copy_bytes(src: usize, dst: usize, len: usize) {
    unsafe { std::ptr::copy(src as *const u8, dst as *mut u8, len) };
}
