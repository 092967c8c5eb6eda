// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Device runtime abstraction.
//!
//! The engine talks to accelerators through two traits: a [`DeviceBackend`]
//! that enumerates devices and creates streams, and a [`DeviceStream`] that
//! accepts asynchronous native copy and fill operations in order and records
//! fences. Two backends are provided:
//!
//! - [`HostBackend`] executes operations on host-addressable memory. It keeps
//!   an operation log and can hold fences open, which makes it the backend of
//!   choice for tests.
//! - `CudaBackend` (feature `cuda`) issues the operations through the CUDA
//!   driver API.

mod host;

#[cfg(feature = "cuda")]
mod cuda;

pub use host::{HostBackend, HostStream, OpRecord};

#[cfg(feature = "cuda")]
pub use cuda::CudaBackend;

use crate::Result;
use crate::fill::FillValue;
use crate::route::StreamKind;

/// Trait for checking if a submitted group of operations has completed.
pub trait CompletionChecker: Send {
    /// Returns true once every operation submitted before the fence finished.
    fn is_complete(&self) -> Result<bool>;
}

/// Direction of a native copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyDirection {
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
    PeerToPeer,
}

impl From<StreamKind> for CopyDirection {
    fn from(kind: StreamKind) -> Self {
        match kind {
            StreamKind::HostToDevice { .. } => CopyDirection::HostToDevice,
            StreamKind::DeviceToHost { .. } => CopyDirection::DeviceToHost,
            StreamKind::DeviceToDevice { .. } => CopyDirection::DeviceToDevice,
            StreamKind::PeerToPeer { .. } => CopyDirection::PeerToPeer,
        }
    }
}

/// Shape of a native copy. Widths and strides are in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyShape {
    Linear {
        bytes: usize,
    },
    Strided2d {
        width: usize,
        lines: usize,
        src_pitch: usize,
        dst_pitch: usize,
    },
    /// Plane strides must be whole multiples of the matching pitch.
    Strided3d {
        width: usize,
        lines: usize,
        planes: usize,
        src_pitch: usize,
        dst_pitch: usize,
        src_plane_stride: usize,
        dst_plane_stride: usize,
    },
}

impl CopyShape {
    pub fn dims(&self) -> usize {
        match self {
            CopyShape::Linear { .. } => 1,
            CopyShape::Strided2d { .. } => 2,
            CopyShape::Strided3d { .. } => 3,
        }
    }

    pub fn bytes(&self) -> usize {
        match *self {
            CopyShape::Linear { bytes } => bytes,
            CopyShape::Strided2d { width, lines, .. } => width * lines,
            CopyShape::Strided3d {
                width,
                lines,
                planes,
                ..
            } => width * lines * planes,
        }
    }
}

/// One asynchronous copy between absolute addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOp {
    pub src: usize,
    pub dst: usize,
    pub shape: CopyShape,
    pub direction: CopyDirection,
}

/// Shape of a native fill, counted in elements of the fill value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillShape {
    Linear { count: usize },
    /// `width` elements per line, `pitch` bytes between lines.
    Strided2d {
        width: usize,
        lines: usize,
        pitch: usize,
    },
}

impl FillShape {
    pub fn dims(&self) -> usize {
        match self {
            FillShape::Linear { .. } => 1,
            FillShape::Strided2d { .. } => 2,
        }
    }

    pub fn elements(&self) -> usize {
        match *self {
            FillShape::Linear { count } => count,
            FillShape::Strided2d { width, lines, .. } => width * lines,
        }
    }
}

/// One asynchronous fill of an absolute address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillOp {
    pub dst: usize,
    pub value: FillValue,
    pub shape: FillShape,
}

impl FillOp {
    pub fn bytes(&self) -> usize {
        self.shape.elements() * self.value.width()
    }
}

/// An ordered queue of asynchronous device operations.
pub trait DeviceStream: Send + Sync + std::fmt::Debug {
    fn submit_copy(&self, op: &CopyOp) -> Result<()>;

    fn submit_fill(&self, op: &FillOp) -> Result<()>;

    /// Record a fence covering every operation submitted so far.
    fn record_fence(&self) -> Result<Box<dyn CompletionChecker>>;
}

/// Enumerates devices and creates their streams.
pub trait DeviceBackend: Send + Sync + std::fmt::Debug {
    /// Ordinals of the devices this backend drives.
    fn devices(&self) -> Vec<u32>;

    /// Devices that `device` can reach with peer-to-peer copies.
    fn peers(&self, device: u32) -> Vec<u32>;

    /// Create a new stream of `kind` owned by `kind.device()`.
    fn create_stream(&self, kind: StreamKind) -> Result<Box<dyn DeviceStream>>;
}
