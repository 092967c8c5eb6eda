// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! CUDA driver backend.
//!
//! Copies go through the unified virtual address space, so one code path
//! serves host, device and peer endpoints; the stream the engine picked
//! determines ordering, not the copy routine.

use std::collections::HashMap;
use std::sync::Arc;

use cudarc::driver::sys::{self, CUmemorytype, CUresult};
use cudarc::driver::{CudaContext, CudaEvent, CudaStream, DriverError, result as cuda_result};

use super::{
    CompletionChecker, CopyOp, CopyShape, DeviceBackend, DeviceStream, FillOp, FillShape,
};
use crate::fill::FillValue;
use crate::route::StreamKind;
use crate::{DmaError, Result};

/// Completion checker that polls CUDA event status.
pub struct CudaEventChecker {
    event: CudaEvent,
}

impl CompletionChecker for CudaEventChecker {
    fn is_complete(&self) -> Result<bool> {
        unsafe {
            match cuda_result::event::query(self.event.cu_event()) {
                Ok(()) => Ok(true),
                Err(DriverError(CUresult::CUDA_ERROR_NOT_READY)) => Ok(false),
                Err(e) => Err(DmaError::Device(format!("CUDA event query failed: {e:?}"))),
            }
        }
    }
}

/// Backend driving every visible CUDA device.
#[derive(Debug)]
pub struct CudaBackend {
    contexts: HashMap<u32, Arc<CudaContext>>,
    peers: HashMap<u32, Vec<u32>>,
}

impl CudaBackend {
    /// Open a context on every visible device and probe peer access.
    pub fn new() -> Result<Self> {
        let count = CudaContext::device_count()? as u32;
        let mut contexts = HashMap::new();
        for ordinal in 0..count {
            contexts.insert(ordinal, CudaContext::new(ordinal as usize)?);
        }

        let mut peers = HashMap::new();
        for src in 0..count {
            let mut reachable = Vec::new();
            for dst in (0..count).filter(|&d| d != src) {
                if can_access_peer(src, dst)? {
                    reachable.push(dst);
                }
            }
            tracing::debug!(device = src, peers = ?reachable, "probed peer access");
            peers.insert(src, reachable);
        }

        Ok(Self { contexts, peers })
    }

    fn context(&self, device: u32) -> Result<&Arc<CudaContext>> {
        self.contexts
            .get(&device)
            .ok_or(DmaError::UnknownDevice(device))
    }
}

fn can_access_peer(src: u32, dst: u32) -> Result<bool> {
    let mut can = 0i32;
    unsafe {
        let src_dev = cuda_result::device::get(src as i32)?;
        let dst_dev = cuda_result::device::get(dst as i32)?;
        sys::cuDeviceCanAccessPeer(&mut can, src_dev, dst_dev).result()?;
    }
    Ok(can != 0)
}

impl DeviceBackend for CudaBackend {
    fn devices(&self) -> Vec<u32> {
        let mut devices: Vec<u32> = self.contexts.keys().copied().collect();
        devices.sort_unstable();
        devices
    }

    fn peers(&self, device: u32) -> Vec<u32> {
        self.peers.get(&device).cloned().unwrap_or_default()
    }

    fn create_stream(&self, kind: StreamKind) -> Result<Box<dyn DeviceStream>> {
        let ctx = self.context(kind.device())?.clone();
        ctx.bind_to_thread()?;

        if let StreamKind::PeerToPeer { dst, .. } = kind {
            let peer = self.context(dst)?;
            // already-enabled is not an error for our purposes
            match unsafe { sys::cuCtxEnablePeerAccess(peer.cu_ctx(), 0) }.result() {
                Ok(()) | Err(DriverError(CUresult::CUDA_ERROR_PEER_ACCESS_ALREADY_ENABLED)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let stream = ctx.new_stream()?;
        Ok(Box::new(CudaDeviceStream { ctx, stream, kind }))
    }
}

#[derive(Debug)]
struct CudaDeviceStream {
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    kind: StreamKind,
}

impl DeviceStream for CudaDeviceStream {
    fn submit_copy(&self, op: &CopyOp) -> Result<()> {
        self.ctx.bind_to_thread()?;
        let cu_stream = self.stream.cu_stream();

        unsafe {
            match op.shape {
                CopyShape::Linear { bytes } => {
                    sys::cuMemcpyAsync(op.dst as u64, op.src as u64, bytes, cu_stream).result()?;
                }
                CopyShape::Strided2d {
                    width,
                    lines,
                    src_pitch,
                    dst_pitch,
                } => {
                    let mut copy: sys::CUDA_MEMCPY2D = std::mem::zeroed();
                    copy.srcMemoryType = CUmemorytype::CU_MEMORYTYPE_UNIFIED;
                    copy.srcDevice = op.src as u64;
                    copy.srcPitch = src_pitch;
                    copy.dstMemoryType = CUmemorytype::CU_MEMORYTYPE_UNIFIED;
                    copy.dstDevice = op.dst as u64;
                    copy.dstPitch = dst_pitch;
                    copy.WidthInBytes = width;
                    copy.Height = lines;
                    sys::cuMemcpy2DAsync_v2(&copy, cu_stream).result()?;
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
                    let mut copy: sys::CUDA_MEMCPY3D = std::mem::zeroed();
                    copy.srcMemoryType = CUmemorytype::CU_MEMORYTYPE_UNIFIED;
                    copy.srcDevice = op.src as u64;
                    copy.srcPitch = src_pitch;
                    copy.srcHeight = src_plane_stride / src_pitch;
                    copy.dstMemoryType = CUmemorytype::CU_MEMORYTYPE_UNIFIED;
                    copy.dstDevice = op.dst as u64;
                    copy.dstPitch = dst_pitch;
                    copy.dstHeight = dst_plane_stride / dst_pitch;
                    copy.WidthInBytes = width;
                    copy.Height = lines;
                    copy.Depth = planes;
                    sys::cuMemcpy3DAsync_v2(&copy, cu_stream).result()?;
                }
            }
        }

        tracing::trace!(stream = %self.kind, ?op, "cuda copy submitted");
        Ok(())
    }

    fn submit_fill(&self, op: &FillOp) -> Result<()> {
        self.ctx.bind_to_thread()?;
        let cu_stream = self.stream.cu_stream();
        let dst = op.dst as u64;

        unsafe {
            match (op.shape, op.value) {
                (FillShape::Linear { count }, FillValue::U8(v)) => {
                    sys::cuMemsetD8Async(dst, v, count, cu_stream).result()?;
                }
                (FillShape::Linear { count }, FillValue::U16(v)) => {
                    sys::cuMemsetD16Async(dst, v, count, cu_stream).result()?;
                }
                (FillShape::Linear { count }, FillValue::U32(v)) => {
                    sys::cuMemsetD32Async(dst, v, count, cu_stream).result()?;
                }
                (
                    FillShape::Strided2d {
                        width,
                        lines,
                        pitch,
                    },
                    FillValue::U8(v),
                ) => {
                    sys::cuMemsetD2D8Async(dst, pitch, v, width, lines, cu_stream).result()?;
                }
                (
                    FillShape::Strided2d {
                        width,
                        lines,
                        pitch,
                    },
                    FillValue::U16(v),
                ) => {
                    sys::cuMemsetD2D16Async(dst, pitch, v, width, lines, cu_stream).result()?;
                }
                (
                    FillShape::Strided2d {
                        width,
                        lines,
                        pitch,
                    },
                    FillValue::U32(v),
                ) => {
                    sys::cuMemsetD2D32Async(dst, pitch, v, width, lines, cu_stream).result()?;
                }
            }
        }

        tracing::trace!(stream = %self.kind, ?op, "cuda fill submitted");
        Ok(())
    }

    fn record_fence(&self) -> Result<Box<dyn CompletionChecker>> {
        self.ctx.bind_to_thread()?;
        let event = self.stream.record_event(None)?;
        Ok(Box::new(CudaEventChecker { event }))
    }
}
