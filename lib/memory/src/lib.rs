// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Memory handles consumed by the DMA engine.
//!
//! This crate provides a small storage abstraction with:
//! - Single trait for type erasure (`MemoryDescription`)
//! - Concrete storage types (host allocations, and with the `cuda` feature
//!   pinned host and device frame-buffer allocations)
//! - A closed `StorageKind` tag so the DMA engine can classify endpoints
//!   without downcasting

pub mod actions;

mod system;

#[cfg(feature = "cuda")]
mod device;
#[cfg(feature = "cuda")]
mod pinned;

#[cfg(test)]
mod tests;

pub use system::SystemStorage;

#[cfg(feature = "cuda")]
pub use device::DeviceStorage;
#[cfg(feature = "cuda")]
pub use pinned::PinnedStorage;

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[cfg(feature = "cuda")]
    #[error("CUDA error: {0}")]
    Cuda(#[from] cudarc::driver::DriverError),
}

/// Storage type classification.
///
/// Every memory handle carries exactly one of these tags. Device-backed kinds
/// carry the ordinal of the owning device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageKind {
    /// Pageable system memory (malloc)
    System,

    /// Pinned (page-locked) host memory, mapped for device access
    Pinned,

    /// Device frame-buffer memory with device ID
    Device(u32),

    /// Device-resident scratch (intermediate buffer) memory with device ID
    DeviceScratch(u32),
}

impl StorageKind {
    /// Ordinal of the device that owns this memory, if any.
    pub fn device_id(&self) -> Option<u32> {
        match self {
            StorageKind::System | StorageKind::Pinned => None,
            StorageKind::Device(id) | StorageKind::DeviceScratch(id) => Some(*id),
        }
    }

    /// True for memory that lives on the host side of the bus.
    pub fn is_host(&self) -> bool {
        self.device_id().is_none()
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::System => write!(f, "system"),
            StorageKind::Pinned => write!(f, "pinned"),
            StorageKind::Device(id) => write!(f, "device({id})"),
            StorageKind::DeviceScratch(id) => write!(f, "device-scratch({id})"),
        }
    }
}

/// Core trait for memory regions that can be type-erased.
///
/// Concrete storage types implement this trait to enable type erasure via
/// `Arc<dyn MemoryDescription>`.
pub trait MemoryDescription: Send + Sync + fmt::Debug {
    /// Base address of the memory region.
    ///
    /// For device memory this is the device pointer, which is valid in the
    /// unified virtual address space shared with the host.
    fn addr(&self) -> usize;

    /// Size of the memory region in bytes.
    fn size(&self) -> usize;

    /// Type of storage backing this region.
    fn storage_kind(&self) -> StorageKind;

    /// Enable downcasting to concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// Type-erased, immutable memory handle.
#[derive(Clone)]
pub struct Buffer(Arc<dyn MemoryDescription>);

impl MemoryDescription for Buffer {
    fn addr(&self) -> usize {
        self.0.addr()
    }
    fn size(&self) -> usize {
        self.0.size()
    }
    fn storage_kind(&self) -> StorageKind {
        self.0.storage_kind()
    }
    fn as_any(&self) -> &dyn Any {
        self.0.as_any()
    }
}

impl std::ops::Deref for Buffer {
    type Target = dyn MemoryDescription;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("size", &self.size())
            .field("kind", &self.storage_kind())
            .finish()
    }
}

/// Helper function to convert concrete storage to type-erased form.
pub fn create_buffer<S: MemoryDescription + 'static>(memory: S) -> Buffer {
    Buffer(Arc::new(memory))
}
