// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Host-side actions on locally mapped storage.

use super::{Buffer, MemoryDescription, StorageError};

/// Extension trait for storage types whose bytes are readable from the host.
pub trait Slice: MemoryDescription + 'static {
    /// Returns an immutable byte slice view of the entire storage region
    ///
    /// # Safety
    /// The caller must ensure:
    /// - The memory region remains valid for the lifetime of the returned slice
    /// - No concurrent mutable access (including in-flight DMA) occurs while the
    ///   slice is in use
    unsafe fn as_slice(&self) -> Result<&[u8], StorageError>;

    /// Returns an immutable byte slice view of a subregion
    fn slice(&self, offset: usize, len: usize) -> Result<&[u8], StorageError> {
        // SAFETY: Caller guarantees memory validity per trait's safety contract
        let slice = unsafe { self.as_slice()? };

        slice
            .get(offset..offset.saturating_add(len))
            .ok_or_else(|| StorageError::Unsupported("slice out of bounds".into()))
    }
}

/// Read the bytes of a type-erased host-mapped buffer.
///
/// Only storage that implements [`Slice`] is readable; anything else (device
/// frame-buffer memory in particular) is rejected.
///
/// # Safety
/// Same contract as [`Slice::as_slice`].
pub unsafe fn host_bytes(buffer: &Buffer) -> Result<&[u8], StorageError> {
    if let Some(system) = buffer.as_any().downcast_ref::<super::SystemStorage>() {
        return unsafe { system.as_slice() };
    }

    #[cfg(feature = "cuda")]
    if let Some(pinned) = buffer.as_any().downcast_ref::<super::PinnedStorage>() {
        return unsafe { pinned.as_slice() };
    }

    Err(StorageError::Unsupported(format!(
        "{} memory is not readable from the host",
        buffer.storage_kind()
    )))
}
