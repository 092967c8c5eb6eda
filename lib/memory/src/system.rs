// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Page-aligned host memory storage.

use super::{MemoryDescription, Result, StorageError, StorageKind, actions};
use aligned_vec::{AVec, ConstAlign, avec};
use std::any::Any;

const PAGE_ALIGN: usize = 4096;

/// Page-aligned host allocation.
///
/// By default the allocation reports [`StorageKind::System`]. [`SystemStorage::emulating`]
/// produces host memory that reports another kind, which lets the host device
/// backend stand in for frame-buffer or pinned memory when no accelerator is present.
#[derive(Debug)]
pub struct SystemStorage {
    // Owns the allocation; all access goes through `ptr`.
    _data: AVec<u8, ConstAlign<PAGE_ALIGN>>,
    ptr: usize,
    len: usize,
    kind: StorageKind,
}

unsafe impl Send for SystemStorage {}
unsafe impl Sync for SystemStorage {}

impl SystemStorage {
    /// Allocate zeroed, page-aligned host memory.
    pub fn new(len: usize) -> Result<Self> {
        Self::emulating(len, StorageKind::System)
    }

    /// Allocate zeroed host memory that reports `kind` as its storage kind.
    pub fn emulating(len: usize, kind: StorageKind) -> Result<Self> {
        if len == 0 {
            return Err(StorageError::AllocationFailed(
                "zero-sized allocations are not supported".into(),
            ));
        }

        let mut data: AVec<u8, ConstAlign<PAGE_ALIGN>> = avec![[4096]| 0u8; len];
        let ptr = data.as_mut_ptr() as usize;

        Ok(Self {
            _data: data,
            ptr,
            len,
            kind,
        })
    }
}

impl MemoryDescription for SystemStorage {
    fn addr(&self) -> usize {
        self.ptr
    }

    fn size(&self) -> usize {
        self.len
    }

    fn storage_kind(&self) -> StorageKind {
        self.kind
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl actions::Slice for SystemStorage {
    unsafe fn as_slice(&self) -> Result<&[u8]> {
        Ok(unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) })
    }
}
