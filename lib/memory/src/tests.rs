// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tests for the memory handle API.

use super::actions::{Slice, host_bytes};
use super::*;
use assert_matches::assert_matches;
use rstest::rstest;

#[test]
fn test_system_storage() {
    let storage = SystemStorage::new(1024).unwrap();
    assert_eq!(storage.size(), 1024);
    assert_eq!(storage.storage_kind(), StorageKind::System);
    assert!(storage.addr() != 0);
    assert_eq!(storage.addr() % 4096, 0, "host allocations are page aligned");

    // Test that we can create multiple allocations
    let storage2 = SystemStorage::new(2048).unwrap();
    assert_eq!(storage2.size(), 2048);
    assert_ne!(storage.addr(), storage2.addr());
}

#[test]
fn test_system_storage_zero_size() {
    let result = SystemStorage::new(0);
    assert_matches!(result, Err(StorageError::AllocationFailed(_)));
}

#[rstest]
#[case(StorageKind::Pinned, None)]
#[case(StorageKind::Device(1), Some(1))]
#[case(StorageKind::DeviceScratch(3), Some(3))]
fn test_emulated_kinds(#[case] kind: StorageKind, #[case] device: Option<u32>) {
    let storage = SystemStorage::emulating(64, kind).unwrap();
    assert_eq!(storage.storage_kind(), kind);
    assert_eq!(storage.storage_kind().device_id(), device);
    assert_eq!(storage.storage_kind().is_host(), device.is_none());
}

#[test]
fn test_slice() {
    let storage = SystemStorage::new(128).unwrap();
    let bytes = unsafe { storage.as_slice() }.unwrap();
    assert_eq!(bytes.len(), 128);
    assert!(bytes.iter().all(|&b| b == 0));

    assert_eq!(storage.slice(16, 4).unwrap(), &[0; 4]);
    assert!(storage.slice(120, 16).is_err());
}

#[test]
fn test_type_erasure() {
    let buffer = create_buffer(SystemStorage::emulating(256, StorageKind::Device(0)).unwrap());
    assert_eq!(buffer.size(), 256);
    assert_eq!(buffer.storage_kind(), StorageKind::Device(0));

    let bytes = unsafe { host_bytes(&buffer) }.unwrap();
    assert_eq!(bytes.len(), 256);

    let clone = buffer.clone();
    assert_eq!(clone.addr(), buffer.addr());
}
