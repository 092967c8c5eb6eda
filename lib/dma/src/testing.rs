// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Helpers for tests that drive descriptors through the host backend.

use dynamo_memory::Buffer;
use dynamo_memory::actions::host_bytes;

/// Copy out the bytes of a host-mapped buffer.
pub fn read_bytes(buffer: &Buffer) -> Vec<u8> {
    // SAFETY: tests only read after every submitted operation ran
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
