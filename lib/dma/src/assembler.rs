// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Completed-byte accounting for one port.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Tracks which byte spans of a port's stream have completed.
///
/// Spans are reported by completion records, possibly out of order when
/// batches of the same descriptor land on different device streams. The
/// assembler exposes the contiguous completed prefix; spans past a gap are held
/// until the gap fills.
#[derive(Debug, Default)]
pub struct SequenceAssembler {
    contig: AtomicU64,
    // start -> end of spans beyond the contiguous prefix
    pending: Mutex<BTreeMap<u64, u64>>,
}

impl SequenceAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes completed without gaps from the start of the stream.
    pub fn contiguous_bytes(&self) -> u64 {
        self.contig.load(Ordering::Acquire)
    }

    /// Record `[start, start + len)` as complete. Returns the new contiguous
    /// prefix length.
    pub fn add_span(&self, start: u64, len: u64) -> u64 {
        if len == 0 {
            return self.contiguous_bytes();
        }

        let mut pending = self.pending.lock();
        let mut contig = self.contig.load(Ordering::Acquire);
        debug_assert!(start >= contig, "span [{start}, +{len}) already completed");

        if start != contig {
            debug_assert!(
                pending
                    .range(..start + len)
                    .next_back()
                    .is_none_or(|(_, &end)| end <= start),
                "overlapping completion span"
            );
            pending.insert(start, start + len);
            return contig;
        }

        contig += len;
        while let Some(end) = pending.remove(&contig) {
            contig = end;
        }
        self.contig.store(contig, Ordering::Release);
        contig
    }

    /// True when no out-of-order spans are waiting on a gap.
    #[cfg(test)]
    fn is_settled(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
