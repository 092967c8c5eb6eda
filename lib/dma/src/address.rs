// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Multi-dimensional address lists and the cursor that consumes them.
//!
//! An [`AddressEntry`] describes a rectangular byte range relative to the base
//! of a port's memory: dimension 0 is a run of contiguous bytes, and each higher
//! dimension repeats everything below it `extent` times at a fixed `stride`.
//! An [`AddressList`] is an ordered queue of entries that a producer may keep
//! appending to until it marks end-of-stream. The [`AddressListCursor`] walks
//! the list incrementally.
//!
//! The cursor keeps a position per dimension of the front entry. The lowest
//! dimension with a non-zero position is the *partial* dimension; the cursor
//! reports a dimensionality that stops at the partial dimension, so whatever a
//! caller sees through [`AddressListCursor::dim`] is always a regular box.

use std::collections::VecDeque;

use crate::{DmaError, Result};

/// Upper bound on dimensions a single entry may describe.
pub const MAX_ADDRESS_DIMS: usize = 8;

/// One rectangular range of an address list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressEntry {
    base: usize,
    extents: Vec<usize>,
    // strides[0] is unused and always 1
    strides: Vec<usize>,
    bytes: usize,
    end: usize,
}

impl AddressEntry {
    /// Build an entry from per-dimension extents and strides.
    ///
    /// `extents[0]` is the number of contiguous bytes. `strides[d]` for `d >= 1`
    /// is the byte distance between consecutive elements of dimension `d`;
    /// `strides[0]` is ignored.
    pub fn new(base: usize, extents: &[usize], strides: &[usize]) -> Result<Self> {
        if extents.is_empty() || extents.len() > MAX_ADDRESS_DIMS || extents.contains(&0) {
            return Err(DmaError::EmptyAddressList);
        }
        if strides.len() != extents.len() {
            return Err(DmaError::InvalidPortWiring(format!(
                "address entry has {} extents but {} strides",
                extents.len(),
                strides.len()
            )));
        }
        let mut strides = strides.to_vec();
        strides[0] = 1;

        let bytes = extents
            .iter()
            .try_fold(1usize, |acc, &extent| acc.checked_mul(extent))
            .ok_or(DmaError::AddressOverflow)?;
        let mut end = base.checked_add(extents[0]);
        for d in 1..extents.len() {
            let reach = (extents[d] - 1).checked_mul(strides[d]);
            end = end.zip(reach).and_then(|(end, reach)| end.checked_add(reach));
        }
        let end = end.ok_or(DmaError::AddressOverflow)?;

        Ok(Self {
            base,
            extents: extents.to_vec(),
            strides,
            bytes,
            end,
        })
    }

    /// A single run of `bytes` contiguous bytes.
    pub fn linear(base: usize, bytes: usize) -> Result<Self> {
        Self::new(base, &[bytes], &[1])
    }

    /// `lines` rows of `bytes` each, `line_stride` apart.
    pub fn strided_2d(base: usize, bytes: usize, lines: usize, line_stride: usize) -> Result<Self> {
        Self::new(base, &[bytes, lines], &[1, line_stride])
    }

    /// `planes` planes of `lines` rows of `bytes` each.
    pub fn strided_3d(
        base: usize,
        bytes: usize,
        lines: usize,
        line_stride: usize,
        planes: usize,
        plane_stride: usize,
    ) -> Result<Self> {
        Self::new(
            base,
            &[bytes, lines, planes],
            &[1, line_stride, plane_stride],
        )
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn dims(&self) -> usize {
        self.extents.len()
    }

    pub fn extent(&self, dim: usize) -> usize {
        self.extents[dim]
    }

    pub fn stride(&self, dim: usize) -> usize {
        self.strides[dim]
    }

    /// Total number of bytes described by the entry.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Highest byte offset touched by the entry, plus one.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Bytes covered by one unit of dimension `dim`.
    fn unit_bytes(&self, dim: usize) -> usize {
        self.extents[..dim].iter().product()
    }
}

/// Ordered queue of address entries with an end-of-stream marker.
#[derive(Debug, Clone, Default)]
pub struct AddressList {
    entries: VecDeque<AddressEntry>,
    bytes_pending: usize,
    eos: bool,
}

impl AddressList {
    pub fn new() -> Self {
        Self::default()
    }

    /// A closed list holding exactly `entries`.
    pub fn from_entries(entries: impl IntoIterator<Item = AddressEntry>) -> Self {
        let mut list = Self::new();
        for entry in entries {
            list.push(entry);
        }
        list.mark_eos();
        list
    }

    pub fn push(&mut self, entry: AddressEntry) {
        debug_assert!(!self.eos, "address list appended after end-of-stream");
        self.bytes_pending += entry.bytes();
        self.entries.push_back(entry);
    }

    /// No further entries will be appended.
    pub fn mark_eos(&mut self) {
        self.eos = true;
    }

    pub fn is_eos(&self) -> bool {
        self.eos
    }

    /// Bytes described by entries not yet consumed by the cursor.
    pub fn bytes_pending(&self) -> usize {
        self.bytes_pending
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AddressEntry> {
        self.entries.iter()
    }
}

/// Incremental reader over an [`AddressList`].
#[derive(Debug, Clone, Default)]
pub struct AddressListCursor {
    list: AddressList,
    pos: Vec<usize>,
}

impl AddressListCursor {
    pub fn new(list: AddressList) -> Self {
        let pos = list
            .entries
            .front()
            .map(|e| vec![0; e.dims()])
            .unwrap_or_default();
        Self { list, pos }
    }

    pub fn list(&self) -> &AddressList {
        &self.list
    }

    /// Append an entry to the underlying list.
    pub fn push(&mut self, entry: AddressEntry) {
        let was_empty = self.list.is_empty();
        self.list.push(entry);
        if was_empty {
            self.reset_position();
        }
    }

    pub fn mark_eos(&mut self) {
        self.list.mark_eos();
    }

    pub fn bytes_pending(&self) -> usize {
        self.list.bytes_pending
    }

    /// True once every entry was consumed and no more can arrive.
    pub fn is_drained(&self) -> bool {
        self.list.is_empty() && self.list.eos
    }

    fn front(&self) -> Option<&AddressEntry> {
        self.list.entries.front()
    }

    fn partial_dim(&self) -> Option<usize> {
        self.pos.iter().position(|&p| p != 0)
    }

    /// Dimensionality of the regular box starting at the current position.
    /// Zero when no entry is available.
    pub fn dim(&self) -> usize {
        let Some(entry) = self.front() else {
            return 0;
        };
        match self.partial_dim() {
            Some(d) => d + 1,
            None => entry.dims(),
        }
    }

    /// Units left in `dim` starting from the current position.
    pub fn remaining(&self, dim: usize) -> usize {
        let Some(entry) = self.front() else {
            return 0;
        };
        debug_assert!(dim < self.dim());
        if self.partial_dim() == Some(dim) {
            entry.extent(dim) - self.pos[dim]
        } else {
            entry.extent(dim)
        }
    }

    pub fn stride(&self, dim: usize) -> usize {
        self.front().map(|e| e.stride(dim)).unwrap_or(0)
    }

    /// Byte offset of the current position relative to the port memory.
    pub fn offset(&self) -> usize {
        let Some(entry) = self.front() else {
            return 0;
        };
        self.pos
            .iter()
            .enumerate()
            .fold(entry.base(), |acc, (d, &p)| acc + p * entry.stride(d))
    }

    /// Consume `count` units of dimension `dim`.
    ///
    /// All dimensions below `dim` must be at position zero, and `count` must not
    /// exceed [`remaining`](Self::remaining). Exhausting a dimension carries into
    /// the next one; exhausting the entry moves to the next entry.
    pub fn advance(&mut self, dim: usize, count: usize) {
        if count == 0 {
            return;
        }
        let Some(entry) = self.list.entries.front() else {
            debug_assert!(false, "advance on an empty address list");
            return;
        };
        debug_assert!(dim < self.dim(), "advance beyond reported dimension");
        debug_assert!(count <= self.remaining(dim), "advance past remaining");
        debug_assert!(self.pos[..dim].iter().all(|&p| p == 0));

        let consumed = count * entry.unit_bytes(dim);
        let dims = entry.dims();
        let extents = entry.extents.clone();

        self.list.bytes_pending -= consumed;
        self.pos[dim] += count;

        let mut d = dim;
        while self.pos[d] == extents[d] {
            self.pos[d] = 0;
            if d + 1 == dims {
                self.list.entries.pop_front();
                self.reset_position();
                return;
            }
            d += 1;
            self.pos[d] += 1;
        }
    }

    /// Consume `bytes` bytes in address order regardless of shape.
    pub fn skip_bytes(&mut self, mut bytes: usize) {
        while bytes > 0 {
            let top = self.dim();
            if top == 0 {
                debug_assert!(false, "skip past the end of the address list");
                return;
            }
            let mut d = top - 1;
            loop {
                let unit = self.front().map(|e| e.unit_bytes(d)).unwrap_or(1);
                let n = (bytes / unit).min(self.remaining(d));
                if n > 0 {
                    self.advance(d, n);
                    bytes -= n * unit;
                    break;
                }
                d -= 1;
            }
        }
    }

    fn reset_position(&mut self) {
        self.pos.clear();
        if let Some(entry) = self.list.entries.front() {
            self.pos.resize(entry.dims(), 0);
        }
    }
}
