// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fill pattern reduction.
//!
//! Device runtimes have native fills for 8, 16 and 32-bit values. A longer
//! pattern that merely repeats one of those units is reduced to it; anything
//! else is written with the generic row-replicate-then-double path.

use crate::{DmaError, Result};

/// Largest fill pattern accepted by a descriptor.
pub const MAX_FILL_PATTERN_BYTES: usize = 4096;

/// A value that a native fill primitive can replicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillValue {
    U8(u8),
    U16(u16),
    U32(u32),
}

impl FillValue {
    /// Width of one element in bytes.
    pub fn width(&self) -> usize {
        match self {
            FillValue::U8(_) => 1,
            FillValue::U16(_) => 2,
            FillValue::U32(_) => 4,
        }
    }

    /// The value as it appears in memory.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            FillValue::U8(v) => vec![*v],
            FillValue::U16(v) => v.to_ne_bytes().to_vec(),
            FillValue::U32(v) => v.to_ne_bytes().to_vec(),
        }
    }

    fn from_unit(unit: &[u8]) -> Option<Self> {
        match *unit {
            [b] => Some(FillValue::U8(b)),
            [a, b] => Some(FillValue::U16(u16::from_ne_bytes([a, b]))),
            [a, b, c, d] => Some(FillValue::U32(u32::from_ne_bytes([a, b, c, d]))),
            _ => None,
        }
    }
}

/// Outcome of reducing a fill pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillReduction {
    /// The pattern is `fill_size / width` repetitions of a native value.
    Native(FillValue),
    /// No native unit; the pattern is replicated byte column by byte column.
    Generic(Vec<u8>),
}

impl FillReduction {
    /// Reduce `pattern` to its smallest native repeating unit, if any.
    ///
    /// A single byte is always native. Otherwise the smallest proper period
    /// `p` in {1, 2, 4} (`p < len`, `len % p == 0`, every byte equal to the one
    /// `p` before it) selects the native value; without one the pattern takes
    /// the generic path.
    pub fn reduce(pattern: &[u8]) -> Result<Self> {
        if pattern.is_empty() {
            return Err(DmaError::InvalidFillSize("fill pattern is empty".into()));
        }
        if pattern.len() > MAX_FILL_PATTERN_BYTES {
            return Err(DmaError::InvalidFillSize(format!(
                "fill pattern of {} bytes exceeds the {MAX_FILL_PATTERN_BYTES} byte limit",
                pattern.len()
            )));
        }

        if pattern.len() == 1 {
            return Ok(FillReduction::Native(FillValue::U8(pattern[0])));
        }

        for period in [1usize, 2, 4] {
            if period >= pattern.len() || pattern.len() % period != 0 {
                continue;
            }
            if pattern[period..] == pattern[..pattern.len() - period]
                && let Some(value) = FillValue::from_unit(&pattern[..period])
            {
                return Ok(FillReduction::Native(value));
            }
        }

        Ok(FillReduction::Generic(pattern.to_vec()))
    }

    /// Bytes per fill element as seen by the address lists: the native width
    /// or the whole generic pattern.
    pub fn element_size(&self) -> usize {
        match self {
            FillReduction::Native(v) => v.width(),
            FillReduction::Generic(p) => p.len(),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, FillReduction::Native(_))
    }
}
