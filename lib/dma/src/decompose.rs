// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shape planning for native copy operations.
//!
//! [`plan_copy`] looks at the current position of a source and a destination
//! cursor and picks the largest regular shape both sides can express within a
//! byte budget. Growth goes 1D, then 2D, then 3D:
//!
//! - `contig` is the shortest dim-0 run of the two sides, capped by the budget.
//! - For a second dimension, a side whose dim-0 run is longer than `contig` is
//!   split into `contig`-sized lines; a side that ran out of dim 0 exactly uses
//!   its own dim-1 stride.
//! - A third dimension is grown the same way from the lines.
//!
//! The planner only reads the cursors; [`CopyPlan::commit`] applies the result.

use crate::address::AddressListCursor;

/// How one side steps through a planned shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideStep {
    /// Cursor dimension advanced by the outermost planned dimension.
    pub dim: usize,
    /// Cursor units consumed per outermost element.
    pub scale: usize,
    /// Byte distance between lines.
    pub line_stride: usize,
    /// Byte distance between planes.
    pub plane_stride: usize,
    /// Cursor byte offset at the start of the shape.
    pub offset: usize,
}

impl SideStep {
    fn linear(offset: usize) -> Self {
        Self {
            dim: 0,
            scale: 1,
            line_stride: 0,
            plane_stride: 0,
            offset,
        }
    }

    /// Pitch of each plane in lines when planes are evenly spaced lines.
    pub fn lines_per_plane(&self) -> Option<usize> {
        if self.line_stride == 0 || self.plane_stride % self.line_stride != 0 {
            return None;
        }
        Some(self.plane_stride / self.line_stride)
    }
}

/// A regular shape consumable by both cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyPlan {
    pub dims: usize,
    pub contig: usize,
    pub lines: usize,
    pub planes: usize,
    pub src: SideStep,
    pub dst: SideStep,
}

impl CopyPlan {
    pub fn bytes(&self) -> usize {
        self.contig * self.lines * self.planes
    }

    pub fn plane_bytes(&self) -> usize {
        self.contig * self.lines
    }

    /// Both sides lay their planes out as whole numbers of lines, which is
    /// what a native 3D primitive can express.
    pub fn native_3d_compatible(&self) -> bool {
        self.dims == 3
            && self.src.lines_per_plane().is_some()
            && self.dst.lines_per_plane().is_some()
    }

    /// Advance both cursors past the first `planes` planes of the plan.
    ///
    /// For 1D and 2D plans `planes` is ignored; the whole shape is consumed.
    pub fn commit(&self, src: &mut AddressListCursor, dst: &mut AddressListCursor, planes: usize) {
        self.advance(&self.src, src, planes);
        self.advance(&self.dst, dst, planes);
    }

    /// Advance only the destination cursor, for plans made by [`plan_fill`].
    pub fn commit_dst(&self, dst: &mut AddressListCursor, planes: usize) {
        self.advance(&self.dst, dst, planes);
    }

    fn advance(&self, step: &SideStep, cursor: &mut AddressListCursor, planes: usize) {
        debug_assert!(planes <= self.planes);
        match self.dims {
            1 => cursor.advance(0, self.contig),
            2 => cursor.advance(step.dim, self.lines * step.scale),
            _ => cursor.advance(step.dim, planes * step.scale),
        }
    }
}

/// Per-side growth state while planning.
struct Side {
    // effective dimensionality; reduced when a split leaves a remainder
    dims: usize,
    dim: usize,
    scale: usize,
    count: usize,
    line_stride: usize,
    plane_stride: usize,
}

impl Side {
    fn grow_lines(cursor: &AddressListCursor, contig: usize) -> Self {
        let rem0 = cursor.remaining(0);
        let mut dims = cursor.dim();
        if contig < rem0 {
            let lines = rem0 / contig;
            if lines * contig != rem0 {
                dims = 1;
            }
            Self {
                dims,
                dim: 0,
                scale: contig,
                count: lines,
                line_stride: contig,
                plane_stride: 0,
            }
        } else {
            debug_assert!(dims > 1);
            Self {
                dims,
                dim: 1,
                scale: 1,
                count: cursor.remaining(1),
                line_stride: cursor.stride(1),
                plane_stride: 0,
            }
        }
    }

    fn stops_at_lines(&self, lines: usize) -> bool {
        lines == self.count && self.dim == self.dims - 1
    }

    fn grow_planes(&mut self, cursor: &AddressListCursor, lines: usize) {
        if lines < self.count {
            self.plane_stride = self.line_stride * lines;
            self.count /= lines;
            self.scale *= lines;
        } else {
            self.dim += 1;
            debug_assert!(self.dims > self.dim);
            self.count = cursor.remaining(self.dim);
            self.plane_stride = cursor.stride(self.dim);
            self.scale = 1;
        }
    }

    fn step(&self, offset: usize) -> SideStep {
        SideStep {
            dim: self.dim,
            scale: self.scale,
            line_stride: self.line_stride,
            plane_stride: self.plane_stride,
            offset,
        }
    }
}

/// Plan the next native copy between two cursors.
///
/// Returns `None` when either cursor has no address available or the budget is
/// zero. `max_dim` of 1 restricts the plan to a single contiguous run; anything
/// larger permits up to three dimensions (callers unroll 3D plans when the
/// channel cannot issue them natively).
pub fn plan_copy(
    src: &AddressListCursor,
    dst: &AddressListCursor,
    budget: usize,
    max_dim: usize,
) -> Option<CopyPlan> {
    if budget == 0 || src.dim() == 0 || dst.dim() == 0 {
        return None;
    }

    let src_rem = src.remaining(0);
    let dst_rem = dst.remaining(0);
    let contig = src_rem.min(dst_rem).min(budget);

    let src_offset = src.offset();
    let dst_offset = dst.offset();

    if max_dim <= 1
        || contig == budget
        || (contig == src_rem && src.dim() == 1)
        || (contig == dst_rem && dst.dim() == 1)
    {
        return Some(CopyPlan {
            dims: 1,
            contig,
            lines: 1,
            planes: 1,
            src: SideStep::linear(src_offset),
            dst: SideStep::linear(dst_offset),
        });
    }

    let mut s = Side::grow_lines(src, contig);
    let mut d = Side::grow_lines(dst, contig);
    let lines = s.count.min(d.count).min(budget / contig);

    if contig * lines == budget || s.stops_at_lines(lines) || d.stops_at_lines(lines) {
        return Some(CopyPlan {
            dims: 2,
            contig,
            lines,
            planes: 1,
            src: s.step(src_offset),
            dst: d.step(dst_offset),
        });
    }

    s.grow_planes(src, lines);
    d.grow_planes(dst, lines);
    let planes = s.count.min(d.count).min(budget / (contig * lines));

    Some(CopyPlan {
        dims: 3,
        contig,
        lines,
        planes,
        src: s.step(src_offset),
        dst: d.step(dst_offset),
    })
}

/// Plan the next native fill shape for a single destination cursor.
///
/// Fill shapes follow the same growth rules as copies with the destination
/// cursor on both sides, `elem` being the pattern size: `contig` is a whole
/// number of elements.
pub fn plan_fill(
    dst: &AddressListCursor,
    budget: usize,
    elem: usize,
    max_dim: usize,
) -> Option<CopyPlan> {
    if dst.dim() == 0 {
        return None;
    }
    let budget = budget - budget % elem;
    let plan = plan_copy(dst, dst, budget, max_dim)?;
    debug_assert_eq!(plan.contig % elem, 0, "fill run is not a whole element");
    Some(plan)
}
