// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

mod common;

use dynamo_dma::channel::ChannelKind;
use dynamo_dma::decompose::plan_copy;
use dynamo_dma::device::HostBackend;
use dynamo_dma::stream::RateLimiter;
use dynamo_dma::{
    AddressEntry, AddressList, AddressListCursor, DescriptorRequest, MemoryClass, PortSpec,
    TimeLimit,
};
use dynamo_memory::StorageKind;
use proptest::prelude::*;

/// A 3D box with padding between lines and planes.
#[derive(Debug, Clone, Copy)]
struct BoxShape {
    bytes: usize,
    lines: usize,
    planes: usize,
    line_pad: usize,
    plane_pad: usize,
}

impl BoxShape {
    fn line_stride(&self) -> usize {
        self.bytes + self.line_pad
    }

    fn plane_stride(&self) -> usize {
        self.lines * self.line_stride() + self.plane_pad
    }

    fn total(&self) -> usize {
        self.bytes * self.lines * self.planes
    }

    fn entry(&self) -> AddressEntry {
        self.entry_at(0)
    }

    fn entry_at(&self, base: usize) -> AddressEntry {
        AddressEntry::strided_3d(
            base,
            self.bytes,
            self.lines,
            self.line_stride(),
            self.planes,
            self.plane_stride(),
        )
        .unwrap()
    }

    /// Offset of the `n`-th byte of the box in address order.
    fn offset_of(&self, n: usize) -> usize {
        let plane = n / (self.bytes * self.lines);
        let line = (n / self.bytes) % self.lines;
        plane * self.plane_stride() + line * self.line_stride() + n % self.bytes
    }

    fn span(&self) -> usize {
        self.entry().end()
    }
}

/// Place `shapes` one after another, `gap` bytes apart.
fn lay_out(shapes: &[BoxShape], gap: usize) -> Vec<AddressEntry> {
    let mut base = 0;
    shapes
        .iter()
        .map(|shape| {
            let entry = shape.entry_at(base);
            base = entry.end() + gap;
            entry
        })
        .collect()
}

/// Cover `total` bytes with a padded box of `bytes`-wide lines and
/// `lines`-line planes, then a 2D and a linear tail for what is left.
fn reshape(total: usize, template: BoxShape) -> Vec<BoxShape> {
    let mut shapes = Vec::new();
    let mut left = total;
    let plane = template.bytes * template.lines;
    if left >= plane {
        shapes.push(BoxShape {
            planes: left / plane,
            ..template
        });
        left %= plane;
    }
    if left >= template.bytes {
        shapes.push(BoxShape {
            lines: left / template.bytes,
            planes: 1,
            ..template
        });
        left %= template.bytes;
    }
    if left > 0 {
        shapes.push(BoxShape {
            bytes: left,
            lines: 1,
            planes: 1,
            line_pad: 0,
            plane_pad: 0,
        });
    }
    shapes
}

/// Offset of every byte of `entries`, in address order.
fn byte_offsets(entries: &[AddressEntry]) -> Vec<usize> {
    let mut offsets = Vec::new();
    for entry in entries {
        for n in 0..entry.bytes() {
            let mut rest = n / entry.extent(0);
            let mut at = entry.base() + n % entry.extent(0);
            for d in 1..entry.dims() {
                at += (rest % entry.extent(d)) * entry.stride(d);
                rest /= entry.extent(d);
            }
            offsets.push(at);
        }
    }
    offsets
}

/// Two independent multi-entry lists describing the same number of bytes.
fn list_pair() -> impl Strategy<Value = (Vec<AddressEntry>, Vec<AddressEntry>)> {
    (
        prop::collection::vec(box_shape(), 1..4),
        box_shape(),
        0usize..13,
        0usize..13,
    )
        .prop_map(|(src_shapes, template, src_gap, dst_gap)| {
            let total = src_shapes.iter().map(BoxShape::total).sum();
            (
                lay_out(&src_shapes, src_gap),
                lay_out(&reshape(total, template), dst_gap),
            )
        })
}

fn box_shape() -> impl Strategy<Value = BoxShape> {
    (1usize..24, 1usize..6, 1usize..5, 0usize..9, 0usize..17).prop_map(
        |(bytes, lines, planes, line_pad, plane_pad)| BoxShape {
            bytes,
            lines,
            planes,
            line_pad,
            plane_pad,
        },
    )
}

proptest! {
    #[test]
    fn plans_account_for_every_byte(
        shape in box_shape(),
        budgets in prop::collection::vec(1usize..96, 1..8),
        max_dim in 1usize..4,
        box_is_source in any::<bool>(),
    ) {
        let boxed = AddressListCursor::new(AddressList::from_entries([shape.entry()]));
        let linear = AddressListCursor::new(AddressList::from_entries([
            AddressEntry::linear(0, shape.total()).unwrap(),
        ]));
        let (mut src, mut dst) = if box_is_source { (boxed, linear) } else { (linear, boxed) };

        let mut consumed = 0;
        let mut step = 0;
        while let Some(plan) = plan_copy(&src, &dst, budgets[step % budgets.len()], max_dim) {
            let budget = budgets[step % budgets.len()];
            prop_assert!(plan.bytes() > 0);
            prop_assert!(plan.bytes() <= budget);
            prop_assert!(plan.dims <= 3);
            if max_dim == 1 {
                prop_assert_eq!(plan.dims, 1);
            }

            let (src_before, dst_before) = (src.bytes_pending(), dst.bytes_pending());
            plan.commit(&mut src, &mut dst, plan.planes);
            prop_assert_eq!(src_before - src.bytes_pending(), plan.bytes());
            prop_assert_eq!(dst_before - dst.bytes_pending(), plan.bytes());

            consumed += plan.bytes();
            step += 1;
        }

        prop_assert_eq!(consumed, shape.total());
        prop_assert_eq!(src.bytes_pending(), 0);
        prop_assert_eq!(dst.bytes_pending(), 0);
    }

    #[test]
    fn plans_follow_both_lists_in_address_order(
        (src_entries, dst_entries) in list_pair(),
        budgets in prop::collection::vec(1usize..96, 1..8),
        max_dim in 1usize..4,
    ) {
        let src_offsets = byte_offsets(&src_entries);
        let dst_offsets = byte_offsets(&dst_entries);
        prop_assert_eq!(src_offsets.len(), dst_offsets.len());

        let mut src = AddressListCursor::new(AddressList::from_entries(src_entries));
        let mut dst = AddressListCursor::new(AddressList::from_entries(dst_entries));

        let mut consumed = 0;
        let mut step = 0;
        while let Some(plan) = plan_copy(&src, &dst, budgets[step % budgets.len()], max_dim) {
            prop_assert!(plan.bytes() > 0);
            prop_assert!(plan.bytes() <= budgets[step % budgets.len()]);
            prop_assert_eq!(plan.src.offset, src_offsets[consumed]);
            prop_assert_eq!(plan.dst.offset, dst_offsets[consumed]);

            let (src_before, dst_before) = (src.bytes_pending(), dst.bytes_pending());
            plan.commit(&mut src, &mut dst, plan.planes);
            prop_assert_eq!(src_before - src.bytes_pending(), plan.bytes());
            prop_assert_eq!(dst_before - dst.bytes_pending(), plan.bytes());

            consumed += plan.bytes();
            step += 1;
        }

        prop_assert_eq!(consumed, src_offsets.len());
        prop_assert_eq!(src.bytes_pending(), 0);
        prop_assert_eq!(dst.bytes_pending(), 0);
    }

    #[test]
    fn copies_between_multi_entry_lists_keep_byte_order(
        (src_entries, dst_entries) in list_pair(),
        host_copy_max in 1usize..128,
        max_dim in 1usize..4,
    ) {
        let backend = HostBackend::new(1);
        let streams = common::streams(&backend, RateLimiter::unlimited(), 1);
        let channel = common::channel(
            ChannelKind::ToDevice,
            vec![MemoryClass::Host],
            vec![MemoryClass::DeviceLocal(0)],
            max_dim,
            common::settings(host_copy_max),
            streams.clone(),
        );

        let src_offsets = byte_offsets(&src_entries);
        let dst_offsets = byte_offsets(&dst_entries);
        let src_span = src_entries.iter().map(AddressEntry::end).max().unwrap();
        let dst_span = dst_entries.iter().map(AddressEntry::end).max().unwrap();
        let src = common::buffer(src_span, StorageKind::Pinned);
        let dst = common::buffer(dst_span, StorageKind::Device(0));
        common::fill_sequence(&src);

        let xd = channel
            .create_descriptor(DescriptorRequest::copy(
                PortSpec::new(src.clone(), AddressList::from_entries(src_entries)),
                PortSpec::new(dst.clone(), AddressList::from_entries(dst_entries)),
            ))
            .unwrap();
        prop_assert!(channel.progress(&TimeLimit::unlimited()).unwrap());
        prop_assert!(xd.is_iteration_completed());
        prop_assert!(backend.max_op_dims() <= max_dim);
        prop_assert!(backend.ops().iter().all(|op| op.bytes() <= host_copy_max));

        streams.reap_completions().unwrap();
        prop_assert!(xd.is_done());
        prop_assert_eq!(xd.bytes_written(0), dst_offsets.len() as u64);

        let src_bytes = common::read_bytes(&src);
        let dst_bytes = common::read_bytes(&dst);
        for (n, (s, d)) in src_offsets.iter().zip(&dst_offsets).enumerate() {
            prop_assert_eq!(dst_bytes[*d], src_bytes[*s], "byte {}", n);
        }
    }

    #[test]
    fn gather_copies_land_in_address_order(
        shape in box_shape(),
        host_copy_max in 1usize..128,
        max_dim in 1usize..4,
    ) {
        let backend = HostBackend::new(1);
        let streams = common::streams(&backend, RateLimiter::unlimited(), 1);
        let channel = common::channel(
            ChannelKind::ToDevice,
            vec![MemoryClass::Host],
            vec![MemoryClass::DeviceLocal(0)],
            max_dim,
            common::settings(host_copy_max),
            streams.clone(),
        );

        let src = common::buffer(shape.span(), StorageKind::Pinned);
        let dst = common::buffer(shape.total(), StorageKind::Device(0));
        common::fill_sequence(&src);

        let xd = channel
            .create_descriptor(DescriptorRequest::copy(
                PortSpec::new(src.clone(), AddressList::from_entries([shape.entry()])),
                PortSpec::whole(dst.clone()).unwrap(),
            ))
            .unwrap();
        prop_assert!(channel.progress(&TimeLimit::unlimited()).unwrap());
        prop_assert!(xd.is_iteration_completed());
        prop_assert!(backend.max_op_dims() <= max_dim);
        prop_assert!(backend.ops().iter().all(|op| op.bytes() <= host_copy_max));

        streams.reap_completions().unwrap();
        prop_assert!(xd.is_done());
        prop_assert_eq!(xd.bytes_read(0), shape.total() as u64);

        let src_bytes = common::read_bytes(&src);
        let dst_bytes = common::read_bytes(&dst);
        for (n, byte) in dst_bytes.iter().enumerate() {
            prop_assert_eq!(*byte, src_bytes[shape.offset_of(n)], "byte {}", n);
        }
    }
}
