// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fill progress.
//!
//! Fills run on a device-to-device stream of the device that owns the output
//! memory. A reduced pattern is written with native fills, one 2D fill per
//! plane for 3D shapes. A generic pattern is first laid down along one line
//! with a strided byte fill per pattern byte, then the line is replicated by
//! doubling: each copy duplicates everything written so far, so `n` lines take
//! `O(log n)` submissions. Planes are doubled the same way with a 3D copy when
//! the plane stride is a whole number of lines, and copied one by one
//! otherwise.

use std::sync::Arc;

use super::{Batch, IterationState, ProgressState, TransferDescriptor};
use crate::completion::{PortSpan, TransferCompletion};
use crate::decompose::{CopyPlan, plan_fill};
use crate::device::{CopyDirection, CopyOp, CopyShape, FillOp, FillShape};
use crate::fill::{FillReduction, FillValue};
use crate::route::{MemoryClass, StreamKind};
use crate::stream::Stream;
use crate::time::TimeLimit;
use crate::{DmaError, Result};

impl TransferDescriptor {
    pub(super) fn progress_fill(
        self: &Arc<Self>,
        reduction: &FillReduction,
        time_limit: &TimeLimit,
    ) -> Result<bool> {
        let mut guard = self.state.lock();
        let state: &mut ProgressState = &mut guard;
        let mut did_work = false;

        loop {
            let avail = state.available(self.limits.min_chunk);
            if avail == 0 {
                break;
            }
            let batch = self.fill_batch(state, reduction, avail, time_limit)?;
            did_work |= batch.bytes > 0;
            if batch.rate_limited || batch.bytes == 0 || time_limit.is_expired() {
                break;
            }
        }

        if state.refresh() == IterationState::Completed {
            self.finish_iteration();
        }
        Ok(did_work)
    }

    fn fill_batch(
        self: &Arc<Self>,
        state: &mut ProgressState,
        reduction: &FillReduction,
        avail: usize,
        time_limit: &TimeLimit,
    ) -> Result<Batch> {
        let output = state.current_output;
        let dst = &mut state.outputs[output];

        let Some(memory) = dst.memory() else {
            dst.cursor.skip_bytes(avail);
            let write = dst.claim_span(avail);
            self.update_bytes_write(output, write, avail as u64);
            return Ok(Batch {
                bytes: avail,
                rate_limited: false,
            });
        };

        let class = MemoryClass::classify(memory.storage_kind(), self.device);
        let device = class.device().ok_or(DmaError::NoDeviceEndpoint {
            src: class,
            dst: class,
        })?;
        let stream = self.streams.get(StreamKind::DeviceToDevice { device })?;
        let base = memory.addr();
        let elem = reduction.element_size();
        // never below one element or plan_fill has nothing to offer
        let max_op_bytes = stream.max_op_bytes().max(elem);

        let mut total = 0;
        let mut rate_limited = false;
        while total < avail {
            let Some(plan) = plan_fill(
                &dst.cursor,
                (avail - total).min(max_op_bytes),
                elem,
                self.limits.max_dim,
            ) else {
                break;
            };
            if !stream.ok_to_submit(plan.bytes()) {
                rate_limited = true;
                break;
            }

            let addr = base + plan.dst.offset;
            match reduction {
                FillReduction::Native(value) => submit_native_fill(&stream, &plan, addr, *value)?,
                FillReduction::Generic(pattern) => {
                    submit_generic_fill(&stream, &plan, addr, pattern, self.limits.max_dim)?
                }
            }
            plan.commit_dst(&mut dst.cursor, plan.planes);
            total += plan.bytes();

            if total >= self.limits.min_chunk && time_limit.is_expired() {
                break;
            }
        }

        if total > 0 {
            let write = PortSpan {
                port: output,
                offset: dst.claim_span(total),
                size: total as u64,
            };
            let record = TransferCompletion::new(self.clone(), None, Some(write));
            stream.add_notification(Box::new(record))?;
        }

        Ok(Batch {
            bytes: total,
            rate_limited,
        })
    }
}

fn submit_native_fill(stream: &Stream, plan: &CopyPlan, addr: usize, value: FillValue) -> Result<()> {
    let width = plan.contig / value.width();

    if plan.dims == 1 {
        return stream.submit_fill(&FillOp {
            dst: addr,
            value,
            shape: FillShape::Linear { count: width },
        });
    }

    let shape = FillShape::Strided2d {
        width,
        lines: plan.lines,
        pitch: plan.dst.line_stride,
    };
    for plane in 0..plan.planes {
        stream.submit_fill(&FillOp {
            dst: addr + plane * plan.dst.plane_stride,
            value,
            shape,
        })?;
    }
    Ok(())
}

fn submit_generic_fill(
    stream: &Stream,
    plan: &CopyPlan,
    addr: usize,
    pattern: &[u8],
    max_dim: usize,
) -> Result<()> {
    let elems = plan.contig / pattern.len();
    let line_stride = plan.dst.line_stride;
    let plane_stride = plan.dst.plane_stride;

    // one strided byte fill per pattern byte writes the first line
    for (i, byte) in pattern.iter().enumerate() {
        stream.submit_fill(&FillOp {
            dst: addr + i,
            value: FillValue::U8(*byte),
            shape: FillShape::Strided2d {
                width: 1,
                lines: elems,
                pitch: pattern.len(),
            },
        })?;
    }

    let d2d = |src: usize, dst: usize, shape: CopyShape| {
        stream.submit_copy(&CopyOp {
            src,
            dst,
            shape,
            direction: CopyDirection::DeviceToDevice,
        })
    };

    let mut done = 1;
    while done < plan.lines {
        let todo = done.min(plan.lines - done);
        d2d(
            addr,
            addr + done * line_stride,
            CopyShape::Strided2d {
                width: plan.contig,
                lines: todo,
                src_pitch: line_stride,
                dst_pitch: line_stride,
            },
        )?;
        done += todo;
    }

    if plan.planes <= 1 {
        return Ok(());
    }

    if max_dim >= 3 && plan.dst.lines_per_plane().is_some() {
        let mut done = 1;
        while done < plan.planes {
            let todo = done.min(plan.planes - done);
            d2d(
                addr,
                addr + done * plane_stride,
                CopyShape::Strided3d {
                    width: plan.contig,
                    lines: plan.lines,
                    planes: todo,
                    src_pitch: line_stride,
                    dst_pitch: line_stride,
                    src_plane_stride: plane_stride,
                    dst_plane_stride: plane_stride,
                },
            )?;
            done += todo;
        }
    } else {
        for plane in 1..plan.planes {
            d2d(
                addr,
                addr + plane * plane_stride,
                CopyShape::Strided2d {
                    width: plan.contig,
                    lines: plan.lines,
                    src_pitch: line_stride,
                    dst_pitch: line_stride,
                },
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::{DescriptorKind, TransferLimits};
    use super::*;
    use crate::address::{AddressEntry, AddressList};
    use crate::device::{DeviceBackend, HostBackend, OpRecord};
    use crate::port::PortSpec;
    use crate::stream::{DeviceStreams, RateLimiter, StreamTable};
    use crate::testing;
    use assert_matches::assert_matches;
    use dynamo_memory::{StorageKind, SystemStorage, create_buffer};
    use std::collections::HashMap;
    use std::time::Duration;

    fn table(backend: &HostBackend) -> Arc<StreamTable> {
        let stream = |kind| {
            Arc::new(Stream::new(
                kind,
                backend.create_stream(kind).unwrap(),
                RateLimiter::unlimited(),
                Duration::from_secs(60),
            ))
        };
        let mut table = StreamTable::new();
        table.insert(
            0,
            DeviceStreams::new(
                stream(StreamKind::HostToDevice { device: 0 }),
                stream(StreamKind::DeviceToHost { device: 0 }),
                vec![stream(StreamKind::DeviceToDevice { device: 0 })],
                HashMap::new(),
            ),
        );
        Arc::new(table)
    }

    fn fill(
        backend: &HostBackend,
        pattern: &[u8],
        output: PortSpec,
        max_dim: usize,
    ) -> Arc<TransferDescriptor> {
        TransferDescriptor::new(
            7,
            0,
            0,
            DescriptorKind::Fill {
                pattern_len: pattern.len(),
                reduction: FillReduction::reduce(pattern).unwrap(),
            },
            Vec::new(),
            vec![output],
            TransferLimits {
                min_chunk: 0,
                host_copy_max: 1 << 20,
                max_dim,
            },
            table(backend),
        )
        .unwrap()
    }

    #[test]
    fn test_generic_fill_doubles_lines() {
        let backend = HostBackend::new(1);
        let memory = create_buffer(SystemStorage::emulating(64 * 16, StorageKind::Device(0)).unwrap());
        // 16 lines of 5 patterns, 64 bytes apart
        let list = AddressList::from_entries([AddressEntry::strided_2d(0, 15, 16, 64).unwrap()]);
        let xd = fill(&backend, &[1, 2, 3], PortSpec::new(memory.clone(), list), 3);

        assert!(xd.progress(&TimeLimit::unlimited()).unwrap());

        let ops = backend.ops();
        let fills = ops.iter().filter(|op| matches!(op, OpRecord::Fill { .. })).count();
        let copies = ops.iter().filter(|op| matches!(op, OpRecord::Copy { .. })).count();
        assert_eq!(fills, 3);
        // 1 -> 2 -> 4 -> 8 -> 16
        assert_eq!(copies, 4);

        let bytes = testing::read_bytes(&memory);
        for line in bytes.chunks(64) {
            assert_eq!(&line[..15], &[1, 2, 3, 1, 2, 3, 1, 2, 3, 1, 2, 3, 1, 2, 3]);
            assert!(line[15..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_generic_fill_planes_without_line_multiple() {
        let backend = HostBackend::new(1);
        let memory = create_buffer(SystemStorage::emulating(1024, StorageKind::Device(0)).unwrap());
        // plane stride 200 is not a multiple of the 32 byte line stride
        let entry = AddressEntry::strided_3d(0, 8, 3, 32, 4, 200).unwrap();
        let list = AddressList::from_entries([entry]);
        let xd = fill(&backend, &[9, 8], PortSpec::new(memory.clone(), list), 3);

        xd.progress(&TimeLimit::unlimited()).unwrap();
        assert_eq!(backend.max_op_dims(), 2);

        let bytes = testing::read_bytes(&memory);
        for plane in 0..4 {
            for line in 0..3 {
                let at = plane * 200 + line * 32;
                assert_eq!(&bytes[at..at + 8], &[9, 8, 9, 8, 9, 8, 9, 8]);
            }
        }
    }

    #[test]
    fn test_native_fill_is_one_submission_per_plane() {
        let backend = HostBackend::new(1);
        let memory = create_buffer(SystemStorage::emulating(4096, StorageKind::Device(0)).unwrap());
        let entry = AddressEntry::strided_3d(0, 64, 4, 128, 3, 1024).unwrap();
        let xd = fill(
            &backend,
            &[0xAB, 0xAB],
            PortSpec::new(memory.clone(), AddressList::from_entries([entry])),
            3,
        );

        xd.progress(&TimeLimit::unlimited()).unwrap();
        assert_eq!(backend.ops().len(), 3);
        assert_eq!(backend.max_op_dims(), 2);
        assert!(xd.is_iteration_completed());

        let bytes = testing::read_bytes(&memory);
        assert_eq!(bytes.iter().filter(|&&b| b == 0xAB).count(), 64 * 4 * 3);
    }

    #[test]
    fn test_fill_requires_device_memory() {
        let backend = HostBackend::new(1);
        let memory = create_buffer(SystemStorage::new(64).unwrap());
        let xd = fill(&backend, &[1], PortSpec::whole(memory).unwrap(), 3);
        assert_matches!(
            xd.progress(&TimeLimit::unlimited()),
            Err(DmaError::NoDeviceEndpoint { .. })
        );
    }
}
