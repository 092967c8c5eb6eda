// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use super::{Batch, IterationState, ProgressState, TransferDescriptor};
use crate::Result;
use crate::completion::{PortSpan, TransferCompletion};
use crate::decompose::{CopyPlan, plan_copy};
use crate::device::{CopyDirection, CopyOp, CopyShape};
use crate::port::TransferPort;
use crate::route::{MemoryClass, StreamKind, select_stream};
use crate::stream::Stream;
use crate::time::TimeLimit;

/// Endpoints of one copy batch, resolved once per batch.
struct CopyRoute {
    stream: Arc<Stream>,
    direction: CopyDirection,
    src_base: usize,
    dst_base: usize,
    max_op_bytes: usize,
}

/// Result of pushing one plan to a stream.
#[derive(Debug, Clone, Copy, Default)]
struct Submitted {
    bytes: usize,
    rate_limited: bool,
}

impl TransferDescriptor {
    pub(super) fn progress_copy(self: &Arc<Self>, time_limit: &TimeLimit) -> Result<bool> {
        let mut guard = self.state.lock();
        let state: &mut ProgressState = &mut guard;
        let mut did_work = false;

        loop {
            let avail = state.available(self.limits.min_chunk);
            if avail == 0 {
                break;
            }
            let batch = self.copy_batch(state, avail, time_limit)?;
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

    fn copy_batch(
        self: &Arc<Self>,
        state: &mut ProgressState,
        avail: usize,
        time_limit: &TimeLimit,
    ) -> Result<Batch> {
        let (input, output) = (state.current_input, state.current_output);
        let src = &mut state.inputs[input];
        let dst = &mut state.outputs[output];

        let Some(route) = self.copy_route(src, dst)? else {
            // no addressable memory on one side: account the bytes, move nothing
            src.cursor.skip_bytes(avail);
            dst.cursor.skip_bytes(avail);
            let read = src.claim_span(avail);
            let write = dst.claim_span(avail);
            self.update_bytes_read(input, read, avail as u64);
            self.update_bytes_write(output, write, avail as u64);
            return Ok(Batch {
                bytes: avail,
                rate_limited: false,
            });
        };

        let mut total = 0;
        let mut rate_limited = false;
        while total < avail {
            let budget = (avail - total).min(route.max_op_bytes);
            let Some(plan) = plan_copy(&src.cursor, &dst.cursor, budget, self.limits.max_dim)
            else {
                break;
            };
            let submitted = self.submit_plan(&route, &plan, src, dst, time_limit)?;
            total += submitted.bytes;
            if submitted.rate_limited {
                rate_limited = true;
                break;
            }
            if submitted.bytes < plan.bytes() {
                // per-plane submission stopped at a time check
                break;
            }
            if total >= self.limits.min_chunk && time_limit.is_expired() {
                break;
            }
        }

        if total > 0 {
            let read = PortSpan {
                port: input,
                offset: src.claim_span(total),
                size: total as u64,
            };
            let write = PortSpan {
                port: output,
                offset: dst.claim_span(total),
                size: total as u64,
            };
            let record = TransferCompletion::new(self.clone(), Some(read), Some(write));
            route.stream.add_notification(Box::new(record))?;
        }

        Ok(Batch {
            bytes: total,
            rate_limited,
        })
    }

    /// Pick the stream for the current port pair, or `None` for the skip path.
    fn copy_route(&self, src: &TransferPort, dst: &TransferPort) -> Result<Option<CopyRoute>> {
        let (Some(src_mem), Some(dst_mem)) = (src.memory(), dst.memory()) else {
            return Ok(None);
        };

        let kind = select_stream(
            MemoryClass::classify(src_mem.storage_kind(), self.device),
            MemoryClass::classify(dst_mem.storage_kind(), self.device),
        )?;
        let stream = self.streams.get(kind)?;
        let host_clamp = match kind {
            StreamKind::HostToDevice { .. } | StreamKind::DeviceToHost { .. } => {
                self.limits.host_copy_max.max(1)
            }
            StreamKind::DeviceToDevice { .. } | StreamKind::PeerToPeer { .. } => usize::MAX,
        };
        let max_op_bytes = host_clamp.min(stream.max_op_bytes());

        Ok(Some(CopyRoute {
            stream,
            direction: CopyDirection::from(kind),
            src_base: src_mem.addr(),
            dst_base: dst_mem.addr(),
            max_op_bytes,
        }))
    }

    /// Submit `plan` and advance both cursors past whatever was submitted.
    fn submit_plan(
        &self,
        route: &CopyRoute,
        plan: &CopyPlan,
        src: &mut TransferPort,
        dst: &mut TransferPort,
        time_limit: &TimeLimit,
    ) -> Result<Submitted> {
        let src_addr = route.src_base + plan.src.offset;
        let dst_addr = route.dst_base + plan.dst.offset;

        let shape = match plan.dims {
            1 => Some(CopyShape::Linear {
                bytes: plan.contig,
            }),
            2 => Some(CopyShape::Strided2d {
                width: plan.contig,
                lines: plan.lines,
                src_pitch: plan.src.line_stride,
                dst_pitch: plan.dst.line_stride,
            }),
            _ if self.limits.max_dim >= 3 && plan.native_3d_compatible() => {
                Some(CopyShape::Strided3d {
                    width: plan.contig,
                    lines: plan.lines,
                    planes: plan.planes,
                    src_pitch: plan.src.line_stride,
                    dst_pitch: plan.dst.line_stride,
                    src_plane_stride: plan.src.plane_stride,
                    dst_plane_stride: plan.dst.plane_stride,
                })
            }
            _ => None,
        };

        if let Some(shape) = shape {
            if route.stream.ok_to_submit(plan.bytes()) {
                route.stream.submit_copy(&CopyOp {
                    src: src_addr,
                    dst: dst_addr,
                    shape,
                    direction: route.direction,
                })?;
                plan.commit(&mut src.cursor, &mut dst.cursor, plan.planes);
                return Ok(Submitted {
                    bytes: plan.bytes(),
                    rate_limited: false,
                });
            }
            if plan.dims < 3 {
                return Ok(Submitted {
                    bytes: 0,
                    rate_limited: true,
                });
            }
        }

        // one 2D operation per plane
        let mut planes = 0;
        let mut rate_limited = false;
        while planes < plan.planes {
            if !route.stream.ok_to_submit(plan.plane_bytes()) {
                rate_limited = true;
                break;
            }
            route.stream.submit_copy(&CopyOp {
                src: src_addr + planes * plan.src.plane_stride,
                dst: dst_addr + planes * plan.dst.plane_stride,
                shape: CopyShape::Strided2d {
                    width: plan.contig,
                    lines: plan.lines,
                    src_pitch: plan.src.line_stride,
                    dst_pitch: plan.dst.line_stride,
                },
                direction: route.direction,
            })?;
            planes += 1;
            if time_limit.is_expired() {
                break;
            }
        }

        plan.commit(&mut src.cursor, &mut dst.cursor, planes);
        Ok(Submitted {
            bytes: planes * plan.plane_bytes(),
            rate_limited,
        })
    }
}
