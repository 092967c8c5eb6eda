// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Transfer descriptors.
//!
//! A [`TransferDescriptor`] is the unit of work a channel progresses. It owns
//! its ports and is driven by repeated calls to
//! [`progress`](TransferDescriptor::progress), each of which turns as much of
//! the remaining address space into native device operations as the time limit
//! and the stream rate limiters allow.
//!
//! Byte accounting is split in two. A port's cursor and submitted-byte count
//! move when operations are *submitted*; the per-port completed-byte counters
//! move only when the completion record of a batch fires. A descriptor is done
//! once its iteration is complete and every record that references it fired.

mod copy;
mod fill;
mod request;

pub use request::{DescriptorRequest, DescriptorRequestBuilder};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use strum::Display;
use tokio::sync::Notify;
use tracing::debug;

use crate::address::AddressEntry;
use crate::assembler::SequenceAssembler;
use crate::fill::FillReduction;
use crate::port::{PortSpec, TransferPort};
use crate::stream::StreamTable;
use crate::time::TimeLimit;
use crate::{DmaError, Result};

/// Where a descriptor stands in consuming its address lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum IterationState {
    /// Addresses are available and being consumed.
    Running,
    /// Every address received so far was consumed; more may still arrive.
    AddressExhausted,
    /// All address lists are drained and closed.
    Completed,
}

/// What a descriptor does with its ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorKind {
    Copy,
    Fill {
        /// Size of one element of the unreduced pattern.
        pattern_len: usize,
        reduction: FillReduction,
    },
}

/// Tunables a channel hands to each descriptor it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLimits {
    /// Do not start a batch smaller than this unless the lists are closed.
    pub min_chunk: usize,
    /// Per-operation clamp for copies that touch host memory.
    pub host_copy_max: usize,
    /// Highest dimensionality of a native operation on this channel.
    pub max_dim: usize,
}

/// Port selection and iteration state, guarded by the descriptor lock.
#[derive(Debug)]
struct ProgressState {
    inputs: Vec<TransferPort>,
    outputs: Vec<TransferPort>,
    current_input: usize,
    current_output: usize,
    iteration: IterationState,
}

/// Outcome of one batch inside a progress call.
#[derive(Debug, Clone, Copy, Default)]
struct Batch {
    bytes: usize,
    rate_limited: bool,
}

impl ProgressState {
    fn advance_ports(&mut self) {
        advance_side(&self.inputs, &mut self.current_input);
        advance_side(&self.outputs, &mut self.current_output);
    }

    /// Bytes both sides can supply right now, or zero when a side has less
    /// than `min_chunk` pending and its list is still open.
    fn available(&mut self, min_chunk: usize) -> usize {
        self.advance_ports();

        let mut avail = usize::MAX;
        let mut closed = true;
        for port in [
            self.inputs.get(self.current_input),
            self.outputs.get(self.current_output),
        ]
        .into_iter()
        .flatten()
        {
            avail = avail.min(port.cursor.bytes_pending());
            closed &= port.cursor.list().is_eos();
        }

        if avail == usize::MAX || avail == 0 {
            return 0;
        }
        if avail < min_chunk && !closed {
            return 0;
        }
        avail
    }

    fn refresh(&mut self) -> IterationState {
        self.advance_ports();
        let drained = self.inputs.iter().all(TransferPort::is_drained)
            && self.outputs.iter().all(TransferPort::is_drained);

        self.iteration = if drained {
            IterationState::Completed
        } else if self.available(0) == 0 {
            IterationState::AddressExhausted
        } else {
            IterationState::Running
        };
        self.iteration
    }
}

fn advance_side(ports: &[TransferPort], current: &mut usize) {
    while *current + 1 < ports.len() && ports[*current].is_drained() {
        *current += 1;
    }
}

/// A copy or fill in progress.
pub struct TransferDescriptor {
    guid: u64,
    priority: i32,
    device: u32,
    kind: DescriptorKind,
    limits: TransferLimits,
    streams: Arc<StreamTable>,
    state: Mutex<ProgressState>,
    read_progress: Vec<SequenceAssembler>,
    write_progress: Vec<SequenceAssembler>,
    iteration_completed: AtomicBool,
    outstanding: AtomicUsize,
    transfer_done: AtomicBool,
    done_notify: Notify,
}

impl fmt::Debug for TransferDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferDescriptor")
            .field("guid", &self.guid)
            .field("priority", &self.priority)
            .field("device", &self.device)
            .field("kind", &self.kind)
            .field("iteration_completed", &self.is_iteration_completed())
            .field("outstanding", &self.outstanding_references())
            .finish()
    }
}

impl TransferDescriptor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        guid: u64,
        priority: i32,
        device: u32,
        kind: DescriptorKind,
        inputs: Vec<PortSpec>,
        outputs: Vec<PortSpec>,
        limits: TransferLimits,
        streams: Arc<StreamTable>,
    ) -> Result<Arc<Self>> {
        match &kind {
            DescriptorKind::Copy if inputs.is_empty() || outputs.is_empty() => {
                return Err(DmaError::InvalidPortWiring(format!(
                    "copy needs at least one input and one output, got {} and {}",
                    inputs.len(),
                    outputs.len()
                )));
            }
            DescriptorKind::Fill { .. } if !inputs.is_empty() || outputs.is_empty() => {
                return Err(DmaError::InvalidPortWiring(format!(
                    "fill takes no inputs and at least one output, got {} and {}",
                    inputs.len(),
                    outputs.len()
                )));
            }
            DescriptorKind::Fill { pattern_len, .. } => {
                for spec in &outputs {
                    for entry in spec.addresses.iter() {
                        check_fill_entry(entry, *pattern_len)?;
                    }
                }
            }
            DescriptorKind::Copy => {}
        }

        let inputs = inputs
            .into_iter()
            .map(TransferPort::new)
            .collect::<Result<Vec<_>>>()?;
        let outputs = outputs
            .into_iter()
            .map(TransferPort::new)
            .collect::<Result<Vec<_>>>()?;

        let read_progress = inputs.iter().map(|_| SequenceAssembler::new()).collect();
        let write_progress = outputs.iter().map(|_| SequenceAssembler::new()).collect();

        Ok(Arc::new(Self {
            guid,
            priority,
            device,
            kind,
            limits,
            streams,
            state: Mutex::new(ProgressState {
                inputs,
                outputs,
                current_input: 0,
                current_output: 0,
                iteration: IterationState::Running,
            }),
            read_progress,
            write_progress,
            iteration_completed: AtomicBool::new(false),
            outstanding: AtomicUsize::new(0),
            transfer_done: AtomicBool::new(false),
            done_notify: Notify::new(),
        }))
    }

    pub fn guid(&self) -> u64 {
        self.guid
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Device whose channel created the descriptor.
    pub fn device(&self) -> u32 {
        self.device
    }

    pub fn kind(&self) -> &DescriptorKind {
        &self.kind
    }

    pub fn limits(&self) -> TransferLimits {
        self.limits
    }

    /// Submit work until the address lists run dry, `time_limit` expires, or a
    /// stream's rate limiter pushes back. Returns whether any bytes moved.
    ///
    /// Device errors are returned as-is and leave the descriptor unusable.
    pub fn progress(self: &Arc<Self>, time_limit: &TimeLimit) -> Result<bool> {
        if self.is_iteration_completed() {
            return Ok(false);
        }
        match &self.kind {
            DescriptorKind::Copy => self.progress_copy(time_limit),
            DescriptorKind::Fill { reduction, .. } => self.progress_fill(reduction, time_limit),
        }
    }

    pub fn iteration_state(&self) -> IterationState {
        self.state.lock().iteration
    }

    /// True once every address list was consumed and closed.
    pub fn is_iteration_completed(&self) -> bool {
        self.iteration_completed.load(Ordering::Acquire)
    }

    /// True once the iteration completed and every completion record fired.
    pub fn is_done(&self) -> bool {
        self.transfer_done.load(Ordering::Acquire)
    }

    /// Resolves once [`is_done`](Self::is_done) becomes true.
    pub async fn wait_done(&self) {
        loop {
            let notified = self.done_notify.notified();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }

    /// Append an address range to input port `port`.
    pub fn append_input(&self, port: usize, entry: AddressEntry) -> Result<()> {
        let mut state = self.state.lock();
        let target = state
            .inputs
            .get_mut(port)
            .ok_or_else(|| DmaError::InvalidPortWiring(format!("no input port {port}")))?;
        target.append(entry)
    }

    /// Append an address range to output port `port`.
    pub fn append_output(&self, port: usize, entry: AddressEntry) -> Result<()> {
        if let DescriptorKind::Fill { pattern_len, .. } = &self.kind {
            check_fill_entry(&entry, *pattern_len)?;
        }
        let mut state = self.state.lock();
        let target = state
            .outputs
            .get_mut(port)
            .ok_or_else(|| DmaError::InvalidPortWiring(format!("no output port {port}")))?;
        target.append(entry)
    }

    /// Close the address list of input port `port`.
    pub fn mark_input_eos(&self, port: usize) -> Result<()> {
        let mut state = self.state.lock();
        let target = state
            .inputs
            .get_mut(port)
            .ok_or_else(|| DmaError::InvalidPortWiring(format!("no input port {port}")))?;
        target.mark_eos();
        Ok(())
    }

    /// Close the address list of output port `port`.
    pub fn mark_output_eos(&self, port: usize) -> Result<()> {
        let mut state = self.state.lock();
        let target = state
            .outputs
            .get_mut(port)
            .ok_or_else(|| DmaError::InvalidPortWiring(format!("no output port {port}")))?;
        target.mark_eos();
        Ok(())
    }

    /// Bytes of input port `port` whose reads completed, without gaps.
    pub fn bytes_read(&self, port: usize) -> u64 {
        self.read_progress
            .get(port)
            .map(SequenceAssembler::contiguous_bytes)
            .unwrap_or(0)
    }

    /// Bytes of output port `port` durably written, without gaps.
    pub fn bytes_written(&self, port: usize) -> u64 {
        self.write_progress
            .get(port)
            .map(SequenceAssembler::contiguous_bytes)
            .unwrap_or(0)
    }

    pub(crate) fn update_bytes_read(&self, port: usize, offset: u64, size: u64) {
        match self.read_progress.get(port) {
            Some(asm) => {
                asm.add_span(offset, size);
            }
            None => debug_assert!(false, "read completion for unknown port {port}"),
        }
    }

    pub(crate) fn update_bytes_write(&self, port: usize, offset: u64, size: u64) {
        match self.write_progress.get(port) {
            Some(asm) => {
                asm.add_span(offset, size);
            }
            None => debug_assert!(false, "write completion for unknown port {port}"),
        }
    }

    /// Completion records currently holding a reference.
    pub fn outstanding_references(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub(crate) fn add_reference(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn remove_reference(&self) {
        let prev = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "descriptor reference released twice");
        if prev == 1 {
            self.check_done();
        }
    }

    fn finish_iteration(&self) {
        // SeqCst pairs with the reference count so a done check cannot be missed
        if self.iteration_completed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(xd = self.guid, "iteration completed");
        self.check_done();
    }

    fn check_done(&self) {
        if !self.iteration_completed.load(Ordering::SeqCst)
            || self.outstanding.load(Ordering::SeqCst) != 0
        {
            return;
        }
        if !self.transfer_done.swap(true, Ordering::AcqRel) {
            debug!(xd = self.guid, "transfer done");
            self.done_notify.notify_waiters();
        }
    }
}

fn check_fill_entry(entry: &AddressEntry, pattern_len: usize) -> Result<()> {
    if entry.extent(0) % pattern_len != 0 {
        return Err(DmaError::InvalidFillSize(format!(
            "contiguous run of {} bytes is not a whole number of {pattern_len}-byte elements",
            entry.extent(0)
        )));
    }
    Ok(())
}
