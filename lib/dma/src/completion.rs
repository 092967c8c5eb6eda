// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Completion records.
//!
//! A record is created when a batch of operations is submitted, moved into the
//! stream's notification queue, and consumed exactly once when the stream's
//! fence for it completes.

use std::sync::Arc;

use crate::descriptor::TransferDescriptor;

/// Something to run once every operation submitted before it has finished.
pub trait Notification: Send {
    fn request_completed(self: Box<Self>);
}

impl<F: FnOnce() + Send> Notification for F {
    fn request_completed(self: Box<Self>) {
        (*self)()
    }
}

/// A byte span of one port's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpan {
    pub port: usize,
    pub offset: u64,
    pub size: u64,
}

/// Completion of one submitted batch of a descriptor.
///
/// Holds one reference on the descriptor, taken by [`TransferCompletion::new`]
/// and released when the record fires.
#[derive(Debug)]
pub struct TransferCompletion {
    xd: Arc<TransferDescriptor>,
    read: Option<PortSpan>,
    write: Option<PortSpan>,
}

impl TransferCompletion {
    pub fn new(xd: Arc<TransferDescriptor>, read: Option<PortSpan>, write: Option<PortSpan>) -> Self {
        xd.add_reference();
        Self { xd, read, write }
    }
}

impl Notification for TransferCompletion {
    fn request_completed(self: Box<Self>) {
        tracing::debug!(
            xd = self.xd.guid(),
            read = ?self.read,
            write = ?self.write,
            "transfer completion"
        );
        if let Some(span) = self.read {
            self.xd.update_bytes_read(span.port, span.offset, span.size);
        }
        if let Some(span) = self.write {
            self.xd.update_bytes_write(span.port, span.offset, span.size);
        }
        self.xd.remove_reference();
    }
}
