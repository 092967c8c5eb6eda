// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Engine-side streams.
//!
//! A [`Stream`] wraps a device stream with the state the engine keeps for it:
//! a [`RateLimiter`] and a FIFO of pending completion records. Records fire in
//! exactly the order they were added.

mod rate;
mod table;

pub use rate::RateLimiter;
pub use table::{DeviceStreams, StreamTable};

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::Result;
use crate::completion::Notification;
use crate::device::{CompletionChecker, CopyOp, DeviceStream, FillOp};
use crate::route::StreamKind;

const SLOW_WARN_INTERVAL: Duration = Duration::from_secs(30);

struct PendingCompletion {
    fence: Box<dyn CompletionChecker>,
    notification: Box<dyn Notification>,
    arrived_at: Instant,
    last_warned_at: Option<Instant>,
}

/// An ordered device stream with throttling and completion tracking.
pub struct Stream {
    kind: StreamKind,
    device: Box<dyn DeviceStream>,
    limiter: Mutex<RateLimiter>,
    pending: Mutex<VecDeque<PendingCompletion>>,
    // held across a whole reap so concurrent reapers fire in queue order
    reaping: Mutex<()>,
    slow_warn_after: Duration,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("kind", &self.kind)
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl Stream {
    pub fn new(
        kind: StreamKind,
        device: Box<dyn DeviceStream>,
        limiter: RateLimiter,
        slow_warn_after: Duration,
    ) -> Self {
        Self {
            kind,
            device,
            limiter: Mutex::new(limiter),
            pending: Mutex::new(VecDeque::new()),
            reaping: Mutex::new(()),
            slow_warn_after,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Largest single operation that fits the rate limiter's per-window budget.
    pub fn max_op_bytes(&self) -> usize {
        self.limiter
            .lock()
            .budget()
            .map_or(usize::MAX, |budget| {
                usize::try_from(budget).unwrap_or(usize::MAX).max(1)
            })
    }

    /// Ask the rate limiter whether `bytes` more may be submitted now.
    pub fn ok_to_submit(&self, bytes: usize) -> bool {
        let admitted = self.limiter.lock().admit(bytes);
        if !admitted {
            debug!(stream = %self.kind, bytes, "rate limit reached");
        }
        admitted
    }

    pub fn submit_copy(&self, op: &CopyOp) -> Result<()> {
        self.device.submit_copy(op)?;
        debug!(
            stream = %self.kind,
            dst = format_args!("{:#x}", op.dst),
            src = format_args!("{:#x}", op.src),
            dims = op.shape.dims(),
            bytes = op.shape.bytes(),
            "copy submitted"
        );
        Ok(())
    }

    pub fn submit_fill(&self, op: &FillOp) -> Result<()> {
        self.device.submit_fill(op)?;
        debug!(
            stream = %self.kind,
            dst = format_args!("{:#x}", op.dst),
            dims = op.shape.dims(),
            bytes = op.bytes(),
            "fill submitted"
        );
        Ok(())
    }

    /// Queue `notification` behind everything submitted so far.
    pub fn add_notification(&self, notification: Box<dyn Notification>) -> Result<()> {
        // record the fence under the queue lock so queue order is fence order
        let mut pending = self.pending.lock();
        let fence = self.device.record_fence()?;
        pending.push_back(PendingCompletion {
            fence,
            notification,
            arrived_at: Instant::now(),
            last_warned_at: None,
        });
        debug!(stream = %self.kind, pending = pending.len(), "fence recorded");
        Ok(())
    }

    /// Fire every record whose fence has completed, oldest first, stopping at
    /// the first one still in flight. Returns how many fired.
    ///
    /// Records fire after the queue lock is released, so a notification may
    /// add new records to this stream.
    pub fn reap_completions(&self) -> Result<usize> {
        let _reaping = self.reaping.lock();

        let mut error = None;
        let ready: Vec<PendingCompletion> = {
            let mut pending = self.pending.lock();
            let mut ready = Vec::new();
            while let Some(front) = pending.front() {
                match front.fence.is_complete() {
                    Ok(true) => ready.extend(pending.pop_front()),
                    Ok(false) => break,
                    Err(e) => {
                        error = Some(e);
                        break;
                    }
                }
            }

            if let Some(front) = pending.front_mut() {
                front.last_warned_at = check_and_warn_slow_completion(
                    self.kind,
                    self.slow_warn_after,
                    front.arrived_at,
                    front.last_warned_at,
                );
            }
            ready
        };

        let fired = ready.len();
        for done in ready {
            done.notification.request_completed();
        }

        match error {
            Some(e) => Err(e),
            None => Ok(fired),
        }
    }

    /// Number of records waiting to fire.
    pub fn pending_completions(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Returns the new last-warned time if a warning was issued.
fn check_and_warn_slow_completion(
    kind: StreamKind,
    threshold: Duration,
    arrived_at: Instant,
    last_warned_at: Option<Instant>,
) -> Option<Instant> {
    let elapsed = arrived_at.elapsed();
    if elapsed > threshold {
        let should_warn = last_warned_at
            .map(|last| last.elapsed() > SLOW_WARN_INTERVAL)
            .unwrap_or(true);

        if should_warn {
            warn!(
                stream = %kind,
                elapsed_secs = elapsed.as_secs(),
                "completion has been pending longer than expected"
            );
            return Some(Instant::now());
        }
    }
    last_warned_at
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceBackend, HostBackend};
    use std::sync::Arc;

    fn stream(backend: &HostBackend) -> Stream {
        let kind = StreamKind::DeviceToDevice { device: 0 };
        Stream::new(
            kind,
            backend.create_stream(kind).unwrap(),
            RateLimiter::unlimited(),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_records_fire_in_order() {
        let backend = HostBackend::new(1);
        backend.hold_fences(true);
        let stream = stream(&backend);

        let order = Arc::new(Mutex::new(Vec::new()));
        for id in 1..=3 {
            let order = order.clone();
            stream
                .add_notification(Box::new(move || order.lock().push(id)))
                .unwrap();
        }

        assert_eq!(stream.reap_completions().unwrap(), 0);
        assert_eq!(stream.pending_completions(), 3);

        backend.release_fences_up_to(2);
        assert_eq!(stream.reap_completions().unwrap(), 2);
        assert_eq!(*order.lock(), vec![1, 2]);

        backend.release_fences();
        assert_eq!(stream.reap_completions().unwrap(), 1);
        assert_eq!(*order.lock(), vec![1, 2, 3]);
        assert_eq!(stream.pending_completions(), 0);
    }

    #[test]
    fn test_notification_may_queue_another_record() {
        let backend = HostBackend::new(1);
        let stream = Arc::new(stream(&backend));
        let order = Arc::new(Mutex::new(Vec::new()));

        let chained = {
            let stream = stream.clone();
            let order = order.clone();
            move || {
                order.lock().push(1);
                let order = order.clone();
                stream
                    .add_notification(Box::new(move || order.lock().push(2)))
                    .unwrap();
            }
        };
        stream.add_notification(Box::new(chained)).unwrap();

        assert_eq!(stream.reap_completions().unwrap(), 1);
        assert_eq!(*order.lock(), vec![1]);
        assert_eq!(stream.pending_completions(), 1);

        assert_eq!(stream.reap_completions().unwrap(), 1);
        assert_eq!(*order.lock(), vec![1, 2]);
        assert_eq!(stream.pending_completions(), 0);
    }

    #[test]
    fn test_rate_limited_stream() {
        let backend = HostBackend::new(1);
        let kind = StreamKind::HostToDevice { device: 0 };
        let stream = Stream::new(
            kind,
            backend.create_stream(kind).unwrap(),
            RateLimiter::with_budget(100, Duration::from_secs(3600)),
            Duration::from_secs(60),
        );
        assert!(stream.ok_to_submit(60));
        assert!(!stream.ok_to_submit(60));
        assert!(stream.ok_to_submit(40));
    }

    #[test]
    fn test_budget_caps_operation_size() {
        let backend = HostBackend::new(1);
        let kind = StreamKind::DeviceToDevice { device: 0 };
        let limited = Stream::new(
            kind,
            backend.create_stream(kind).unwrap(),
            RateLimiter::with_budget(1024, Duration::from_secs(3600)),
            Duration::from_secs(60),
        );
        assert_eq!(limited.max_op_bytes(), 1024);
        assert_eq!(stream(&backend).max_op_bytes(), usize::MAX);
    }

    #[test]
    fn test_slow_warning_throttled() {
        let kind = StreamKind::DeviceToHost { device: 0 };
        let arrived = Instant::now();
        std::thread::sleep(Duration::from_millis(2));

        let warned = check_and_warn_slow_completion(kind, Duration::from_millis(1), arrived, None);
        assert!(warned.is_some());

        // warned just now, so no new warning
        let again = check_and_warn_slow_completion(kind, Duration::from_millis(1), arrived, warned);
        assert_eq!(again, warned);

        let fresh = check_and_warn_slow_completion(kind, Duration::from_secs(60), arrived, None);
        assert!(fresh.is_none());
    }
}
