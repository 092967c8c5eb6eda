// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, Instant};

/// Per-stream submission throttle.
///
/// Tracks bytes submitted within a fixed time window against a budget of
/// `bandwidth × window`. When the budget is exhausted [`admit`](Self::admit)
/// returns false until the window rolls over; callers stop submitting and
/// retry on a later progress call. A single operation larger than the whole
/// budget is admitted into an empty window so it cannot starve, but the
/// overshoot is carried as debt and keeps later windows closed until it has
/// been paid off.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    budget: Option<u64>,
    window: Duration,
    window_start: Instant,
    bytes_in_window: u64,
}

impl RateLimiter {
    /// Budget derived from a bandwidth estimate in MB/s (bytes per µs).
    pub fn new(bandwidth_mbps: u64, window: Duration) -> Self {
        let budget = bandwidth_mbps.saturating_mul(window.as_micros() as u64);
        Self::with_budget(budget, window)
    }

    pub fn with_budget(budget_bytes: u64, window: Duration) -> Self {
        Self {
            budget: Some(budget_bytes),
            window,
            window_start: Instant::now(),
            bytes_in_window: 0,
        }
    }

    /// A limiter that admits everything.
    pub fn unlimited() -> Self {
        Self {
            budget: None,
            window: Duration::ZERO,
            window_start: Instant::now(),
            bytes_in_window: 0,
        }
    }

    pub fn budget(&self) -> Option<u64> {
        self.budget
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn admit(&mut self, bytes: usize) -> bool {
        self.admit_at(bytes, Instant::now())
    }

    /// [`admit`](Self::admit) against an explicit clock reading.
    pub fn admit_at(&mut self, bytes: usize, now: Instant) -> bool {
        let Some(budget) = self.budget else {
            return true;
        };

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= self.window {
            let windows = elapsed.as_nanos() / self.window.as_nanos().max(1);
            let refill = budget.saturating_mul(u64::try_from(windows).unwrap_or(u64::MAX));
            self.window_start = now;
            self.bytes_in_window = self.bytes_in_window.saturating_sub(refill);
        }

        let bytes = bytes as u64;
        if self.bytes_in_window > 0 && self.bytes_in_window.saturating_add(bytes) > budget {
            return false;
        }
        self.bytes_in_window = self.bytes_in_window.saturating_add(bytes);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_from_bandwidth() {
        let limiter = RateLimiter::new(10_000, Duration::from_micros(1000));
        assert_eq!(limiter.budget(), Some(10_000_000));
    }

    #[test]
    fn test_rejects_once_window_is_full() {
        let start = Instant::now();
        let mut limiter = RateLimiter::with_budget(1000, Duration::from_millis(10));
        assert!(limiter.admit_at(400, start));
        assert!(limiter.admit_at(600, start));
        assert!(!limiter.admit_at(1, start));

        // next window
        assert!(limiter.admit_at(1000, start + Duration::from_millis(10)));
    }

    #[test]
    fn test_oversized_operation_carries_into_later_windows() {
        let start = Instant::now();
        let mut limiter = RateLimiter::with_budget(100, Duration::from_millis(10));
        assert!(limiter.admit_at(5000, start));
        assert!(!limiter.admit_at(1, start + Duration::from_millis(5)));

        // one window pays back 100 of the 4900 overshoot
        assert!(!limiter.admit_at(1, start + Duration::from_millis(15)));

        // well past 49 more windows the debt is gone
        assert!(limiter.admit_at(100, start + Duration::from_millis(600)));
        assert!(!limiter.admit_at(1, start + Duration::from_millis(600)));
    }

    #[test]
    fn test_idle_windows_do_not_bank_budget() {
        let start = Instant::now();
        let mut limiter = RateLimiter::with_budget(100, Duration::from_millis(10));
        assert!(limiter.admit_at(100, start + Duration::from_secs(1)));
        assert!(!limiter.admit_at(1, start + Duration::from_secs(1)));
    }

    #[test]
    fn test_unlimited() {
        let mut limiter = RateLimiter::unlimited();
        for _ in 0..100 {
            assert!(limiter.admit(usize::MAX / 2));
        }
    }
}
