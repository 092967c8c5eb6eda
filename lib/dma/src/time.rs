// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cooperative time budgets for progress calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Deadline for one cooperative progress call.
///
/// Progress loops check [`TimeLimit::is_expired`] only after a native operation
/// has been fully submitted, so a call overruns its budget by at most one
/// submission.
#[derive(Debug, Clone, Default)]
pub struct TimeLimit {
    deadline: Option<Instant>,
    interrupt: Option<Arc<AtomicBool>>,
}

impl TimeLimit {
    /// A limit that never expires on its own.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// A limit that expires `budget` from now.
    pub fn relative(budget: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(budget),
            interrupt: None,
        }
    }

    /// A limit that expires at `deadline`.
    pub fn at(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            interrupt: None,
        }
    }

    /// A limit that has already expired. Progress still submits at least one
    /// operation per call under this limit.
    pub fn expired() -> Self {
        Self::at(Instant::now())
    }

    /// Attach an interrupt flag; raising it expires the limit immediately.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn is_expired(&self) -> bool {
        if let Some(flag) = &self.interrupt
            && flag.load(Ordering::Relaxed)
        {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_expires() {
        let limit = TimeLimit::unlimited();
        assert!(!limit.is_expired());
        assert!(limit.deadline.is_none());
    }

    #[test]
    fn test_expired() {
        assert!(TimeLimit::expired().is_expired());
        assert!(TimeLimit::at(Instant::now() - Duration::from_secs(1)).is_expired());
    }

    #[test]
    fn test_relative() {
        let limit = TimeLimit::relative(Duration::from_secs(3600));
        assert!(!limit.is_expired());
        assert!(limit.deadline.is_some_and(|d| d > Instant::now() + Duration::from_secs(3500)));
    }

    #[test]
    fn test_interrupt() {
        let flag = Arc::new(AtomicBool::new(false));
        let limit = TimeLimit::unlimited().with_interrupt(flag.clone());
        assert!(!limit.is_expired());
        flag.store(true, Ordering::Relaxed);
        assert!(limit.is_expired());
    }
}
