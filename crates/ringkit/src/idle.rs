//! Idle strategies for callers that poll and find no work.
//!
//! The core never blocks: `read` returning 0 or a failed `write` leaves the
//! wait policy to the caller. These strategies package the usual choices so
//! the polling loop stays a one-liner.

use crossbeam_utils::Backoff;
use std::thread;

/// Wait policy applied between unproductive polls.
pub trait IdleStrategy {
    /// Account for `work_count` items of work done this cycle; idles when 0.
    fn idle(&mut self, work_count: usize);

    /// Reset any escalation state after productive work.
    fn reset(&mut self);
}

/// Burn the core with spin-loop hints. Lowest latency, highest cost.
#[derive(Debug, Default)]
pub struct BusySpinIdleStrategy;

impl IdleStrategy for BusySpinIdleStrategy {
    #[inline]
    fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            std::hint::spin_loop();
        }
    }

    #[inline]
    fn reset(&mut self) {}
}

/// Yield to the OS scheduler on every unproductive poll.
#[derive(Debug, Default)]
pub struct YieldingIdleStrategy;

impl IdleStrategy for YieldingIdleStrategy {
    #[inline]
    fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            thread::yield_now();
        }
    }

    #[inline]
    fn reset(&mut self) {}
}

/// Escalating backoff: spin with PAUSE hints first, then yield.
#[derive(Debug, Default)]
pub struct BackoffIdleStrategy {
    backoff: Backoff,
}

impl BackoffIdleStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdleStrategy for BackoffIdleStrategy {
    #[inline]
    fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            self.backoff.snooze();
        } else {
            self.reset();
        }
    }

    #[inline]
    fn reset(&mut self) {
        self.backoff = Backoff::new();
    }
}
