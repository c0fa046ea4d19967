use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

/// Tracks fetch attempts against the run-wide page limit.
/// Successes and failures both consume budget, so a string of broken pages
/// cannot stretch a session past its bound.
pub struct PageBudget {
    /// Run-wide limit on fetch attempts. 0 = unlimited.
    limit: u64,
    used: AtomicU64,
}

impl PageBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
        }
    }

    /// Record one fetch attempt.
    pub fn spend(&self) {
        self.used.fetch_add(1, Ordering::Relaxed);
    }

    /// Attempts remaining before the limit (u64::MAX if unlimited).
    pub fn remaining(&self) -> u64 {
        if self.limit == 0 {
            return u64::MAX;
        }
        self.limit.saturating_sub(self.used.load(Ordering::Relaxed))
    }

    pub fn is_exhausted(&self) -> bool {
        self.limit > 0 && self.used.load(Ordering::Relaxed) >= self.limit
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    /// Log budget status at the end of a session.
    pub fn log_status(&self) {
        if self.limit > 0 {
            info!(used = self.used(), limit = self.limit, "Page budget status");
        }
    }
}
