//! Monotonic wall-clock deadlines shared by every stage kernel and the
//! orchestrator (§5 "Cancellation"/"Timeouts"). A `Deadline` is cheap to
//! clone/copy and carries no lock — each stage gets its own, derived from
//! `min(remaining_overall, per_stage_cap)` by the orchestrator.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget_ms: u64) -> Self {
        Self { start: Instant::now(), budget: Duration::from_millis(budget_ms) }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    pub fn remaining_ms(&self) -> u64 {
        self.remaining().as_millis() as u64
    }

    pub fn expired(&self) -> bool {
        self.elapsed() >= self.budget
    }

    /// A new deadline budgeted to `min(self.remaining(), cap_ms)`, for a
    /// sub-stage carved out of a larger overall budget.
    pub fn sub(&self, cap_ms: u64) -> Deadline {
        Deadline::new(self.remaining_ms().min(cap_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_deadline_is_not_expired() {
        let d = Deadline::new(100);
        assert!(!d.expired());
        assert!(d.remaining_ms() <= 100);
    }

    #[test]
    fn zero_budget_deadline_is_expired_immediately() {
        let d = Deadline::new(0);
        assert!(d.expired());
    }

    #[test]
    fn sub_deadline_is_capped_by_both_bounds() {
        let d = Deadline::new(1000);
        let s = d.sub(10);
        assert!(s.remaining_ms() <= 10);
    }
}
