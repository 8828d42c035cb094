//! Global atomic counters for swarm observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single `tracing::info!`
//! event, typically at the end of a cycle.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Atomic counters; increments never allocate or lock.
pub struct Metrics {
    tasks_planned: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    retries: AtomicU64,
    approvals: AtomicU64,
    rejections: AtomicU64,
    occ_conflicts: AtomicU64,
    publications: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! counter {
    ($inc:ident, $get:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(metric = stringify!($field), "counter incremented");
        }

        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            tasks_planned: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            approvals: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            occ_conflicts: AtomicU64::new(0),
            publications: AtomicU64::new(0),
        }
    }

    counter!(inc_tasks_planned, tasks_planned, tasks_planned);
    counter!(inc_tasks_completed, tasks_completed, tasks_completed);
    counter!(inc_tasks_failed, tasks_failed, tasks_failed);
    counter!(inc_retries, retries, retries);
    counter!(inc_approvals, approvals, approvals);
    counter!(inc_rejections, rejections, rejections);
    counter!(inc_occ_conflicts, occ_conflicts, occ_conflicts);
    counter!(inc_publications, publications, publications);

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            tasks_planned = self.tasks_planned(),
            tasks_completed = self.tasks_completed(),
            tasks_failed = self.tasks_failed(),
            retries = self.retries(),
            approvals = self.approvals(),
            rejections = self.rejections(),
            occ_conflicts = self.occ_conflicts(),
            publications = self.publications(),
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for c in [
            &self.tasks_planned,
            &self.tasks_completed,
            &self.tasks_failed,
            &self.retries,
            &self.approvals,
            &self.rejections,
            &self.occ_conflicts,
            &self.publications,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.tasks_planned(), 0);
        m.inc_tasks_planned();
        m.inc_tasks_planned();
        assert_eq!(m.tasks_planned(), 2);

        m.inc_occ_conflicts();
        assert_eq!(m.occ_conflicts(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_retries();
        m.inc_approvals();
        m.inc_publications();
        m.reset();
        assert_eq!(m.retries(), 0);
        assert_eq!(m.approvals(), 0);
        assert_eq!(m.publications(), 0);
    }
}
