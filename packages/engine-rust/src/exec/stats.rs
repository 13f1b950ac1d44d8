//! Running totals of partitioning and dispatch activity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use calcgrid_core::Job;
use serde::{Deserialize, Serialize};

/// Lock-free totals, shared by every pass of one controller.
#[derive(Debug, Default)]
pub struct ExecutionStatistics {
    partition_passes: AtomicU64,
    jobs_dispatched: AtomicU64,
    jobs_failed: AtomicU64,
    nodes_executed: AtomicU64,
    cost_executed: AtomicU64,
    dispatch_micros: AtomicU64,
}

/// Point-in-time copy of [`ExecutionStatistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub partition_passes: u64,
    pub jobs_dispatched: u64,
    pub jobs_failed: u64,
    pub nodes_executed: u64,
    pub cost_executed: u64,
    pub dispatch_micros: u64,
}

impl StatisticsSnapshot {
    /// Mean wall-clock dispatch time per job, if any job was dispatched.
    #[must_use]
    pub fn mean_dispatch_time(&self) -> Option<Duration> {
        (self.jobs_dispatched > 0)
            .then(|| Duration::from_micros(self.dispatch_micros / self.jobs_dispatched))
    }
}

impl ExecutionStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_partition(&self) {
        self.partition_passes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one dispatched job. Failed jobs count as dispatched but not
    /// as executed.
    pub(crate) fn record_job(&self, job: &Job, succeeded: bool, elapsed: Duration) {
        self.jobs_dispatched.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.dispatch_micros.fetch_add(micros, Ordering::Relaxed);
        if succeeded {
            self.nodes_executed
                .fetch_add(job.item_count() as u64, Ordering::Relaxed);
            self.cost_executed.fetch_add(job.cost(), Ordering::Relaxed);
        } else {
            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            partition_passes: self.partition_passes.load(Ordering::Relaxed),
            jobs_dispatched: self.jobs_dispatched.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            nodes_executed: self.nodes_executed.load(Ordering::Relaxed),
            cost_executed: self.cost_executed.load(Ordering::Relaxed),
            dispatch_micros: self.dispatch_micros.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.partition_passes.store(0, Ordering::Relaxed);
        self.jobs_dispatched.store(0, Ordering::Relaxed);
        self.jobs_failed.store(0, Ordering::Relaxed);
        self.nodes_executed.store(0, Ordering::Relaxed);
        self.cost_executed.store(0, Ordering::Relaxed);
        self.dispatch_micros.store(0, Ordering::Relaxed);
    }
}
