//! Metrics collector for the task dispatcher
//!
//! Counters and gauges are registered through the `metrics` facade; the
//! Prometheus recorder installed by [`install_prometheus_recorder`] renders them.

use anyhow::Result;
use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use taskfarm_core::models::TaskState;
use tracing::{debug, info};

/// Install the global Prometheus recorder and return a handle for rendering `/metrics`
pub fn install_prometheus_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;
    info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// Metrics collector for dispatch, lifecycle and maintenance activity
#[derive(Clone)]
pub struct MetricsCollector {
    // Dispatch metrics
    dispatch_requests_total: Counter,
    dispatch_polled_total: Counter,
    dispatch_queued_total: Counter,
    dispatch_collisions_total: Counter,
    dispatch_duration: Histogram,

    // Analyst metrics
    analysts_up: Gauge,
    analyst_pings_total: Counter,

    // Maintenance metrics
    orphans_recovered_total: Counter,
    analysts_marked_down_total: Counter,
    analysts_removed_total: Counter,
    jobs_archived_total: Counter,
    jobs_resumed_total: Counter,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            dispatch_requests_total: counter!("taskfarm_dispatch_requests_total"),
            dispatch_polled_total: counter!("taskfarm_dispatch_tasks_polled_total"),
            dispatch_queued_total: counter!("taskfarm_dispatch_tasks_queued_total"),
            dispatch_collisions_total: counter!("taskfarm_dispatch_collisions_total"),
            dispatch_duration: histogram!("taskfarm_dispatch_duration_seconds"),
            analysts_up: gauge!("taskfarm_analysts_up"),
            analyst_pings_total: counter!("taskfarm_analyst_pings_total"),
            orphans_recovered_total: counter!("taskfarm_orphan_tasks_recovered_total"),
            analysts_marked_down_total: counter!("taskfarm_analysts_marked_down_total"),
            analysts_removed_total: counter!("taskfarm_analysts_removed_total"),
            jobs_archived_total: counter!("taskfarm_jobs_archived_total"),
            jobs_resumed_total: counter!("taskfarm_jobs_resumed_total"),
        }
    }

    /// Record one dispatch request and how it went
    pub fn record_dispatch(&self, polled: u64, queued: u64, collisions: u64, duration_seconds: f64) {
        self.dispatch_requests_total.increment(1);
        self.dispatch_polled_total.increment(polled);
        self.dispatch_queued_total.increment(queued);
        self.dispatch_collisions_total.increment(collisions);
        self.dispatch_duration.record(duration_seconds);

        debug!(
            polled = polled,
            queued = queued,
            collisions = collisions,
            duration_seconds = duration_seconds,
            "Dispatch request completed"
        );
    }

    /// Record a task state transition
    pub fn record_task_transition(&self, from: TaskState, to: TaskState) {
        counter!(
            "taskfarm_task_transitions_total",
            "from" => format!("{from:?}"),
            "to" => format!("{to:?}")
        )
        .increment(1);
    }

    pub fn record_analyst_ping(&self) {
        self.analyst_pings_total.increment(1);
    }

    pub fn update_analysts_up(&self, count: usize) {
        self.analysts_up.set(count as f64);
    }

    pub fn record_orphans_recovered(&self, count: u64) {
        self.orphans_recovered_total.increment(count);
    }

    pub fn record_analysts_marked_down(&self, count: u64) {
        self.analysts_marked_down_total.increment(count);
    }

    pub fn record_analysts_removed(&self, count: u64) {
        self.analysts_removed_total.increment(count);
    }

    pub fn record_jobs_archived(&self, count: u64) {
        self.jobs_archived_total.increment(count);
    }

    pub fn record_jobs_resumed(&self, count: u64) {
        self.jobs_resumed_total.increment(count);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_works_without_recorder() {
        let metrics = MetricsCollector::new();
        metrics.record_dispatch(3, 2, 1, 0.01);
        metrics.record_task_transition(TaskState::Queued, TaskState::Running);
        metrics.update_analysts_up(4);
    }
}
