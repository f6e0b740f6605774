//! Observability metrics for collection.
//!
//! Metrics go through the `metrics` crate facade; install any recorder
//! (for example a Prometheus exporter) in the hosting process to export them.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `vigil_collect_task_transitions_total` | Counter | `from_state`, `to_state` | Task state transitions |
//! | `vigil_collect_tasks_created_total` | Counter | `task_type` | Tasks created |
//! | `vigil_collect_task_claims_total` | Counter | `task_type` | Tasks handed to workers |
//! | `vigil_collect_task_retries_total` | Counter | `task_type` | Failed tasks re-queued |
//! | `vigil_collect_cascade_failures_total` | Counter | - | Dependents failed by an upstream failure |
//! | `vigil_collect_samples_ingested_total` | Counter | - | Raw samples accepted |
//! | `vigil_collect_buckets_upserted_total` | Counter | - | Bucket upserts |
//! | `vigil_collect_risk_annotations_total` | Counter | - | Group values annotated with risk |
//! | `vigil_collect_sidekick_jobs_total` | Counter | `job_type`, `result` | Side-effect job outcomes |
//! | `vigil_collect_sidekick_drain_duration_seconds` | Histogram | - | Drain pass duration |
//! | `vigil_collect_sidekick_last_drain_jobs` | Gauge | - | Jobs processed by the last drain |

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Task state transitions.
    pub const TASK_TRANSITIONS_TOTAL: &str = "vigil_collect_task_transitions_total";
    /// Counter: Tasks created.
    pub const TASKS_CREATED_TOTAL: &str = "vigil_collect_tasks_created_total";
    /// Counter: Tasks claimed by workers.
    pub const TASK_CLAIMS_TOTAL: &str = "vigil_collect_task_claims_total";
    /// Counter: Failed tasks re-queued for retry.
    pub const TASK_RETRIES_TOTAL: &str = "vigil_collect_task_retries_total";
    /// Counter: Tasks failed because an upstream task failed.
    pub const CASCADE_FAILURES_TOTAL: &str = "vigil_collect_cascade_failures_total";
    /// Counter: Raw samples ingested.
    pub const SAMPLES_INGESTED_TOTAL: &str = "vigil_collect_samples_ingested_total";
    /// Counter: Time-series buckets upserted.
    pub const BUCKETS_UPSERTED_TOTAL: &str = "vigil_collect_buckets_upserted_total";
    /// Counter: Group values annotated with a risk score.
    pub const RISK_ANNOTATIONS_TOTAL: &str = "vigil_collect_risk_annotations_total";
    /// Counter: Side-effect job outcomes.
    pub const SIDEKICK_JOBS_TOTAL: &str = "vigil_collect_sidekick_jobs_total";
    /// Histogram: Duration of one drain pass in seconds.
    pub const SIDEKICK_DRAIN_DURATION_SECONDS: &str =
        "vigil_collect_sidekick_drain_duration_seconds";
    /// Gauge: Jobs processed by the most recent drain pass.
    pub const SIDEKICK_LAST_DRAIN_JOBS: &str = "vigil_collect_sidekick_last_drain_jobs";
}

/// Label keys used across metrics.
pub mod labels {
    /// Previous task state (for transitions).
    pub const FROM_STATE: &str = "from_state";
    /// Target task state (for transitions).
    pub const TO_STATE: &str = "to_state";
    /// Collection task type (`service_guard`, `deployment`).
    pub const TASK_TYPE: &str = "task_type";
    /// Side-effect job type.
    pub const JOB_TYPE: &str = "job_type";
    /// Outcome (`success`, `failed`, `requeued`).
    pub const RESULT: &str = "result";
}

/// Records collection metrics with consistent naming and labels.
///
/// Cheap to clone and share across tasks.
#[derive(Debug, Clone, Default)]
pub struct CollectMetrics;

impl CollectMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records a task state transition.
    pub fn record_task_transition(&self, from_state: &str, to_state: &str) {
        counter!(
            names::TASK_TRANSITIONS_TOTAL,
            labels::FROM_STATE => from_state.to_string(),
            labels::TO_STATE => to_state.to_string(),
        )
        .increment(1);
    }

    /// Records newly created tasks.
    pub fn record_tasks_created(&self, task_type: &str, count: usize) {
        counter!(
            names::TASKS_CREATED_TOTAL,
            labels::TASK_TYPE => task_type.to_string(),
        )
        .increment(count as u64);
    }

    /// Records a task handed to a worker.
    pub fn record_claim(&self, task_type: &str) {
        counter!(
            names::TASK_CLAIMS_TOTAL,
            labels::TASK_TYPE => task_type.to_string(),
        )
        .increment(1);
    }

    /// Records a failed task re-queued for retry.
    pub fn record_retry(&self, task_type: &str) {
        counter!(
            names::TASK_RETRIES_TOTAL,
            labels::TASK_TYPE => task_type.to_string(),
        )
        .increment(1);
    }

    /// Records dependents failed by an upstream failure.
    pub fn record_cascade_failures(&self, count: usize) {
        counter!(names::CASCADE_FAILURES_TOTAL).increment(count as u64);
    }

    /// Records accepted samples.
    pub fn record_samples_ingested(&self, count: usize) {
        counter!(names::SAMPLES_INGESTED_TOTAL).increment(count as u64);
    }

    /// Records bucket upserts.
    pub fn record_buckets_upserted(&self, count: usize) {
        counter!(names::BUCKETS_UPSERTED_TOTAL).increment(count as u64);
    }

    /// Records group values annotated with a risk score.
    pub fn record_risk_annotations(&self, count: usize) {
        counter!(names::RISK_ANNOTATIONS_TOTAL).increment(count as u64);
    }

    /// Records the outcome of one side-effect job.
    pub fn record_sidekick_outcome(&self, job_type: &str, result: &str) {
        counter!(
            names::SIDEKICK_JOBS_TOTAL,
            labels::JOB_TYPE => job_type.to_string(),
            labels::RESULT => result.to_string(),
        )
        .increment(1);
    }

    /// Records the duration of a drain pass.
    pub fn observe_drain_duration(&self, duration: Duration) {
        histogram!(names::SIDEKICK_DRAIN_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Sets the number of jobs processed by the last drain pass.
    #[allow(clippy::cast_precision_loss)] // Gauge values are small
    pub fn set_last_drain_jobs(&self, count: usize) {
        gauge!(names::SIDEKICK_LAST_DRAIN_JOBS).set(count as f64);
    }
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
///
/// ## Example
///
/// ```rust
/// use vigil_collect::metrics::{CollectMetrics, TimingGuard};
///
/// let metrics = CollectMetrics::new();
///
/// {
///     let _guard = TimingGuard::new(|duration| {
///         metrics.observe_drain_duration(duration);
///     });
///
///     // Do work...
/// } // Duration recorded automatically on drop
/// ```
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_metrics_record_without_recorder() {
        let metrics = CollectMetrics::new();

        metrics.record_task_transition("QUEUED", "RUNNING");
        metrics.record_tasks_created("service_guard", 1);
        metrics.record_claim("deployment");
        metrics.record_retry("deployment");
        metrics.record_cascade_failures(2);
        metrics.record_samples_ingested(10);
        metrics.record_buckets_upserted(3);
        metrics.record_risk_annotations(4);
        metrics.record_sidekick_outcome("webhook_call", "success");
        metrics.observe_drain_duration(Duration::from_millis(5));
        metrics.set_last_drain_jobs(7);
    }

    #[test]
    fn timing_guard_measures_duration() {
        let mut recorded_duration = None;

        {
            let _guard = TimingGuard::new(|d| {
                recorded_duration = Some(d);
            });
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(recorded_duration.is_some_and(|d| d >= Duration::from_millis(10)));
    }
}
