//! Data collection tasks and their lifecycle.
//!
//! This module provides:
//! - `TaskStatus`: The state machine for a collection task
//! - `DataCollectionTaskType`: Continuous (ServiceGuard) vs one-shot (Deployment)
//! - `DataCollectionTask`: One time-bounded unit of collection work
//! - `TransitionReason`: Explicit reasons for every state transition
//! - `TaskUpdate`: The mutation applied by a compare-and-swap
//! - `TaskResult`: What a worker reports after executing a task

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use vigil_core::{DataCollectionTaskId, TimeWindow, VerificationTaskId};

use crate::error::{Error, Result};

/// Reason for a task state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    // --- Happy path ---
    /// Task created runnable.
    Created,
    /// Task created behind a predecessor in a chain.
    CreatedWaiting,
    /// The chain predecessor succeeded.
    PredecessorSucceeded,
    /// A worker claimed the task.
    Claimed,
    /// Worker reported success.
    CollectionSucceeded,

    // --- Failure path ---
    /// Worker reported failure.
    CollectionFailed,
    /// A RUNNING task went stale and was claimed again.
    StaleReclaimed,
    /// The window fell behind the catch-up cutoff.
    FellBehindCutoff,
    /// An upstream task in the same chain or verification task failed terminally.
    UpstreamFailed,
    /// A stale task could no longer be reclaimed.
    Abandoned,

    // --- Recovery path ---
    /// Failed task re-queued with backoff.
    RetryScheduled,

    // --- Cancellation path ---
    /// Deployment verification was aborted.
    Aborted,
}

impl std::fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::CreatedWaiting => write!(f, "created_waiting"),
            Self::PredecessorSucceeded => write!(f, "predecessor_succeeded"),
            Self::Claimed => write!(f, "claimed"),
            Self::CollectionSucceeded => write!(f, "collection_succeeded"),
            Self::CollectionFailed => write!(f, "collection_failed"),
            Self::StaleReclaimed => write!(f, "stale_reclaimed"),
            Self::FellBehindCutoff => write!(f, "fell_behind_cutoff"),
            Self::UpstreamFailed => write!(f, "upstream_failed"),
            Self::Abandoned => write!(f, "abandoned"),
            Self::RetryScheduled => write!(f, "retry_scheduled"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Collection task state machine.
///
/// ```text
/// ┌─────────┐ predecessor ┌────────┐  claim   ┌─────────┐  success  ┌─────────┐
/// │ WAITING │────────────►│ QUEUED │─────────►│ RUNNING │──────────►│ SUCCESS │
/// └─────────┘  succeeded  └────────┘          └─────────┘           └─────────┘
///      │                   ▲    │               │    ▲
///      │ upstream failed   │    │ aborted       │    │ stale reclaim
///      │ or aborted        │    ▼               │    └───────┘
///      │                   │ ┌─────────┐        │ failure
///      │                   │ │ ABORTED │        ▼
///      │                   │ └─────────┘    ┌────────┐  behind cutoff  ┌─────────┐
///      └───────────────────┼───────────────►│ FAILED │────────────────►│ EXPIRED │
///                          │     retry      └────────┘                 └─────────┘
///                          └────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Chained behind a predecessor, not yet runnable.
    Waiting,
    /// Runnable once `valid_after` has passed.
    Queued,
    /// Claimed by a worker.
    Running,
    /// Collection completed.
    Success,
    /// Collection failed (may retry).
    Failed,
    /// The window fell too far behind real time to be worth retrying.
    Expired,
    /// The owning verification was aborted.
    Aborted,
}

impl TaskStatus {
    /// Returns true if this is a terminal state.
    ///
    /// `Failed` is terminal unless the scheduler re-queues it.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Expired | Self::Aborted
        )
    }

    /// Returns true if the task is still waiting to run.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Waiting | Self::Queued)
    }

    /// Returns true if the transition from self to target is valid.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Waiting => matches!(target, Self::Queued | Self::Failed | Self::Aborted),
            Self::Queued => matches!(target, Self::Running | Self::Failed | Self::Aborted),
            Self::Running => matches!(target, Self::Running | Self::Success | Self::Failed),
            Self::Failed => matches!(target, Self::Queued | Self::Expired),
            Self::Success | Self::Expired | Self::Aborted => false,
        }
    }

    /// Returns an uppercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Expired => "EXPIRED",
            Self::Aborted => "ABORTED",
        }
    }

    /// Returns all valid target states from the current state.
    #[must_use]
    pub fn valid_transitions(&self) -> Vec<Self> {
        match self {
            Self::Waiting => vec![Self::Queued, Self::Failed, Self::Aborted],
            Self::Queued => vec![Self::Running, Self::Failed, Self::Aborted],
            Self::Running => vec![Self::Running, Self::Success, Self::Failed],
            Self::Failed => vec![Self::Queued, Self::Expired],
            Self::Success | Self::Expired | Self::Aborted => vec![],
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// The kind of collection a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataCollectionTaskType {
    /// Continuous periodic monitoring of a data source.
    ServiceGuard,
    /// Bounded, chained collection for one rollout.
    Deployment,
}

impl DataCollectionTaskType {
    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::ServiceGuard => "service_guard",
            Self::Deployment => "deployment",
        }
    }
}

impl std::fmt::Display for DataCollectionTaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// One time-bounded unit of collection work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataCollectionTask {
    /// Unique identifier.
    pub id: DataCollectionTaskId,
    /// Owning account.
    pub account_id: String,
    /// Join key into the time-series and verification stores.
    pub verification_task_id: VerificationTaskId,
    /// Remote worker responsible for the task.
    pub data_collection_worker_id: String,
    /// Continuous or one-shot.
    pub task_type: DataCollectionTaskType,
    /// Current state.
    pub status: TaskStatus,
    /// Inclusive window start.
    pub start_time: DateTime<Utc>,
    /// Exclusive window end.
    pub end_time: DateTime<Utc>,
    /// Number of retries so far.
    pub retry_count: u32,
    /// Earliest time the task may be claimed.
    pub valid_after: DateTime<Utc>,
    /// Forward link in a sequential chain.
    pub next_task_id: Option<DataCollectionTaskId>,
    /// Provider-specific collection settings, opaque to the scheduler.
    pub data_collection_info: serde_json::Value,
    /// Last failure message.
    pub exception: Option<String>,
    /// Last failure trace.
    pub stacktrace: Option<String>,
    /// Whether a success queues analysis for the window.
    pub queue_analysis: bool,
    /// Reason for the most recent transition.
    pub last_transition_reason: Option<TransitionReason>,
    /// Set with the terminal transition of a report and cleared once every
    /// follow-up (successor, chain advance, progress log, analysis) is done.
    #[serde(default)]
    pub follow_up_pending: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last write; doubles as the worker heartbeat.
    pub last_updated_at: DateTime<Utc>,
    /// Retention horizon.
    pub valid_until: DateTime<Utc>,
}

impl DataCollectionTask {
    /// Creates a QUEUED task for `window`, claimable once the window closes.
    #[must_use]
    pub fn new(
        account_id: impl Into<String>,
        verification_task_id: VerificationTaskId,
        worker_id: impl Into<String>,
        task_type: DataCollectionTaskType,
        window: TimeWindow,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DataCollectionTaskId::generate(),
            account_id: account_id.into(),
            verification_task_id,
            data_collection_worker_id: worker_id.into(),
            task_type,
            status: TaskStatus::Queued,
            start_time: window.start,
            end_time: window.end,
            retry_count: 0,
            valid_after: window.end,
            next_task_id: None,
            data_collection_info: serde_json::Value::Null,
            exception: None,
            stacktrace: None,
            queue_analysis: true,
            last_transition_reason: Some(TransitionReason::Created),
            follow_up_pending: false,
            created_at: now,
            last_updated_at: now,
            valid_until: now,
        }
    }

    /// Sets the provider-specific collection settings.
    #[must_use]
    pub fn with_data_collection_info(mut self, info: serde_json::Value) -> Self {
        self.data_collection_info = info;
        self
    }

    /// Sets the earliest claim time.
    #[must_use]
    pub const fn with_valid_after(mut self, valid_after: DateTime<Utc>) -> Self {
        self.valid_after = valid_after;
        self
    }

    /// Controls whether a success queues analysis.
    #[must_use]
    pub const fn with_queue_analysis(mut self, queue_analysis: bool) -> Self {
        self.queue_analysis = queue_analysis;
        self
    }

    /// Stamps creation, heartbeat, and retention times.
    pub fn stamp_created_at(&mut self, now: DateTime<Utc>, retention: Duration) {
        self.created_at = now;
        self.last_updated_at = now;
        self.valid_until = now + retention;
    }

    /// Returns the collection window.
    #[must_use]
    pub const fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start_time,
            end: self.end_time,
        }
    }

    /// Returns true if the task is RUNNING without an update since `now - stale_after`.
    #[must_use]
    pub fn is_stale_at(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.status == TaskStatus::Running && self.last_updated_at < now - stale_after
    }

    /// Returns true if a worker polling with `filter` may claim this task at `now`.
    ///
    /// ServiceGuard tasks ignore the retry ceiling so continuous monitoring
    /// never stops permanently.
    #[must_use]
    pub fn is_claimable_at(&self, filter: &ClaimFilter, now: DateTime<Utc>) -> bool {
        if self.account_id != filter.account_id
            || self.data_collection_worker_id != filter.worker_id
            || self.valid_after > now
        {
            return false;
        }
        let deployment = self.task_type == DataCollectionTaskType::Deployment;
        match self.status {
            TaskStatus::Queued => !deployment || self.retry_count <= filter.max_deployment_retries,
            TaskStatus::Running => {
                self.is_stale_at(now, filter.stale_after)
                    && (!deployment || self.retry_count < filter.max_deployment_retries)
            }
            _ => false,
        }
    }

    /// Returns true if the task is stale but can no longer be reclaimed.
    #[must_use]
    pub fn is_abandoned_at(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
        max_deployment_retries: u32,
    ) -> bool {
        self.task_type == DataCollectionTaskType::Deployment
            && self.is_stale_at(now, stale_after)
            && self.retry_count >= max_deployment_retries
    }

    /// Marks the task RUNNING for a claim at `now`.
    ///
    /// Reclaiming a stale RUNNING task counts as a retry.
    ///
    /// # Errors
    ///
    /// Returns an error if the task is neither QUEUED nor RUNNING.
    pub fn claim_at(&mut self, now: DateTime<Utc>) -> Result<()> {
        let reason = if self.status == TaskStatus::Running {
            self.retry_count = self.retry_count.saturating_add(1);
            TransitionReason::StaleReclaimed
        } else {
            TransitionReason::Claimed
        };
        self.transition_to_with_reason(TaskStatus::Running, reason, now)
    }

    /// Applies a CAS mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the status transition is invalid.
    pub fn apply(&mut self, update: &TaskUpdate, now: DateTime<Utc>) -> Result<()> {
        self.transition_to_with_reason(update.status, update.reason, now)?;
        if let Some(retry_count) = update.retry_count {
            self.retry_count = retry_count;
        }
        if let Some(valid_after) = update.valid_after {
            self.valid_after = valid_after;
        }
        if let Some(exception) = &update.exception {
            self.exception = Some(exception.clone());
        }
        if let Some(stacktrace) = &update.stacktrace {
            self.stacktrace = Some(stacktrace.clone());
        }
        if let Some(pending) = update.follow_up_pending {
            self.follow_up_pending = pending;
        }
        Ok(())
    }

    /// Transitions to a new state with an explicit reason.
    ///
    /// # Errors
    ///
    /// Returns an error if the transition is invalid.
    #[tracing::instrument(
        skip(self),
        fields(task_id = %self.id, from = %self.status, to = %target, reason = %reason, retry_count = self.retry_count)
    )]
    pub fn transition_to_with_reason(
        &mut self,
        target: TaskStatus,
        reason: TransitionReason,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: target.to_string(),
                reason: format!(
                    "valid transitions from {}: {:?}",
                    self.status,
                    self.status.valid_transitions()
                ),
            });
        }
        self.status = target;
        self.last_transition_reason = Some(reason);
        self.last_updated_at = now;
        Ok(())
    }
}

/// Predicate for the atomic claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimFilter {
    /// Account the worker polls for.
    pub account_id: String,
    /// The polling worker.
    pub worker_id: String,
    /// RUNNING tasks older than this are reclaimable.
    pub stale_after: Duration,
    /// Retry ceiling applied to Deployment tasks.
    pub max_deployment_retries: u32,
}

/// Mutation applied by a compare-and-swap on a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskUpdate {
    /// Target status.
    pub status: TaskStatus,
    /// Why the transition happens.
    pub reason: TransitionReason,
    /// New retry count, if changing.
    pub retry_count: Option<u32>,
    /// New claim time, if changing.
    pub valid_after: Option<DateTime<Utc>>,
    /// Failure message to record.
    pub exception: Option<String>,
    /// Failure trace to record.
    pub stacktrace: Option<String>,
    /// New follow-up marker, if changing.
    pub follow_up_pending: Option<bool>,
}

impl TaskUpdate {
    /// Creates an update that only changes status.
    #[must_use]
    pub const fn to(status: TaskStatus, reason: TransitionReason) -> Self {
        Self {
            status,
            reason,
            retry_count: None,
            valid_after: None,
            exception: None,
            stacktrace: None,
            follow_up_pending: None,
        }
    }

    /// Sets the follow-up marker.
    #[must_use]
    pub const fn with_follow_up_pending(mut self, pending: bool) -> Self {
        self.follow_up_pending = Some(pending);
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub const fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    /// Sets the earliest claim time.
    #[must_use]
    pub const fn with_valid_after(mut self, valid_after: DateTime<Utc>) -> Self {
        self.valid_after = Some(valid_after);
        self
    }

    /// Records a failure.
    #[must_use]
    pub fn with_failure(mut self, exception: Option<String>, stacktrace: Option<String>) -> Self {
        self.exception = exception;
        self.stacktrace = stacktrace;
        self
    }
}

/// Outcome reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportedStatus {
    /// Collection completed.
    Success,
    /// Collection failed.
    Failed,
}

/// Result of executing a task, as reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// The executed task.
    pub task_id: DataCollectionTaskId,
    /// Outcome.
    pub status: ReportedStatus,
    /// Failure message.
    pub exception: Option<String>,
    /// Failure trace.
    pub stacktrace: Option<String>,
}

impl TaskResult {
    /// A successful result.
    #[must_use]
    pub const fn success(task_id: DataCollectionTaskId) -> Self {
        Self {
            task_id,
            status: ReportedStatus::Success,
            exception: None,
            stacktrace: None,
        }
    }

    /// A failed result.
    #[must_use]
    pub fn failure(
        task_id: DataCollectionTaskId,
        exception: impl Into<String>,
        stacktrace: Option<String>,
    ) -> Self {
        Self {
            task_id,
            status: ReportedStatus::Failed,
            exception: Some(exception.into()),
            stacktrace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn task(task_type: DataCollectionTaskType) -> DataCollectionTask {
        let mut task = DataCollectionTask::new(
            "acme",
            VerificationTaskId::generate(),
            "worker-1",
            task_type,
            TimeWindow::starting_at(t0(), Duration::minutes(5)),
        );
        task.stamp_created_at(t0(), Duration::days(30));
        task.valid_after = t0();
        task
    }

    fn filter() -> ClaimFilter {
        ClaimFilter {
            account_id: "acme".into(),
            worker_id: "worker-1".into(),
            stale_after: Duration::minutes(5),
            max_deployment_retries: 3,
        }
    }

    #[test]
    fn status_transitions() {
        assert!(TaskStatus::Waiting.can_transition_to(TaskStatus::Queued));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Waiting.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Aborted.can_transition_to(TaskStatus::Queued));
        assert!(TaskStatus::Success.valid_transitions().is_empty());
    }

    #[test]
    fn labels_are_screaming_case() {
        assert_eq!(TaskStatus::Queued.to_string(), "QUEUED");
        assert_eq!(TransitionReason::StaleReclaimed.to_string(), "stale_reclaimed");
        assert_eq!(DataCollectionTaskType::ServiceGuard.as_label(), "service_guard");
    }

    #[test]
    fn new_task_is_claimable_after_window_end() {
        let task = DataCollectionTask::new(
            "acme",
            VerificationTaskId::generate(),
            "w",
            DataCollectionTaskType::ServiceGuard,
            TimeWindow::starting_at(t0(), Duration::minutes(5)),
        );
        assert_eq!(task.valid_after, t0() + Duration::minutes(5));
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(task.queue_analysis);
    }

    #[test]
    fn claim_requires_matching_worker_and_valid_after() {
        let task = task(DataCollectionTaskType::ServiceGuard);
        assert!(task.is_claimable_at(&filter(), t0()));
        assert!(!task.is_claimable_at(&filter(), t0() - Duration::seconds(1)));

        let mut other = filter();
        other.worker_id = "worker-2".into();
        assert!(!task.is_claimable_at(&other, t0()));
    }

    #[test]
    fn fresh_claim_keeps_retry_count_and_reclaim_bumps_it() -> Result<()> {
        let mut task = task(DataCollectionTaskType::ServiceGuard);
        task.claim_at(t0())?;
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.last_transition_reason, Some(TransitionReason::Claimed));

        let later = t0() + Duration::minutes(6);
        assert!(task.is_claimable_at(&filter(), later));
        task.claim_at(later)?;
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.last_updated_at, later);
        assert_eq!(
            task.last_transition_reason,
            Some(TransitionReason::StaleReclaimed)
        );
        Ok(())
    }

    #[test]
    fn running_task_is_not_claimable_before_stale() -> Result<()> {
        let mut task = task(DataCollectionTaskType::ServiceGuard);
        task.claim_at(t0())?;
        assert!(!task.is_claimable_at(&filter(), t0() + Duration::minutes(4)));
        Ok(())
    }

    #[test]
    fn deployment_retry_ceiling_applies_but_service_guard_is_exempt() {
        let mut deployment = task(DataCollectionTaskType::Deployment);
        deployment.retry_count = 4;
        assert!(!deployment.is_claimable_at(&filter(), t0()));
        deployment.retry_count = 3;
        assert!(deployment.is_claimable_at(&filter(), t0()));

        let mut service_guard = task(DataCollectionTaskType::ServiceGuard);
        service_guard.retry_count = 40;
        assert!(service_guard.is_claimable_at(&filter(), t0()));
    }

    #[test]
    fn abandoned_only_for_deployment_at_ceiling() -> Result<()> {
        let mut task = task(DataCollectionTaskType::Deployment);
        task.claim_at(t0())?;
        task.retry_count = 3;
        let later = t0() + Duration::minutes(10);
        assert!(task.is_abandoned_at(later, Duration::minutes(5), 3));
        assert!(!task.is_claimable_at(&filter(), later));
        task.retry_count = 2;
        assert!(!task.is_abandoned_at(later, Duration::minutes(5), 3));
        Ok(())
    }

    #[test]
    fn apply_rejects_invalid_transition() {
        let mut task = task(DataCollectionTaskType::Deployment);
        let err = task
            .apply(
                &TaskUpdate::to(TaskStatus::Success, TransitionReason::CollectionSucceeded),
                t0(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(task.status, TaskStatus::Queued);
    }

    #[test]
    fn apply_records_failure_fields() -> Result<()> {
        let mut task = task(DataCollectionTaskType::Deployment);
        task.claim_at(t0())?;
        let update = TaskUpdate::to(TaskStatus::Failed, TransitionReason::CollectionFailed)
            .with_failure(Some("timeout".into()), Some("trace".into()));
        task.apply(&update, t0())?;
        assert_eq!(task.exception.as_deref(), Some("timeout"));
        assert_eq!(task.stacktrace.as_deref(), Some("trace"));
        Ok(())
    }

    #[test]
    fn apply_sets_and_keeps_follow_up_marker() -> Result<()> {
        let mut task = task(DataCollectionTaskType::Deployment);
        task.claim_at(t0())?;
        let update = TaskUpdate::to(TaskStatus::Success, TransitionReason::CollectionSucceeded)
            .with_follow_up_pending(true);
        task.apply(&update, t0())?;
        assert!(task.follow_up_pending);
        Ok(())
    }

    #[test]
    fn follow_up_marker_defaults_when_absent() -> Result<()> {
        let mut json = serde_json::to_value(task(DataCollectionTaskType::ServiceGuard))?;
        json.as_object_mut()
            .map(|fields| fields.remove("follow_up_pending"));
        let task: DataCollectionTask = serde_json::from_value(json)?;
        assert!(!task.follow_up_pending);
        Ok(())
    }

    #[test]
    fn status_serializes_screaming() {
        let json = serde_json::to_string(&TaskStatus::Waiting).unwrap();
        assert_eq!(json, "\"WAITING\"");
    }
}
