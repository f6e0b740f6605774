//! Deferred side-effect jobs.
//!
//! A sidekick is a fire-and-forget job scheduled by any caller that wants a
//! slow or unreliable side effect (cleanup, webhook calls) taken off the
//! request path. The queue knows nothing about job semantics: it claims a
//! due job, dispatches its payload to the executor registered for the
//! payload's type, and records the outcome on the job.
//!
//! ## Job lifecycle
//!
//! ```text
//! QUEUED ──claim──► RUNNING ──► SUCCESS
//!    ▲                 │
//!    └──── requeue ────┤
//!                      └──────► FAILED
//! ```
//!
//! Requeue only happens when the configured [`SideKickRetryPolicy`] allows
//! another attempt.

pub mod executors;
pub mod memory;
pub mod queue;

pub use queue::{DrainSummary, SideKickQueue};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use vigil_core::{SideKickId, VerificationTaskId};

use crate::error::Result;

/// Status of a sidekick job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SideKickStatus {
    /// Waiting for `run_after` to pass.
    Queued,
    /// Claimed by a drain.
    Running,
    /// Executor completed.
    Success,
    /// Executor failed and no attempts remain.
    Failed,
}

impl SideKickStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Returns true if the transition to `target` is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Queued, Self::Running)
                | (Self::Running, Self::Success | Self::Failed | Self::Queued)
        )
    }

    /// Returns the metric label for this status.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SideKickStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Discriminator of a sidekick payload, used to pick its executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SideKickType {
    /// Tear down collection for a deleted data source.
    DataSourceCleanup,
    /// Tear down collection for a finished or cancelled verification job.
    VerificationJobCleanup,
    /// Deliver a payload to an external URL.
    WebhookCall,
}

impl SideKickType {
    /// Returns the metric label for this type.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::DataSourceCleanup => "data_source_cleanup",
            Self::VerificationJobCleanup => "verification_job_cleanup",
            Self::WebhookCall => "webhook_call",
        }
    }
}

impl fmt::Display for SideKickType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Typed payload of a sidekick job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SideKickData {
    /// A data source was deleted.
    DataSourceCleanup {
        /// Owning account.
        account_id: String,
        /// The deleted data source.
        data_source_id: String,
        /// The data source's verification task.
        verification_task_id: VerificationTaskId,
        /// The worker registered for the data source, if any.
        worker_id: Option<String>,
    },
    /// A verification job instance no longer needs collection.
    VerificationJobCleanup {
        /// The job instance being cleaned up.
        verification_job_instance_id: String,
        /// Verification tasks created for the job instance.
        verification_task_ids: Vec<VerificationTaskId>,
    },
    /// An outbound webhook delivery.
    WebhookCall {
        /// Target URL.
        url: String,
        /// JSON body.
        payload: serde_json::Value,
    },
}

impl SideKickData {
    /// Returns the payload's type.
    #[must_use]
    pub const fn sidekick_type(&self) -> SideKickType {
        match self {
            Self::DataSourceCleanup { .. } => SideKickType::DataSourceCleanup,
            Self::VerificationJobCleanup { .. } => SideKickType::VerificationJobCleanup,
            Self::WebhookCall { .. } => SideKickType::WebhookCall,
        }
    }
}

/// A deferred side-effect job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideKick {
    /// Unique identifier.
    pub id: SideKickId,
    /// Current status.
    pub status: SideKickStatus,
    /// The job is claimable once `run_after < now`.
    pub run_after: DateTime<Utc>,
    /// Number of times the job has been claimed.
    pub attempts: u32,
    /// What to execute.
    pub sidekick_data: SideKickData,
    /// Message of the last failure.
    pub exception: Option<String>,
    /// Full cause chain of the last failure.
    pub stacktrace: Option<String>,
    /// When the job was scheduled.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub last_updated_at: DateTime<Utc>,
}

impl SideKick {
    /// Creates a QUEUED job.
    #[must_use]
    pub fn new(sidekick_data: SideKickData, run_after: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: SideKickId::generate(),
            status: SideKickStatus::Queued,
            run_after,
            attempts: 0,
            sidekick_data,
            exception: None,
            stacktrace: None,
            created_at: now,
            last_updated_at: now,
        }
    }

    /// Returns the payload's type.
    #[must_use]
    pub const fn sidekick_type(&self) -> SideKickType {
        self.sidekick_data.sidekick_type()
    }

    /// Returns true if a drain at `now` may claim this job.
    #[must_use]
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SideKickStatus::Queued && self.run_after < now
    }
}

/// How a RUNNING job is settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideKickOutcome {
    /// The executor completed.
    Succeeded,
    /// The executor failed and the job is finished.
    Failed {
        /// Failure message.
        exception: String,
        /// Full cause chain.
        stacktrace: String,
    },
    /// The executor failed and the job runs again after `run_after`.
    Requeued {
        /// Next eligible time.
        run_after: DateTime<Utc>,
        /// Failure message.
        exception: String,
        /// Full cause chain.
        stacktrace: String,
    },
}

impl SideKickOutcome {
    /// The status a job ends in after this outcome.
    #[must_use]
    pub const fn status(&self) -> SideKickStatus {
        match self {
            Self::Succeeded => SideKickStatus::Success,
            Self::Failed { .. } => SideKickStatus::Failed,
            Self::Requeued { .. } => SideKickStatus::Queued,
        }
    }
}

/// Storage for sidekick jobs.
#[async_trait]
pub trait SideKickStore: Send + Sync {
    /// Persists a new job.
    async fn insert(&self, job: &SideKick) -> Result<()>;

    /// Gets a job by id.
    async fn get(&self, id: &SideKickId) -> Result<Option<SideKick>>;

    /// Atomically claims the oldest due job.
    ///
    /// Selects jobs with `status = QUEUED AND run_after < now`, ordered by
    /// `created_at`, and marks the winner RUNNING with `attempts + 1` in the
    /// same step.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<SideKick>>;

    /// Settles a RUNNING job.
    ///
    /// Returns `false` if the job is missing or not RUNNING.
    async fn complete(
        &self,
        id: &SideKickId,
        outcome: SideKickOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Executes the payloads of one sidekick type.
///
/// Errors are captured on the job record: the message as `exception` and the
/// debug rendering (with its cause chain) as `stacktrace`.
#[async_trait]
pub trait SideKickExecutor: Send + Sync {
    /// Runs the side effect as part of a drain at `now`.
    async fn execute(&self, data: &SideKickData, now: DateTime<Utc>) -> anyhow::Result<()>;
}

/// Maps sidekick types to their executors.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<SideKickType, Arc<dyn SideKickExecutor>>,
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.executors.keys().collect();
        types.sort();
        f.debug_struct("ExecutorRegistry")
            .field("types", &types)
            .finish()
    }
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the executor for `sidekick_type`, replacing any previous one.
    #[must_use]
    pub fn with_executor(
        mut self,
        sidekick_type: SideKickType,
        executor: Arc<dyn SideKickExecutor>,
    ) -> Self {
        self.executors.insert(sidekick_type, executor);
        self
    }

    /// Gets the executor for `sidekick_type`.
    #[must_use]
    pub fn get(&self, sidekick_type: SideKickType) -> Option<Arc<dyn SideKickExecutor>> {
        self.executors.get(&sidekick_type).cloned()
    }
}

/// Automatic retry of failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideKickRetryPolicy {
    /// Total attempts per job, including the first.
    pub max_attempts: u32,
    /// Delay multiplied by the attempt number before the next attempt.
    pub backoff: Duration,
}

impl Default for SideKickRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::minutes(1),
        }
    }
}

impl SideKickRetryPolicy {
    /// Returns the next run time after a failed attempt, or `None` when the
    /// job has used all its attempts.
    ///
    /// Delays that overflow saturate at the latest representable instant.
    #[must_use]
    pub fn next_run_after(&self, attempts: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if attempts >= self.max_attempts {
            return None;
        }
        let backoff = self.backoff.max(Duration::milliseconds(1));
        let factor = i32::try_from(attempts.max(1)).unwrap_or(i32::MAX);
        let delay = backoff.checked_mul(factor).unwrap_or(Duration::MAX);
        Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn webhook() -> SideKickData {
        SideKickData::WebhookCall {
            url: "https://hooks.example.com/x".into(),
            payload: serde_json::json!({"ok": true}),
        }
    }

    #[test]
    fn status_transitions() {
        assert!(SideKickStatus::Queued.can_transition_to(SideKickStatus::Running));
        assert!(SideKickStatus::Running.can_transition_to(SideKickStatus::Success));
        assert!(SideKickStatus::Running.can_transition_to(SideKickStatus::Queued));
        assert!(!SideKickStatus::Queued.can_transition_to(SideKickStatus::Success));
        assert!(!SideKickStatus::Failed.can_transition_to(SideKickStatus::Queued));
        assert!(SideKickStatus::Failed.is_terminal());
        assert!(!SideKickStatus::Running.is_terminal());
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let json = serde_json::to_value(webhook()).unwrap();
        assert_eq!(json["type"], "WEBHOOK_CALL");
        assert_eq!(json["url"], "https://hooks.example.com/x");
        let back: SideKickData = serde_json::from_value(json).unwrap();
        assert_eq!(back.sidekick_type(), SideKickType::WebhookCall);
    }

    #[test]
    fn due_only_strictly_after_run_after() {
        let job = SideKick::new(webhook(), t0(), t0());
        assert!(!job.is_due_at(t0()));
        assert!(job.is_due_at(t0() + Duration::milliseconds(1)));
    }

    #[test]
    fn default_policy_never_retries() {
        assert_eq!(SideKickRetryPolicy::default().next_run_after(1, t0()), None);
    }

    #[test]
    fn linear_backoff_grows_with_attempts() {
        let policy = SideKickRetryPolicy {
            max_attempts: 3,
            backoff: Duration::seconds(30),
        };
        assert_eq!(policy.next_run_after(1, t0()), Some(t0() + Duration::seconds(30)));
        assert_eq!(policy.next_run_after(2, t0()), Some(t0() + Duration::seconds(60)));
        assert_eq!(policy.next_run_after(3, t0()), None);
    }

    #[test]
    fn zero_backoff_still_moves_forward() {
        let policy = SideKickRetryPolicy {
            max_attempts: 2,
            backoff: Duration::zero(),
        };
        let next = policy.next_run_after(1, t0()).unwrap();
        assert!(next > t0());
    }

    #[test]
    fn huge_backoff_saturates_instead_of_overflowing() {
        let policy = SideKickRetryPolicy {
            max_attempts: u32::MAX,
            backoff: Duration::MAX,
        };
        assert_eq!(
            policy.next_run_after(u32::MAX - 1, t0()),
            Some(DateTime::<Utc>::MAX_UTC)
        );

        let policy = SideKickRetryPolicy {
            max_attempts: 3,
            backoff: Duration::days(100_000_000),
        };
        assert_eq!(policy.next_run_after(2, t0()), Some(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn negative_backoff_still_moves_forward() {
        let policy = SideKickRetryPolicy {
            max_attempts: 5,
            backoff: Duration::MIN,
        };
        assert_eq!(
            policy.next_run_after(4, t0()),
            Some(t0() + Duration::milliseconds(4))
        );
    }
}
