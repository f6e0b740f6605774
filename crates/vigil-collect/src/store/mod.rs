//! Pluggable storage for collection tasks.
//!
//! ## Design Principles
//!
//! - **Atomic claim**: `claim_next` selects and mutates in one step so two
//!   workers never observe themselves as the winner for the same task
//! - **CAS semantics**: every other state transition is a compare-and-swap on
//!   the expected status
//! - **Testability**: In-memory implementation for tests; a durable backend
//!   implements the same trait with a conditional `UPDATE ... RETURNING`

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use vigil_core::{DataCollectionTaskId, VerificationTaskId};

use crate::error::Result;
use crate::task::{ClaimFilter, DataCollectionTask, TaskStatus, TaskUpdate};

/// Result of a compare-and-swap operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult {
    /// Operation succeeded.
    Success,
    /// Entity not found.
    NotFound,
    /// Status didn't match the expected value.
    StateMismatch {
        /// The actual status that was found.
        actual: TaskStatus,
    },
}

impl CasResult {
    /// Returns true if the operation succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if the entity was not found.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Storage abstraction for collection tasks.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync`; many workers and schedulers share one store.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts a new task.
    ///
    /// Fails with a precondition error if the id already exists.
    async fn insert(&self, task: &DataCollectionTask) -> Result<()>;

    /// Inserts a batch of tasks atomically: either all are stored or none.
    async fn insert_batch(&self, tasks: &[DataCollectionTask]) -> Result<()>;

    /// Gets a task by ID.
    async fn get(&self, id: &DataCollectionTaskId) -> Result<Option<DataCollectionTask>>;

    /// Atomically claims the oldest eligible task.
    ///
    /// Selects tasks matching [`DataCollectionTask::is_claimable_at`], ordered
    /// by `last_updated_at` ascending, and marks the winner RUNNING in the same
    /// step. Returns `None` when nothing is claimable.
    async fn claim_next(
        &self,
        filter: &ClaimFilter,
        now: DateTime<Utc>,
    ) -> Result<Option<DataCollectionTask>>;

    /// Atomically applies `update` if the task's status equals `expected`.
    ///
    /// # Returns
    ///
    /// - `CasResult::Success` if the update was applied
    /// - `CasResult::NotFound` if the task doesn't exist
    /// - `CasResult::StateMismatch` if the current status doesn't match expected
    async fn cas_update(
        &self,
        id: &DataCollectionTaskId,
        expected: TaskStatus,
        update: TaskUpdate,
        now: DateTime<Utc>,
    ) -> Result<CasResult>;

    /// Gets the tasks of a verification task, optionally restricted to `statuses`.
    ///
    /// An empty `statuses` slice matches every status. Results are ordered by
    /// window start.
    async fn find_by_verification_task(
        &self,
        verification_task_id: &VerificationTaskId,
        statuses: &[TaskStatus],
    ) -> Result<Vec<DataCollectionTask>>;

    /// Clears the follow-up marker of a settled task.
    ///
    /// Returns `true` if the marker was set and is now cleared, `false` if the
    /// task is missing or had nothing pending.
    async fn finish_follow_up(&self, id: &DataCollectionTaskId, now: DateTime<Utc>) -> Result<bool>;

    /// Gets settled tasks whose follow-up work is still pending and that have
    /// not been written since `settled_before`.
    async fn find_pending_follow_ups(
        &self,
        settled_before: DateTime<Utc>,
    ) -> Result<Vec<DataCollectionTask>>;

    /// Gets stale RUNNING tasks that the claim query can no longer reclaim.
    async fn find_abandoned(
        &self,
        stale_after: Duration,
        max_deployment_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<DataCollectionTask>>;
}
