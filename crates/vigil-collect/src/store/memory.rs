//! In-memory task store for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, no cross-process coordination
//! - **Single-process only**: State is not shared across process boundaries
//! - **No persistence**: All state is lost when the process exits

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use vigil_core::{DataCollectionTaskId, VerificationTaskId};

use super::{CasResult, TaskStore};
use crate::error::{Error, Result};
use crate::task::{ClaimFilter, DataCollectionTask, TaskStatus, TaskUpdate};

/// In-memory task store.
///
/// A single `RwLock` serializes every claim and CAS, which gives the same
/// guarantee a conditional update gives in a database.
///
/// ## Example
///
/// ```rust
/// use vigil_collect::store::memory::InMemoryTaskStore;
///
/// let store = InMemoryTaskStore::new();
/// assert_eq!(store.task_count().unwrap(), 0);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<DataCollectionTaskId, DataCollectionTask>>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of tasks currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn task_count(&self) -> Result<usize> {
        let count = {
            let tasks = self.tasks.read().map_err(poison_err)?;
            tasks.len()
        };
        Ok(count)
    }

    /// Replaces a stored task wholesale, bypassing state checks.
    ///
    /// Intended for tests that need to age a heartbeat or force a status.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn overwrite(&self, task: DataCollectionTask) -> Result<()> {
        {
            let mut tasks = self.tasks.write().map_err(poison_err)?;
            tasks.insert(task.id, task);
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &DataCollectionTask) -> Result<()> {
        let mut tasks = self.tasks.write().map_err(poison_err)?;
        if tasks.contains_key(&task.id) {
            drop(tasks);
            return Err(Error::precondition(format!(
                "data collection task {} already exists",
                task.id
            )));
        }
        tasks.insert(task.id, task.clone());
        drop(tasks);
        Ok(())
    }

    async fn insert_batch(&self, batch: &[DataCollectionTask]) -> Result<()> {
        let mut tasks = self.tasks.write().map_err(poison_err)?;
        if let Some(existing) = batch.iter().find(|t| tasks.contains_key(&t.id)) {
            let id = existing.id;
            drop(tasks);
            return Err(Error::precondition(format!(
                "data collection task {id} already exists"
            )));
        }
        for task in batch {
            tasks.insert(task.id, task.clone());
        }
        drop(tasks);
        Ok(())
    }

    async fn get(&self, id: &DataCollectionTaskId) -> Result<Option<DataCollectionTask>> {
        let result = {
            let tasks = self.tasks.read().map_err(poison_err)?;
            tasks.get(id).cloned()
        };
        Ok(result)
    }

    async fn claim_next(
        &self,
        filter: &ClaimFilter,
        now: DateTime<Utc>,
    ) -> Result<Option<DataCollectionTask>> {
        let mut tasks = self.tasks.write().map_err(poison_err)?;

        let Some(id) = tasks
            .values()
            .filter(|t| t.is_claimable_at(filter, now))
            .min_by_key(|t| (t.last_updated_at, t.id))
            .map(|t| t.id)
        else {
            drop(tasks);
            return Ok(None);
        };

        let Some(task) = tasks.get_mut(&id) else {
            drop(tasks);
            return Ok(None);
        };
        let claimed = task.claim_at(now).map(|()| task.clone());
        drop(tasks);
        claimed.map(Some)
    }

    async fn cas_update(
        &self,
        id: &DataCollectionTaskId,
        expected: TaskStatus,
        update: TaskUpdate,
        now: DateTime<Utc>,
    ) -> Result<CasResult> {
        let mut tasks = self.tasks.write().map_err(poison_err)?;

        let Some(task) = tasks.get_mut(id) else {
            drop(tasks);
            return Ok(CasResult::NotFound);
        };

        if task.status != expected {
            let actual = task.status;
            drop(tasks);
            return Ok(CasResult::StateMismatch { actual });
        }

        let result = task.apply(&update, now);
        drop(tasks);
        result.map(|()| CasResult::Success)
    }

    async fn find_by_verification_task(
        &self,
        verification_task_id: &VerificationTaskId,
        statuses: &[TaskStatus],
    ) -> Result<Vec<DataCollectionTask>> {
        let mut result: Vec<DataCollectionTask> = {
            let tasks = self.tasks.read().map_err(poison_err)?;
            tasks
                .values()
                .filter(|t| t.verification_task_id == *verification_task_id)
                .filter(|t| statuses.is_empty() || statuses.contains(&t.status))
                .cloned()
                .collect()
        };
        result.sort_by_key(|t| (t.start_time, t.id));
        Ok(result)
    }

    async fn finish_follow_up(&self, id: &DataCollectionTaskId, now: DateTime<Utc>) -> Result<bool> {
        let mut tasks = self.tasks.write().map_err(poison_err)?;
        let cleared = match tasks.get_mut(id) {
            Some(task) if task.follow_up_pending => {
                task.follow_up_pending = false;
                task.last_updated_at = now;
                true
            }
            _ => false,
        };
        drop(tasks);
        Ok(cleared)
    }

    async fn find_pending_follow_ups(
        &self,
        settled_before: DateTime<Utc>,
    ) -> Result<Vec<DataCollectionTask>> {
        let mut result: Vec<DataCollectionTask> = {
            let tasks = self.tasks.read().map_err(poison_err)?;
            tasks
                .values()
                .filter(|t| t.follow_up_pending && t.last_updated_at < settled_before)
                .cloned()
                .collect()
        };
        result.sort_by_key(|t| (t.last_updated_at, t.id));
        Ok(result)
    }

    async fn find_abandoned(
        &self,
        stale_after: Duration,
        max_deployment_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<DataCollectionTask>> {
        let mut result: Vec<DataCollectionTask> = {
            let tasks = self.tasks.read().map_err(poison_err)?;
            tasks
                .values()
                .filter(|t| t.is_abandoned_at(now, stale_after, max_deployment_retries))
                .cloned()
                .collect()
        };
        result.sort_by_key(|t| (t.last_updated_at, t.id));
        Ok(result)
    }
}
