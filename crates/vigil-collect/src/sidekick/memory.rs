//! In-memory sidekick store for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, no cross-process coordination
//! - **Single-process only**: State is not shared across process boundaries

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vigil_core::SideKickId;

use super::{SideKick, SideKickOutcome, SideKickStatus, SideKickStore};
use crate::error::{Error, Result};

/// In-memory sidekick store.
#[derive(Debug, Default)]
pub struct InMemorySideKickStore {
    jobs: RwLock<HashMap<SideKickId, SideKick>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemorySideKickStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every job with the given status.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn jobs_with_status(&self, status: SideKickStatus) -> Result<Vec<SideKick>> {
        let mut jobs: Vec<SideKick> = {
            let jobs = self.jobs.read().map_err(poison_err)?;
            jobs.values().filter(|j| j.status == status).cloned().collect()
        };
        jobs.sort_by_key(|j| (j.created_at, j.id));
        Ok(jobs)
    }
}

#[async_trait]
impl SideKickStore for InMemorySideKickStore {
    async fn insert(&self, job: &SideKick) -> Result<()> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;
        if jobs.contains_key(&job.id) {
            drop(jobs);
            return Err(Error::precondition(format!("sidekick {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        drop(jobs);
        Ok(())
    }

    async fn get(&self, id: &SideKickId) -> Result<Option<SideKick>> {
        let job = {
            let jobs = self.jobs.read().map_err(poison_err)?;
            jobs.get(id).cloned()
        };
        Ok(job)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<SideKick>> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;

        let Some(id) = jobs
            .values()
            .filter(|j| j.is_due_at(now))
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id)
        else {
            drop(jobs);
            return Ok(None);
        };

        let claimed = jobs.get_mut(&id).map(|job| {
            job.status = SideKickStatus::Running;
            job.attempts = job.attempts.saturating_add(1);
            job.last_updated_at = now;
            job.clone()
        });
        drop(jobs);
        Ok(claimed)
    }

    async fn complete(
        &self,
        id: &SideKickId,
        outcome: SideKickOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;
        let Some(job) = jobs.get_mut(id) else {
            drop(jobs);
            return Ok(false);
        };
        if job.status != SideKickStatus::Running {
            drop(jobs);
            return Ok(false);
        }

        job.status = outcome.status();
        job.last_updated_at = now;
        match outcome {
            SideKickOutcome::Succeeded => {}
            SideKickOutcome::Failed {
                exception,
                stacktrace,
            } => {
                job.exception = Some(exception);
                job.stacktrace = Some(stacktrace);
            }
            SideKickOutcome::Requeued {
                run_after,
                exception,
                stacktrace,
            } => {
                job.run_after = run_after;
                job.exception = Some(exception);
                job.stacktrace = Some(stacktrace);
            }
        }
        drop(jobs);
        Ok(true)
    }
}
