//! Built-in sidekick executors.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{SideKickData, SideKickExecutor};
use crate::external::WorkerRegistrar;
use crate::scheduler::DataCollectionScheduler;

/// Stops collection for a deleted data source.
///
/// Aborts the source's outstanding collection tasks, then deregisters its
/// remote worker.
#[derive(Clone)]
pub struct DataSourceCleanupExecutor {
    scheduler: DataCollectionScheduler,
    registrar: Arc<dyn WorkerRegistrar>,
}

impl std::fmt::Debug for DataSourceCleanupExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceCleanupExecutor")
            .finish_non_exhaustive()
    }
}

impl DataSourceCleanupExecutor {
    /// Creates the executor.
    #[must_use]
    pub fn new(scheduler: DataCollectionScheduler, registrar: Arc<dyn WorkerRegistrar>) -> Self {
        Self {
            scheduler,
            registrar,
        }
    }
}

#[async_trait]
impl SideKickExecutor for DataSourceCleanupExecutor {
    async fn execute(&self, data: &SideKickData, now: DateTime<Utc>) -> anyhow::Result<()> {
        let SideKickData::DataSourceCleanup {
            account_id,
            data_source_id,
            verification_task_id,
            worker_id,
        } = data
        else {
            anyhow::bail!(
                "data source cleanup cannot handle {} payloads",
                data.sidekick_type()
            );
        };

        let aborted = self
            .scheduler
            .abort_pending_tasks_at(std::slice::from_ref(verification_task_id), now)
            .await
            .with_context(|| format!("aborting tasks of data source {data_source_id}"))?;

        if let Some(worker_id) = worker_id {
            self.registrar
                .deregister(account_id, worker_id)
                .await
                .with_context(|| format!("deregistering worker {worker_id}"))?;
        }

        tracing::info!(
            data_source_id = %data_source_id,
            aborted,
            "cleaned up data source collection"
        );
        Ok(())
    }
}

/// Stops collection for a finished or cancelled verification job instance.
#[derive(Debug, Clone)]
pub struct VerificationJobCleanupExecutor {
    scheduler: DataCollectionScheduler,
}

impl VerificationJobCleanupExecutor {
    /// Creates the executor.
    #[must_use]
    pub const fn new(scheduler: DataCollectionScheduler) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl SideKickExecutor for VerificationJobCleanupExecutor {
    async fn execute(&self, data: &SideKickData, now: DateTime<Utc>) -> anyhow::Result<()> {
        let SideKickData::VerificationJobCleanup {
            verification_job_instance_id,
            verification_task_ids,
        } = data
        else {
            anyhow::bail!(
                "verification job cleanup cannot handle {} payloads",
                data.sidekick_type()
            );
        };

        let aborted = self
            .scheduler
            .abort_pending_tasks_at(verification_task_ids, now)
            .await
            .with_context(|| {
                format!("aborting tasks of verification job {verification_job_instance_id}")
            })?;
        tracing::info!(
            verification_job_instance_id = %verification_job_instance_id,
            aborted,
            "cleaned up verification job collection"
        );
        Ok(())
    }
}
