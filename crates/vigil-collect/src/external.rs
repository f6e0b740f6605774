//! Outbound collaborator contracts.
//!
//! The scheduler calls out to three services it does not own: the remote
//! worker registrar, the analysis orchestrator, and the deployment job
//! progress tracker. Each is a trait so hosts can wire real clients and
//! tests can record calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vigil_core::{TimeWindow, VerificationTaskId};

use crate::error::Result;
use crate::source::DataSource;
use crate::task::TaskStatus;

/// Registers remote collection workers for data sources.
#[async_trait]
pub trait WorkerRegistrar: Send + Sync {
    /// Registers a worker for `data_source` and returns its id.
    async fn register(&self, data_source: &DataSource) -> Result<String>;

    /// Removes a previously registered worker.
    async fn deregister(&self, account_id: &str, worker_id: &str) -> Result<()>;
}

/// Queues anomaly analysis for collected windows.
#[async_trait]
pub trait AnalysisOrchestrator: Send + Sync {
    /// Queues analysis of `window` for a verification task.
    async fn queue_analysis(
        &self,
        verification_task_id: &VerificationTaskId,
        window: TimeWindow,
    ) -> Result<()>;
}

/// A progress entry for a deployment verification job instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressLog {
    /// The job instance the entry belongs to.
    pub verification_job_instance_id: String,
    /// The verification task whose window progressed.
    pub verification_task_id: VerificationTaskId,
    /// The collected window.
    pub window: TimeWindow,
    /// Status of the collection task.
    pub status: TaskStatus,
    /// Human-readable message.
    pub log: String,
    /// Whether this entry closes the job instance.
    pub is_final_state: bool,
    /// When the entry was produced.
    pub created_at: DateTime<Utc>,
}

/// Records progress for deployment verification job instances.
#[async_trait]
pub trait ProgressTracker: Send + Sync {
    /// Appends a progress entry.
    async fn log_progress(&self, entry: ProgressLog) -> Result<()>;
}
