//! Verification tasks: the opaque join key between configurations and stores.
//!
//! A [`VerificationTask`] binds one owning identity (a live-monitoring
//! config, a deployment job instance, or an SLI) to a stable id. Records are
//! append-only: creation is idempotent per identity and nothing is updated
//! afterwards.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use vigil_core::VerificationTaskId;

use crate::error::{Error, Result};

/// The identity a verification task stands for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskInfo {
    /// Continuous monitoring of one data source.
    LiveMonitoring {
        /// Data source (CV config) id.
        cv_config_id: String,
    },
    /// One data source verified within one deployment job instance.
    Deployment {
        /// Data source (CV config) id.
        cv_config_id: String,
        /// Deployment verification job instance id.
        verification_job_instance_id: String,
    },
    /// A service level indicator.
    Sli {
        /// SLI id.
        sli_id: String,
    },
}

impl TaskInfo {
    /// Returns the data source id, if the identity has one.
    #[must_use]
    pub fn cv_config_id(&self) -> Option<&str> {
        match self {
            Self::LiveMonitoring { cv_config_id } | Self::Deployment { cv_config_id, .. } => {
                Some(cv_config_id)
            }
            Self::Sli { .. } => None,
        }
    }

    /// Returns the deployment job instance id, if any.
    #[must_use]
    pub fn verification_job_instance_id(&self) -> Option<&str> {
        match self {
            Self::Deployment {
                verification_job_instance_id,
                ..
            } => Some(verification_job_instance_id),
            Self::LiveMonitoring { .. } | Self::Sli { .. } => None,
        }
    }
}

/// An immutable mapping record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationTask {
    /// Stable opaque id.
    pub id: VerificationTaskId,
    /// Owning account.
    pub account_id: String,
    /// The identity the id stands for.
    pub task_info: TaskInfo,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Storage for verification task mappings.
#[async_trait]
pub trait VerificationTaskStore: Send + Sync {
    /// Inserts `task` unless a record with the same account and identity
    /// exists; returns whichever record is stored.
    async fn insert_if_absent(&self, task: VerificationTask) -> Result<VerificationTask>;

    /// Gets a record by id.
    async fn get(&self, id: &VerificationTaskId) -> Result<Option<VerificationTask>>;

    /// Finds the record for an account and identity.
    async fn find_by_info(
        &self,
        account_id: &str,
        task_info: &TaskInfo,
    ) -> Result<Option<VerificationTask>>;

    /// Finds every record belonging to a deployment job instance.
    async fn find_by_job_instance(
        &self,
        verification_job_instance_id: &str,
    ) -> Result<Vec<VerificationTask>>;
}

/// Creates and resolves verification task ids.
#[derive(Clone)]
pub struct VerificationTaskMapper {
    store: Arc<dyn VerificationTaskStore>,
}

impl std::fmt::Debug for VerificationTaskMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationTaskMapper").finish_non_exhaustive()
    }
}

impl VerificationTaskMapper {
    /// Creates a mapper over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn VerificationTaskStore>) -> Self {
        Self { store }
    }

    /// Creates (or returns) the live-monitoring verification task for a data source.
    ///
    /// # Errors
    ///
    /// Returns a precondition error for empty identifiers, or a storage error.
    pub async fn create_live_monitoring_task(
        &self,
        account_id: &str,
        cv_config_id: &str,
    ) -> Result<VerificationTaskId> {
        require("cv_config_id", cv_config_id)?;
        self.create(
            account_id,
            TaskInfo::LiveMonitoring {
                cv_config_id: cv_config_id.to_string(),
            },
        )
        .await
    }

    /// Creates (or returns) the verification task for a data source within a
    /// deployment job instance.
    ///
    /// # Errors
    ///
    /// Returns a precondition error for empty identifiers, or a storage error.
    pub async fn create_deployment_task(
        &self,
        account_id: &str,
        cv_config_id: &str,
        verification_job_instance_id: &str,
    ) -> Result<VerificationTaskId> {
        require("cv_config_id", cv_config_id)?;
        require("verification_job_instance_id", verification_job_instance_id)?;
        self.create(
            account_id,
            TaskInfo::Deployment {
                cv_config_id: cv_config_id.to_string(),
                verification_job_instance_id: verification_job_instance_id.to_string(),
            },
        )
        .await
    }

    /// Creates (or returns) the verification task for an SLI.
    ///
    /// # Errors
    ///
    /// Returns a precondition error for empty identifiers, or a storage error.
    pub async fn create_sli_task(&self, account_id: &str, sli_id: &str) -> Result<VerificationTaskId> {
        require("sli_id", sli_id)?;
        self.create(
            account_id,
            TaskInfo::Sli {
                sli_id: sli_id.to_string(),
            },
        )
        .await
    }

    async fn create(&self, account_id: &str, task_info: TaskInfo) -> Result<VerificationTaskId> {
        require("account_id", account_id)?;
        let stored = self
            .store
            .insert_if_absent(VerificationTask {
                id: VerificationTaskId::generate(),
                account_id: account_id.to_string(),
                task_info,
                created_at: Utc::now(),
            })
            .await?;
        Ok(stored.id)
    }

    /// Gets a verification task by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such record exists.
    pub async fn get(&self, id: &VerificationTaskId) -> Result<VerificationTask> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("verification task", id))
    }

    /// Looks up the live-monitoring task id for a data source.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lookup fails.
    pub async fn live_monitoring_task_id(
        &self,
        account_id: &str,
        cv_config_id: &str,
    ) -> Result<Option<VerificationTaskId>> {
        let info = TaskInfo::LiveMonitoring {
            cv_config_id: cv_config_id.to_string(),
        };
        Ok(self
            .store
            .find_by_info(account_id, &info)
            .await?
            .map(|t| t.id))
    }

    /// Looks up the task id for an SLI.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lookup fails.
    pub async fn sli_task_id(
        &self,
        account_id: &str,
        sli_id: &str,
    ) -> Result<Option<VerificationTaskId>> {
        let info = TaskInfo::Sli {
            sli_id: sli_id.to_string(),
        };
        Ok(self
            .store
            .find_by_info(account_id, &info)
            .await?
            .map(|t| t.id))
    }

    /// Returns every task id belonging to a deployment job instance.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lookup fails.
    pub async fn deployment_task_ids(
        &self,
        verification_job_instance_id: &str,
    ) -> Result<Vec<VerificationTaskId>> {
        Ok(self
            .store
            .find_by_job_instance(verification_job_instance_id)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect())
    }

    /// Returns the deployment job instance a task belongs to, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the task does not exist.
    pub async fn job_instance_id(&self, id: &VerificationTaskId) -> Result<Option<String>> {
        let task = self.get(id).await?;
        Ok(task
            .task_info
            .verification_job_instance_id()
            .map(ToString::to_string))
    }

    /// Returns the data source a task collects from, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the task does not exist.
    pub async fn data_source_id(&self, id: &VerificationTaskId) -> Result<Option<String>> {
        let task = self.get(id).await?;
        Ok(task.task_info.cv_config_id().map(ToString::to_string))
    }
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::precondition(format!("{name} must not be empty")));
    }
    Ok(())
}
