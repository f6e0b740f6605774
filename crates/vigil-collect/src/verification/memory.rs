//! In-memory verification task store for testing.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use vigil_core::VerificationTaskId;

use super::{TaskInfo, VerificationTask, VerificationTaskStore};
use crate::error::{Error, Result};

/// In-memory verification task store.
#[derive(Debug, Default)]
pub struct InMemoryVerificationTaskStore {
    tasks: RwLock<HashMap<VerificationTaskId, VerificationTask>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemoryVerificationTaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VerificationTaskStore for InMemoryVerificationTaskStore {
    async fn insert_if_absent(&self, task: VerificationTask) -> Result<VerificationTask> {
        let mut tasks = self.tasks.write().map_err(poison_err)?;
        let existing = tasks
            .values()
            .find(|t| t.account_id == task.account_id && t.task_info == task.task_info)
            .cloned();
        let stored = existing.unwrap_or_else(|| {
            tasks.insert(task.id, task.clone());
            task
        });
        drop(tasks);
        Ok(stored)
    }

    async fn get(&self, id: &VerificationTaskId) -> Result<Option<VerificationTask>> {
        let result = {
            let tasks = self.tasks.read().map_err(poison_err)?;
            tasks.get(id).cloned()
        };
        Ok(result)
    }

    async fn find_by_info(
        &self,
        account_id: &str,
        task_info: &TaskInfo,
    ) -> Result<Option<VerificationTask>> {
        let result = {
            let tasks = self.tasks.read().map_err(poison_err)?;
            tasks
                .values()
                .find(|t| t.account_id == account_id && t.task_info == *task_info)
                .cloned()
        };
        Ok(result)
    }

    async fn find_by_job_instance(
        &self,
        verification_job_instance_id: &str,
    ) -> Result<Vec<VerificationTask>> {
        let mut result: Vec<VerificationTask> = {
            let tasks = self.tasks.read().map_err(poison_err)?;
            tasks
                .values()
                .filter(|t| {
                    t.task_info.verification_job_instance_id() == Some(verification_job_instance_id)
                })
                .cloned()
                .collect()
        };
        result.sort_by_key(|t| t.id);
        Ok(result)
    }
}
