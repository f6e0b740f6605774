//! In-memory host record store for testing.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use vigil_core::{TimeWindow, VerificationTaskId};

use super::{HostRecord, HostRecordStore};
use crate::error::{Error, Result};

/// In-memory host record store.
#[derive(Debug, Default)]
pub struct InMemoryHostRecordStore {
    records: RwLock<Vec<HostRecord>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemoryHostRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HostRecordStore for InMemoryHostRecordStore {
    async fn save(&self, record: HostRecord) -> Result<()> {
        {
            let mut records = self.records.write().map_err(poison_err)?;
            records.push(record);
        }
        Ok(())
    }

    async fn find_overlapping(
        &self,
        verification_task_id: &VerificationTaskId,
        window: TimeWindow,
    ) -> Result<Vec<HostRecord>> {
        let result = {
            let records = self.records.read().map_err(poison_err)?;
            records
                .iter()
                .filter(|r| r.verification_task_id == *verification_task_id && r.overlaps(&window))
                .cloned()
                .collect()
        };
        Ok(result)
    }
}
