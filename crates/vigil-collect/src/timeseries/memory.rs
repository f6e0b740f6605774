//! In-memory time-series store for testing.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vigil_core::{TimeWindow, VerificationTaskId};

use super::{BucketKey, MetricRisk, TimeSeriesRecord, TimeSeriesStore};
use crate::error::{Error, Result};

/// In-memory time-series store.
///
/// Buckets live in a `BTreeMap` keyed by [`BucketKey`], so range reads come
/// back in key order.
#[derive(Debug, Default)]
pub struct InMemoryTimeSeriesStore {
    buckets: RwLock<BTreeMap<BucketKey, TimeSeriesRecord>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemoryTimeSeriesStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of buckets stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn bucket_count(&self) -> Result<usize> {
        let count = {
            let buckets = self.buckets.read().map_err(poison_err)?;
            buckets.len()
        };
        Ok(count)
    }
}

#[async_trait]
impl TimeSeriesStore for InMemoryTimeSeriesStore {
    async fn upsert_append(&self, record: TimeSeriesRecord) -> Result<()> {
        let mut buckets = self.buckets.write().map_err(poison_err)?;
        let TimeSeriesRecord {
            key,
            account_id,
            metric_identifier,
            values,
        } = record;
        buckets
            .entry(key.clone())
            .or_insert_with(|| TimeSeriesRecord {
                key,
                account_id,
                metric_identifier,
                values: Vec::new(),
            })
            .values
            .extend(values);
        drop(buckets);
        Ok(())
    }

    async fn find_range(
        &self,
        verification_task_id: &VerificationTaskId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TimeSeriesRecord>> {
        let result = {
            let buckets = self.buckets.read().map_err(poison_err)?;
            buckets
                .values()
                .filter(|r| {
                    r.key.verification_task_id == *verification_task_id
                        && r.key.bucket_start_time >= from
                        && r.key.bucket_start_time < to
                })
                .cloned()
                .collect()
        };
        Ok(result)
    }

    async fn apply_risk(
        &self,
        verification_task_id: &VerificationTaskId,
        buckets_from: DateTime<Utc>,
        window: TimeWindow,
        risks: &[MetricRisk],
    ) -> Result<usize> {
        let mut buckets = self.buckets.write().map_err(poison_err)?;
        let mut changed = 0;
        for record in buckets.values_mut().filter(|r| {
            r.key.verification_task_id == *verification_task_id
                && r.key.bucket_start_time >= buckets_from
                && r.key.bucket_start_time < window.end
        }) {
            for risk in risks.iter().filter(|m| m.metric_name == record.key.metric_name) {
                for value in record
                    .values
                    .iter_mut()
                    .filter(|v| v.group_name == risk.group_name && window.contains(v.timestamp))
                {
                    let raised = value.risk_score.map_or(risk.risk, |s| s.max(risk.risk));
                    if value.risk_score != Some(raised) {
                        value.risk_score = Some(raised);
                        changed += 1;
                    }
                }
            }
        }
        drop(buckets);
        Ok(changed)
    }
}
