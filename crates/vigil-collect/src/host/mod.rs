//! Host population records.
//!
//! Each ingestion batch records which hosts reported for a verification task
//! over the batch's time range, so the dynamic host set of any window can be
//! reconstructed later. Records are append-only.

pub mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vigil_core::{HostRecordId, TimeWindow, VerificationTaskId};

use crate::error::Result;

/// Hosts observed for a verification task over `[start_time, end_time]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    /// Unique identifier.
    pub id: HostRecordId,
    /// Owning account.
    pub account_id: String,
    /// The verification task the hosts reported for.
    pub verification_task_id: VerificationTaskId,
    /// Earliest sample timestamp.
    pub start_time: DateTime<Utc>,
    /// Latest sample timestamp (inclusive).
    pub end_time: DateTime<Utc>,
    /// Hostnames observed.
    pub hosts: BTreeSet<String>,
}

impl HostRecord {
    /// Returns true if the record's time range touches `window`.
    #[must_use]
    pub fn overlaps(&self, window: &TimeWindow) -> bool {
        self.start_time < window.end && self.end_time >= window.start
    }
}

/// Storage for host population records.
#[async_trait]
pub trait HostRecordStore: Send + Sync {
    /// Appends a record.
    async fn save(&self, record: HostRecord) -> Result<()>;

    /// Gets the records of a verification task overlapping `window`.
    async fn find_overlapping(
        &self,
        verification_task_id: &VerificationTaskId,
        window: TimeWindow,
    ) -> Result<Vec<HostRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn overlap_treats_end_time_as_inclusive() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let record = HostRecord {
            id: HostRecordId::generate(),
            account_id: "acme".into(),
            verification_task_id: VerificationTaskId::generate(),
            start_time: t0,
            end_time: t0 + Duration::minutes(4),
            hosts: BTreeSet::from(["h1".to_string()]),
        };
        assert!(record.overlaps(&TimeWindow::starting_at(t0 + Duration::minutes(4), Duration::minutes(5))));
        assert!(!record.overlaps(&TimeWindow::starting_at(t0 + Duration::minutes(5), Duration::minutes(5))));
        assert!(!record.overlaps(&TimeWindow::starting_at(t0 - Duration::minutes(5), Duration::minutes(5))));
    }
}
