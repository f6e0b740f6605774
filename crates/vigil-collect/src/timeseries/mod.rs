//! Time-series ingestion and bucketing.
//!
//! Raw samples are grouped into fixed-width buckets per
//! `(verification task, metric, host, bucket start)`. Each bucket holds an
//! append-only list of group values; later, analysis results annotate those
//! values with risk scores.
//!
//! ## Semantics
//!
//! - **Merge-append**: ingestion never overwrites a bucket, so repeated or
//!   concurrent calls are additive. Callers that must not double-count have to
//!   avoid resubmitting a batch.
//! - **Monotonic risk**: a risk score only ever rises to the maximum reported
//!   value, so applying summaries is commutative and idempotent.

pub mod ingest;
pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vigil_core::{TimeWindow, VerificationTaskId};

use crate::error::Result;

pub use ingest::{IngestSummary, TimeSeriesIngestor};

/// Classification of a metric within a metric pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricType {
    /// Request or call volume.
    Throughput,
    /// Error counts; stored with a percent of throughput.
    Error,
    /// Latency.
    ResponseTime,
    /// Infrastructure utilization.
    Infra,
    /// Anything else.
    Other,
}

/// The metrics collected for a verification task, with their types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricPack {
    metrics: HashMap<String, MetricType>,
}

impl MetricPack {
    /// Creates an empty pack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a metric definition.
    #[must_use]
    pub fn with_metric(mut self, metric_name: impl Into<String>, metric_type: MetricType) -> Self {
        self.metrics.insert(metric_name.into(), metric_type);
        self
    }

    /// Returns the type of a metric, if defined.
    #[must_use]
    pub fn metric_type(&self, metric_name: &str) -> Option<MetricType> {
        self.metrics.get(metric_name).copied()
    }

    /// Returns the throughput metric, if the pack defines one.
    ///
    /// When several are defined the lexicographically first name wins.
    #[must_use]
    pub fn throughput_metric(&self) -> Option<&str> {
        self.metrics
            .iter()
            .filter(|(_, t)| **t == MetricType::Throughput)
            .map(|(name, _)| name.as_str())
            .min()
    }
}

/// One raw sample produced by a collection task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesSample {
    /// Owning account.
    pub account_id: String,
    /// Verification task the sample belongs to.
    pub verification_task_id: VerificationTaskId,
    /// Reporting host; `None` for host-less aggregates.
    pub host: Option<String>,
    /// Display name of the metric.
    pub metric_name: String,
    /// Stable metric identifier.
    pub metric_identifier: String,
    /// Transaction or group the value belongs to.
    pub group_name: String,
    /// Sample time.
    pub timestamp: DateTime<Utc>,
    /// Sample value.
    pub value: f64,
}

/// One stored value inside a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesGroupValue {
    /// Transaction or group.
    pub group_name: String,
    /// Sample time.
    pub timestamp: DateTime<Utc>,
    /// Raw value.
    pub metric_value: f64,
    /// Value as a percent of throughput, for error metrics.
    pub percent_value: Option<f64>,
    /// Risk annotated by analysis.
    pub risk_score: Option<f64>,
}

/// Identity of a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    /// Verification task.
    pub verification_task_id: VerificationTaskId,
    /// Metric display name.
    pub metric_name: String,
    /// Host, or `None` for the aggregate.
    pub host: Option<String>,
    /// Bucket start (aligned to the bucket width).
    pub bucket_start_time: DateTime<Utc>,
}

/// One bucket of one metric for one host within one verification task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRecord {
    /// Bucket identity.
    pub key: BucketKey,
    /// Owning account.
    pub account_id: String,
    /// Stable metric identifier.
    pub metric_identifier: String,
    /// Appended values.
    pub values: Vec<TimeSeriesGroupValue>,
}

/// Risk reported by analysis for one metric group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRisk {
    /// Metric display name.
    pub metric_name: String,
    /// Transaction or group.
    pub group_name: String,
    /// Reported risk.
    pub risk: f64,
}

/// Analysis output for a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    /// The analyzed window.
    pub window: TimeWindow,
    /// Per metric-group risks.
    pub metric_risks: Vec<MetricRisk>,
}

/// Storage for time-series buckets.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Creates the bucket if absent, then appends `record.values` to it.
    async fn upsert_append(&self, record: TimeSeriesRecord) -> Result<()>;

    /// Gets the buckets of a verification task whose start lies in `[from, to)`,
    /// ordered by key.
    async fn find_range(
        &self,
        verification_task_id: &VerificationTaskId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TimeSeriesRecord>>;

    /// Raises risk scores to at least the reported values.
    ///
    /// Considers buckets starting in `[buckets_from, window.end)` and values
    /// timestamped inside `window`; a value matches a risk when both metric and
    /// group names match. Returns the number of values whose score changed.
    async fn apply_risk(
        &self,
        verification_task_id: &VerificationTaskId,
        buckets_from: DateTime<Utc>,
        window: TimeWindow,
        risks: &[MetricRisk],
    ) -> Result<usize>;
}
