//! Bucketing ingestor.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::Instrument;

use vigil_core::observability::ingestion_span;
use vigil_core::{HostRecordId, TimeWindow, VerificationTaskId, floor_to_bucket};

use super::{
    BucketKey, MetricPack, MetricType, RiskSummary, TimeSeriesGroupValue, TimeSeriesRecord,
    TimeSeriesSample, TimeSeriesStore,
};
use crate::error::{Error, Result};
use crate::host::{HostRecord, HostRecordStore};
use crate::metrics::CollectMetrics;

/// Counts from one ingestion call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Samples accepted.
    pub samples: usize,
    /// Buckets upserted.
    pub buckets: usize,
    /// Host records written.
    pub host_records: usize,
}

/// Lookup key for a throughput value co-occurring with an error sample.
type ThroughputKey<'a> = (
    VerificationTaskId,
    Option<&'a str>,
    &'a str,
    DateTime<Utc>,
);

/// Converts raw samples into buckets and annotates buckets with risk.
#[derive(Clone)]
pub struct TimeSeriesIngestor {
    store: Arc<dyn TimeSeriesStore>,
    hosts: Arc<dyn HostRecordStore>,
    bucket_width: Duration,
    metrics: CollectMetrics,
}

impl std::fmt::Debug for TimeSeriesIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSeriesIngestor")
            .field("bucket_width", &self.bucket_width)
            .finish_non_exhaustive()
    }
}

impl TimeSeriesIngestor {
    /// Creates an ingestor with the given bucket width.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the width is not positive.
    pub fn new(
        store: Arc<dyn TimeSeriesStore>,
        hosts: Arc<dyn HostRecordStore>,
        bucket_width: Duration,
    ) -> Result<Self> {
        if bucket_width <= Duration::zero() {
            return Err(Error::configuration("bucket width must be positive"));
        }
        Ok(Self {
            store,
            hosts,
            bucket_width,
            metrics: CollectMetrics::new(),
        })
    }

    /// Returns the bucket width.
    #[must_use]
    pub const fn bucket_width(&self) -> Duration {
        self.bucket_width
    }

    /// Buckets and stores a batch of samples.
    ///
    /// Error-type metrics get `percent_value = value * 100 / throughput`, using
    /// the throughput sample with the same host, group, and timestamp (falling
    /// back to the host-less aggregate). When the pack defines no throughput
    /// metric the raw value is used as the percent; when it defines one but no
    /// non-zero value co-occurs, no percent is stored.
    ///
    /// # Errors
    ///
    /// Propagates storage failures. Buckets written before a failure stay
    /// written.
    #[tracing::instrument(skip(self, samples, metric_pack), fields(sample_count = samples.len()))]
    pub async fn ingest(
        &self,
        samples: &[TimeSeriesSample],
        metric_pack: &MetricPack,
    ) -> Result<IngestSummary> {
        if samples.is_empty() {
            return Ok(IngestSummary::default());
        }

        let throughput_metric = metric_pack.throughput_metric();
        let throughput: HashMap<ThroughputKey<'_>, f64> = throughput_metric
            .map(|name| {
                samples
                    .iter()
                    .filter(|s| s.metric_name == name)
                    .map(|s| {
                        (
                            (
                                s.verification_task_id,
                                s.host.as_deref(),
                                s.group_name.as_str(),
                                s.timestamp,
                            ),
                            s.value,
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut buckets: BTreeMap<BucketKey, TimeSeriesRecord> = BTreeMap::new();
        for sample in samples {
            let percent_value = match metric_pack.metric_type(&sample.metric_name) {
                Some(MetricType::Error) => {
                    percent_of_throughput(sample, throughput_metric.is_some(), &throughput)
                }
                _ => None,
            };
            let key = BucketKey {
                verification_task_id: sample.verification_task_id,
                metric_name: sample.metric_name.clone(),
                host: sample.host.clone(),
                bucket_start_time: floor_to_bucket(sample.timestamp, self.bucket_width),
            };
            buckets
                .entry(key.clone())
                .or_insert_with(|| TimeSeriesRecord {
                    key,
                    account_id: sample.account_id.clone(),
                    metric_identifier: sample.metric_identifier.clone(),
                    values: Vec::new(),
                })
                .values
                .push(TimeSeriesGroupValue {
                    group_name: sample.group_name.clone(),
                    timestamp: sample.timestamp,
                    metric_value: sample.value,
                    percent_value,
                    risk_score: None,
                });
        }

        let bucket_count = buckets.len();
        for record in buckets.into_values() {
            self.store.upsert_append(record).await?;
        }

        let host_records = self.save_host_population(samples).await?;

        self.metrics.record_samples_ingested(samples.len());
        self.metrics.record_buckets_upserted(bucket_count);
        tracing::debug!(buckets = bucket_count, host_records, "ingested samples");
        Ok(IngestSummary {
            samples: samples.len(),
            buckets: bucket_count,
            host_records,
        })
    }

    async fn save_host_population(&self, samples: &[TimeSeriesSample]) -> Result<usize> {
        struct Population<'a> {
            account_id: &'a str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            hosts: BTreeSet<String>,
        }

        let mut populations: BTreeMap<VerificationTaskId, Population<'_>> = BTreeMap::new();
        for sample in samples {
            let population = populations
                .entry(sample.verification_task_id)
                .or_insert_with(|| Population {
                    account_id: sample.account_id.as_str(),
                    start: sample.timestamp,
                    end: sample.timestamp,
                    hosts: BTreeSet::new(),
                });
            population.start = population.start.min(sample.timestamp);
            population.end = population.end.max(sample.timestamp);
            if let Some(host) = &sample.host {
                population.hosts.insert(host.clone());
            }
        }

        let mut saved = 0;
        for (verification_task_id, population) in populations {
            if population.hosts.is_empty() {
                continue;
            }
            let span = ingestion_span(
                "save_hosts",
                population.account_id,
                &verification_task_id.to_string(),
            );
            self.hosts
                .save(HostRecord {
                    id: HostRecordId::generate(),
                    account_id: population.account_id.to_string(),
                    verification_task_id,
                    start_time: population.start,
                    end_time: population.end,
                    hosts: population.hosts,
                })
                .instrument(span)
                .await?;
            saved += 1;
        }
        Ok(saved)
    }

    /// Annotates stored buckets with the risks of an analysis summary.
    ///
    /// Returns the number of group values whose score rose.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    #[tracing::instrument(
        skip(self, summary),
        fields(verification_task_id = %verification_task_id, risks = summary.metric_risks.len())
    )]
    pub async fn apply_risk_scores(
        &self,
        verification_task_id: &VerificationTaskId,
        summary: &RiskSummary,
    ) -> Result<usize> {
        if summary.metric_risks.is_empty() {
            return Ok(0);
        }
        let buckets_from = floor_to_bucket(summary.window.start, self.bucket_width);
        let changed = self
            .store
            .apply_risk(
                verification_task_id,
                buckets_from,
                summary.window,
                &summary.metric_risks,
            )
            .await?;
        self.metrics.record_risk_annotations(changed);
        Ok(changed)
    }

    /// Gets every bucket overlapping `window`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn records_in_window(
        &self,
        verification_task_id: &VerificationTaskId,
        window: TimeWindow,
    ) -> Result<Vec<TimeSeriesRecord>> {
        self.store
            .find_range(
                verification_task_id,
                floor_to_bucket(window.start, self.bucket_width),
                window.end,
            )
            .await
    }

    /// Gets the union of hosts that reported during `window`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn hosts_in_window(
        &self,
        verification_task_id: &VerificationTaskId,
        window: TimeWindow,
    ) -> Result<BTreeSet<String>> {
        let records = self
            .hosts
            .find_overlapping(verification_task_id, window)
            .await?;
        Ok(records.into_iter().flat_map(|r| r.hosts).collect())
    }
}

fn percent_of_throughput(
    sample: &TimeSeriesSample,
    throughput_defined: bool,
    throughput: &HashMap<ThroughputKey<'_>, f64>,
) -> Option<f64> {
    if !throughput_defined {
        return Some(sample.value);
    }
    let group = sample.group_name.as_str();
    let exact = (
        sample.verification_task_id,
        sample.host.as_deref(),
        group,
        sample.timestamp,
    );
    let aggregate = (sample.verification_task_id, None, group, sample.timestamp);
    throughput
        .get(&exact)
        .or_else(|| throughput.get(&aggregate))
        .copied()
        .filter(|t| *t != 0.0)
        .map(|t| sample.value * 100.0 / t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::InMemoryHostRecordStore;
    use crate::timeseries::MetricRisk;
    use crate::timeseries::memory::InMemoryTimeSeriesStore;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryTimeSeriesStore>,
        ingestor: TimeSeriesIngestor,
        vt: VerificationTaskId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryTimeSeriesStore::new());
        let ingestor = TimeSeriesIngestor::new(
            store.clone(),
            Arc::new(InMemoryHostRecordStore::new()),
            Duration::minutes(5),
        )
        .unwrap();
        Fixture {
            store,
            ingestor,
            vt: VerificationTaskId::generate(),
        }
    }

    fn sample(
        vt: VerificationTaskId,
        host: Option<&str>,
        metric: &str,
        group: &str,
        ts: DateTime<Utc>,
        value: f64,
    ) -> TimeSeriesSample {
        TimeSeriesSample {
            account_id: "acme".into(),
            verification_task_id: vt,
            host: host.map(ToString::to_string),
            metric_name: metric.into(),
            metric_identifier: format!("{metric}-id"),
            group_name: group.into(),
            timestamp: ts,
            value,
        }
    }

    fn pack() -> MetricPack {
        MetricPack::new()
            .with_metric("calls", MetricType::Throughput)
            .with_metric("errors", MetricType::Error)
            .with_metric("latency", MetricType::ResponseTime)
    }

    fn group_values(records: &[TimeSeriesRecord], metric: &str) -> Vec<TimeSeriesGroupValue> {
        records
            .iter()
            .filter(|r| r.key.metric_name == metric)
            .flat_map(|r| r.values.clone())
            .collect()
    }

    #[test]
    fn rejects_non_positive_width() {
        let result = TimeSeriesIngestor::new(
            Arc::new(InMemoryTimeSeriesStore::new()),
            Arc::new(InMemoryHostRecordStore::new()),
            Duration::zero(),
        );
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[tokio::test]
    async fn groups_samples_by_metric_host_and_bucket() -> Result<()> {
        let f = fixture();
        let samples = vec![
            sample(f.vt, Some("h1"), "latency", "login", t0(), 120.0),
            sample(f.vt, Some("h1"), "latency", "login", t0() + Duration::minutes(1), 130.0),
            sample(f.vt, Some("h2"), "latency", "login", t0(), 90.0),
            sample(f.vt, Some("h1"), "latency", "login", t0() + Duration::minutes(6), 110.0),
        ];
        let summary = f.ingestor.ingest(&samples, &pack()).await?;
        assert_eq!(summary.samples, 4);
        assert_eq!(summary.buckets, 3);
        assert_eq!(f.store.bucket_count()?, 3);

        let records = f
            .ingestor
            .records_in_window(&f.vt, TimeWindow::starting_at(t0(), Duration::minutes(5)))
            .await?;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.key.bucket_start_time == t0()));
        Ok(())
    }

    #[tokio::test]
    async fn error_percent_uses_co_occurring_throughput() -> Result<()> {
        let f = fixture();
        let samples = vec![
            sample(f.vt, Some("h1"), "calls", "login", t0(), 200.0),
            sample(f.vt, Some("h1"), "errors", "login", t0(), 10.0),
        ];
        f.ingestor.ingest(&samples, &pack()).await?;

        let records = f
            .ingestor
            .records_in_window(&f.vt, TimeWindow::starting_at(t0(), Duration::minutes(5)))
            .await?;
        let errors = group_values(&records, "errors");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].percent_value, Some(5.0));
        let calls = group_values(&records, "calls");
        assert_eq!(calls[0].percent_value, None);
        Ok(())
    }

    #[tokio::test]
    async fn error_percent_falls_back_to_aggregate_throughput() -> Result<()> {
        let f = fixture();
        let samples = vec![
            sample(f.vt, None, "calls", "login", t0(), 50.0),
            sample(f.vt, Some("h1"), "errors", "login", t0(), 10.0),
        ];
        f.ingestor.ingest(&samples, &pack()).await?;
        let records = f
            .ingestor
            .records_in_window(&f.vt, TimeWindow::starting_at(t0(), Duration::minutes(5)))
            .await?;
        assert_eq!(group_values(&records, "errors")[0].percent_value, Some(20.0));
        Ok(())
    }

    #[tokio::test]
    async fn error_percent_is_raw_value_without_throughput_metric() -> Result<()> {
        let f = fixture();
        let pack = MetricPack::new().with_metric("errors", MetricType::Error);
        let samples = vec![sample(f.vt, Some("h1"), "errors", "login", t0(), 7.0)];
        f.ingestor.ingest(&samples, &pack).await?;
        let records = f
            .ingestor
            .records_in_window(&f.vt, TimeWindow::starting_at(t0(), Duration::minutes(5)))
            .await?;
        assert_eq!(group_values(&records, "errors")[0].percent_value, Some(7.0));
        Ok(())
    }

    #[tokio::test]
    async fn error_percent_absent_when_throughput_missing_or_zero() -> Result<()> {
        let f = fixture();
        let samples = vec![
            sample(f.vt, Some("h1"), "calls", "login", t0(), 0.0),
            sample(f.vt, Some("h1"), "errors", "login", t0(), 3.0),
            sample(f.vt, Some("h1"), "errors", "checkout", t0(), 4.0),
        ];
        f.ingestor.ingest(&samples, &pack()).await?;
        let records = f
            .ingestor
            .records_in_window(&f.vt, TimeWindow::starting_at(t0(), Duration::minutes(5)))
            .await?;
        assert!(
            group_values(&records, "errors")
                .iter()
                .all(|v| v.percent_value.is_none())
        );
        Ok(())
    }

    #[tokio::test]
    async fn percent_can_exceed_one_hundred() -> Result<()> {
        let f = fixture();
        let samples = vec![
            sample(f.vt, None, "calls", "login", t0(), 4.0),
            sample(f.vt, None, "errors", "login", t0(), 10.0),
        ];
        f.ingestor.ingest(&samples, &pack()).await?;
        let records = f
            .ingestor
            .records_in_window(&f.vt, TimeWindow::starting_at(t0(), Duration::minutes(5)))
            .await?;
        assert_eq!(group_values(&records, "errors")[0].percent_value, Some(250.0));
        Ok(())
    }

    #[tokio::test]
    async fn repeated_ingestion_is_additive() -> Result<()> {
        let f = fixture();
        let samples = vec![
            sample(f.vt, Some("h1"), "latency", "login", t0(), 120.0),
            sample(f.vt, Some("h1"), "latency", "login", t0() + Duration::minutes(1), 130.0),
        ];
        f.ingestor.ingest(&samples, &pack()).await?;
        f.ingestor.ingest(&samples, &pack()).await?;

        let records = f
            .ingestor
            .records_in_window(&f.vt, TimeWindow::starting_at(t0(), Duration::minutes(5)))
            .await?;
        assert_eq!(records.len(), 1);
        let values = &records[0].values;
        assert_eq!(values.len(), 4);
        assert_eq!(values.iter().filter(|v| v.timestamp == t0()).count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn risk_scores_only_rise() -> Result<()> {
        let f = fixture();
        let samples = vec![sample(f.vt, Some("h1"), "latency", "login", t0(), 120.0)];
        f.ingestor.ingest(&samples, &pack()).await?;

        let window = TimeWindow::starting_at(t0(), Duration::minutes(5));
        let summary = |risk| RiskSummary {
            window,
            metric_risks: vec![MetricRisk {
                metric_name: "latency".into(),
                group_name: "login".into(),
                risk,
            }],
        };
        assert_eq!(f.ingestor.apply_risk_scores(&f.vt, &summary(40.0)).await?, 1);
        assert_eq!(f.ingestor.apply_risk_scores(&f.vt, &summary(30.0)).await?, 0);

        let records = f.ingestor.records_in_window(&f.vt, window).await?;
        assert_eq!(records[0].values[0].risk_score, Some(40.0));
        Ok(())
    }

    #[tokio::test]
    async fn risk_ignores_other_groups_and_windows() -> Result<()> {
        let f = fixture();
        let samples = vec![
            sample(f.vt, None, "latency", "login", t0(), 1.0),
            sample(f.vt, None, "latency", "checkout", t0(), 1.0),
            sample(f.vt, None, "latency", "login", t0() + Duration::minutes(10), 1.0),
        ];
        f.ingestor.ingest(&samples, &pack()).await?;

        let window = TimeWindow::starting_at(t0(), Duration::minutes(5));
        let summary = RiskSummary {
            window,
            metric_risks: vec![MetricRisk {
                metric_name: "latency".into(),
                group_name: "login".into(),
                risk: 2.0,
            }],
        };
        assert_eq!(f.ingestor.apply_risk_scores(&f.vt, &summary).await?, 1);

        let all = f
            .ingestor
            .records_in_window(&f.vt, TimeWindow::starting_at(t0(), Duration::minutes(15)))
            .await?;
        let scored: Vec<_> = all
            .iter()
            .flat_map(|r| r.values.iter())
            .filter(|v| v.risk_score.is_some())
            .collect();
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].group_name, "login");
        assert_eq!(scored[0].timestamp, t0());
        Ok(())
    }

    #[tokio::test]
    async fn records_host_population() -> Result<()> {
        let f = fixture();
        let samples = vec![
            sample(f.vt, Some("h1"), "latency", "login", t0(), 1.0),
            sample(f.vt, Some("h2"), "latency", "login", t0() + Duration::minutes(2), 1.0),
            sample(f.vt, None, "latency", "login", t0(), 1.0),
        ];
        let summary = f.ingestor.ingest(&samples, &pack()).await?;
        assert_eq!(summary.host_records, 1);

        let hosts = f
            .ingestor
            .hosts_in_window(&f.vt, TimeWindow::starting_at(t0(), Duration::minutes(5)))
            .await?;
        assert_eq!(hosts, BTreeSet::from(["h1".to_string(), "h2".to_string()]));

        let later = f
            .ingestor
            .hosts_in_window(
                &f.vt,
                TimeWindow::starting_at(t0() + Duration::minutes(10), Duration::minutes(5)),
            )
            .await?;
        assert!(later.is_empty());
        Ok(())
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn scores_after(order: &[f64]) -> Option<f64> {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            rt.block_on(async {
                let f = fixture();
                let samples = vec![sample(f.vt, None, "latency", "login", t0(), 1.0)];
                f.ingestor.ingest(&samples, &pack()).await.unwrap();
                let window = TimeWindow::starting_at(t0(), Duration::minutes(5));
                for risk in order {
                    let summary = RiskSummary {
                        window,
                        metric_risks: vec![MetricRisk {
                            metric_name: "latency".into(),
                            group_name: "login".into(),
                            risk: *risk,
                        }],
                    };
                    f.ingestor.apply_risk_scores(&f.vt, &summary).await.unwrap();
                }
                let records = f.ingestor.records_in_window(&f.vt, window).await.unwrap();
                records[0].values[0].risk_score
            })
        }

        proptest! {
            #[test]
            fn risk_application_is_order_independent(
                risks in proptest::collection::vec(0.0f64..100.0, 1..6),
            ) {
                let mut reversed = risks.clone();
                reversed.reverse();
                let expected = risks.iter().copied().fold(f64::MIN, f64::max);
                prop_assert_eq!(scores_after(&risks), Some(expected));
                prop_assert_eq!(scores_after(&reversed), Some(expected));
            }
        }
    }
}
