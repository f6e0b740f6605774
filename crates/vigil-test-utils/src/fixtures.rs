//! Pre-built test fixtures for common test scenarios.
//!
//! Provides a fully wired [`TestContext`] over in-memory stores and factory
//! functions for data sources, deployment chains, and samples.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};

use vigil_collect::config::CollectionConfig;
use vigil_collect::host::memory::InMemoryHostRecordStore;
use vigil_collect::scheduler::{Collaborators, DataCollectionScheduler};
use vigil_collect::sidekick::memory::InMemorySideKickStore;
use vigil_collect::sidekick::{ExecutorRegistry, SideKickQueue};
use vigil_collect::source::DataSource;
use vigil_collect::store::memory::InMemoryTaskStore;
use vigil_collect::task::{DataCollectionTask, DataCollectionTaskType};
use vigil_collect::timeseries::memory::InMemoryTimeSeriesStore;
use vigil_collect::timeseries::{TimeSeriesIngestor, TimeSeriesSample};
use vigil_collect::verification::VerificationTaskMapper;
use vigil_collect::verification::memory::InMemoryVerificationTaskStore;
use vigil_core::{TimeWindow, VerificationTaskId};

use crate::fakes::{
    InMemoryDataSources, RecordingAnalysisOrchestrator, RecordingProgressTracker,
    RecordingWorkerRegistrar,
};

/// Account used by every fixture.
pub const ACCOUNT_ID: &str = "acme";

/// A fixed reference instant: 2024-03-01T10:00:00Z.
#[must_use]
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// A manually advanced clock.
#[derive(Debug, Clone)]
pub struct TestClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    /// Creates a clock at `start`.
    #[must_use]
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Returns the current instant.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("lock")
    }

    /// Moves the clock forward and returns the new instant.
    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut now = self.now.lock().expect("lock");
        *now += by;
        *now
    }
}

/// A scheduler, ingestor, and sidekick queue wired over in-memory stores and
/// recording collaborators.
pub struct TestContext {
    /// Task store shared with the scheduler.
    pub tasks: Arc<InMemoryTaskStore>,
    /// Verification task mapper shared with the scheduler.
    pub mapper: VerificationTaskMapper,
    /// Data source repository.
    pub data_sources: InMemoryDataSources,
    /// Worker registrar.
    pub registrar: RecordingWorkerRegistrar,
    /// Analysis orchestrator.
    pub orchestrator: RecordingAnalysisOrchestrator,
    /// Progress tracker.
    pub progress: RecordingProgressTracker,
    /// The scheduler under test.
    pub scheduler: DataCollectionScheduler,
    /// Time-series store shared with the ingestor.
    pub series: Arc<InMemoryTimeSeriesStore>,
    /// Host record store shared with the ingestor.
    pub hosts: Arc<InMemoryHostRecordStore>,
    /// The ingestor under test.
    pub ingestor: TimeSeriesIngestor,
    /// Sidekick store.
    pub sidekicks: Arc<InMemorySideKickStore>,
    /// Clock starting at [`t0`].
    pub clock: TestClock,
}

impl TestContext {
    /// Creates a context with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CollectionConfig::default())
    }

    /// Creates a context with `config`.
    #[must_use]
    pub fn with_config(config: CollectionConfig) -> Self {
        let tasks = Arc::new(InMemoryTaskStore::new());
        let mapper = VerificationTaskMapper::new(Arc::new(InMemoryVerificationTaskStore::new()));
        let data_sources = InMemoryDataSources::new();
        let registrar = RecordingWorkerRegistrar::new();
        let orchestrator = RecordingAnalysisOrchestrator::new();
        let progress = RecordingProgressTracker::new();

        let collaborators = Collaborators {
            data_sources: Arc::new(data_sources.clone()),
            registrar: Arc::new(registrar.clone()),
            orchestrator: Arc::new(orchestrator.clone()),
            progress: Arc::new(progress.clone()),
        };
        let bucket_width = config.bucket_width();
        let scheduler =
            DataCollectionScheduler::new(tasks.clone(), mapper.clone(), collaborators, config);

        let series = Arc::new(InMemoryTimeSeriesStore::new());
        let hosts = Arc::new(InMemoryHostRecordStore::new());
        let ingestor = TimeSeriesIngestor::new(series.clone(), hosts.clone(), bucket_width)
            .expect("valid bucket width");

        Self {
            tasks,
            mapper,
            data_sources,
            registrar,
            orchestrator,
            progress,
            scheduler,
            series,
            hosts,
            ingestor,
            sidekicks: Arc::new(InMemorySideKickStore::new()),
            clock: TestClock::at(t0()),
        }
    }

    /// Builds a sidekick queue over this context's store.
    #[must_use]
    pub fn sidekick_queue(&self, executors: ExecutorRegistry) -> SideKickQueue {
        SideKickQueue::new(self.sidekicks.clone(), executors)
            .with_retry_policy(self.scheduler.config().sidekick_retry_policy())
    }

    /// Adds an enabled data source whose first window is `initial_window`,
    /// along with its live-monitoring verification task.
    pub async fn add_data_source(
        &self,
        data_source_id: &str,
        initial_window: TimeWindow,
    ) -> VerificationTaskId {
        self.data_sources
            .put(data_source(data_source_id, initial_window));
        self.mapper
            .create_live_monitoring_task(ACCOUNT_ID, data_source_id)
            .await
            .expect("create verification task")
    }

    /// Builds an unsaved deployment chain, one task per window, each for its
    /// own verification task under `job_instance_id`.
    ///
    /// Returns the tasks in chain order.
    pub async fn deployment_chain(
        &self,
        job_instance_id: &str,
        worker_id: &str,
        windows: &[TimeWindow],
    ) -> Vec<DataCollectionTask> {
        let mut tasks = Vec::with_capacity(windows.len());
        for (index, window) in windows.iter().enumerate() {
            let verification_task_id = self
                .mapper
                .create_deployment_task(ACCOUNT_ID, &format!("cv-{index}"), job_instance_id)
                .await
                .expect("create verification task");
            tasks.push(DataCollectionTask::new(
                ACCOUNT_ID,
                verification_task_id,
                worker_id,
                DataCollectionTaskType::Deployment,
                *window,
            ));
        }
        tasks
    }

    /// Builds an unsaved deployment chain whose tasks share one verification task.
    pub async fn shared_deployment_chain(
        &self,
        job_instance_id: &str,
        worker_id: &str,
        windows: &[TimeWindow],
    ) -> Vec<DataCollectionTask> {
        let verification_task_id = self
            .mapper
            .create_deployment_task(ACCOUNT_ID, "cv-shared", job_instance_id)
            .await
            .expect("create verification task");
        windows
            .iter()
            .map(|window| {
                DataCollectionTask::new(
                    ACCOUNT_ID,
                    verification_task_id,
                    worker_id,
                    DataCollectionTaskType::Deployment,
                    *window,
                )
            })
            .collect()
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// An enabled data source with an empty collection settings.
#[must_use]
pub fn data_source(data_source_id: &str, initial_window: TimeWindow) -> DataSource {
    DataSource {
        id: data_source_id.to_string(),
        account_id: ACCOUNT_ID.to_string(),
        connector_identifier: "account.prometheus".to_string(),
        enabled: true,
        initial_window,
        data_collection_info: serde_json::json!({ "query": "rate(http_requests_total[1m])" }),
        data_collection_worker_id: None,
    }
}

/// `count` consecutive windows of `length` starting at `start`.
#[must_use]
pub fn consecutive_windows(start: DateTime<Utc>, length: Duration, count: usize) -> Vec<TimeWindow> {
    (0..count)
        .map(|i| {
            let offset = length * i32::try_from(i).expect("small count");
            TimeWindow::starting_at(start + offset, length)
        })
        .collect()
}

/// A sample for `verification_task_id`.
#[must_use]
pub fn sample(
    verification_task_id: VerificationTaskId,
    host: Option<&str>,
    metric_name: &str,
    group_name: &str,
    timestamp: DateTime<Utc>,
    value: f64,
) -> TimeSeriesSample {
    TimeSeriesSample {
        account_id: ACCOUNT_ID.to_string(),
        verification_task_id,
        host: host.map(ToString::to_string),
        metric_name: metric_name.to_string(),
        metric_identifier: format!("{metric_name}_id"),
        group_name: group_name.to_string(),
        timestamp,
        value,
    }
}
