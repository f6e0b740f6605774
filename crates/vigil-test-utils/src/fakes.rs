//! Recording fakes for the scheduler's outbound collaborators.
//!
//! Every fake records the calls it receives for later assertion and can be
//! told to fail, so tests can exercise error propagation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vigil_collect::error::{Error, Result};
use vigil_collect::external::{AnalysisOrchestrator, ProgressLog, ProgressTracker, WorkerRegistrar};
use vigil_collect::sidekick::{SideKickData, SideKickExecutor};
use vigil_collect::source::{DataSource, DataSourceRepository};
use vigil_core::{TimeWindow, VerificationTaskId};

/// Worker registrar that hands out `worker-<n>` ids.
#[derive(Debug, Clone, Default)]
pub struct RecordingWorkerRegistrar {
    next: Arc<AtomicU32>,
    registered: Arc<Mutex<Vec<(String, String)>>>,
    deregistered: Arc<Mutex<Vec<(String, String)>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingWorkerRegistrar {
    /// Creates a registrar with no recorded calls.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Returns `(data_source_id, worker_id)` for every registration.
    #[must_use]
    pub fn registered(&self) -> Vec<(String, String)> {
        self.registered.lock().expect("lock").clone()
    }

    /// Returns `(account_id, worker_id)` for every deregistration.
    #[must_use]
    pub fn deregistered(&self) -> Vec<(String, String)> {
        self.deregistered.lock().expect("lock").clone()
    }

    fn check_failure(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::external("worker registrar", "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerRegistrar for RecordingWorkerRegistrar {
    async fn register(&self, data_source: &DataSource) -> Result<String> {
        self.check_failure()?;
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let worker_id = format!("worker-{n}");
        self.registered
            .lock()
            .expect("lock")
            .push((data_source.id.clone(), worker_id.clone()));
        Ok(worker_id)
    }

    async fn deregister(&self, account_id: &str, worker_id: &str) -> Result<()> {
        self.check_failure()?;
        self.deregistered
            .lock()
            .expect("lock")
            .push((account_id.to_string(), worker_id.to_string()));
        Ok(())
    }
}

/// Orchestrator that records every analysis request.
#[derive(Debug, Clone, Default)]
pub struct RecordingAnalysisOrchestrator {
    queued: Arc<Mutex<Vec<(VerificationTaskId, TimeWindow)>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingAnalysisOrchestrator {
    /// Creates an orchestrator with no recorded calls.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Returns every queued `(verification_task_id, window)`.
    #[must_use]
    pub fn queued(&self) -> Vec<(VerificationTaskId, TimeWindow)> {
        self.queued.lock().expect("lock").clone()
    }
}

#[async_trait]
impl AnalysisOrchestrator for RecordingAnalysisOrchestrator {
    async fn queue_analysis(
        &self,
        verification_task_id: &VerificationTaskId,
        window: TimeWindow,
    ) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::external("analysis orchestrator", "injected failure"));
        }
        self.queued
            .lock()
            .expect("lock")
            .push((*verification_task_id, window));
        Ok(())
    }
}

/// Progress tracker that records every entry.
#[derive(Debug, Clone, Default)]
pub struct RecordingProgressTracker {
    entries: Arc<Mutex<Vec<ProgressLog>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingProgressTracker {
    /// Creates a tracker with no recorded entries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Returns every recorded entry in order.
    #[must_use]
    pub fn entries(&self) -> Vec<ProgressLog> {
        self.entries.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ProgressTracker for RecordingProgressTracker {
    async fn log_progress(&self, entry: ProgressLog) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::external("progress tracker", "injected failure"));
        }
        self.entries.lock().expect("lock").push(entry);
        Ok(())
    }
}

/// In-memory data source repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataSources {
    sources: Arc<Mutex<HashMap<(String, String), DataSource>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryDataSources {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a data source.
    pub fn put(&self, data_source: DataSource) {
        self.sources.lock().expect("lock").insert(
            (data_source.account_id.clone(), data_source.id.clone()),
            data_source,
        );
    }

    /// Makes every subsequent repository call fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check_failure(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::storage("injected data source failure"));
        }
        Ok(())
    }

    /// Enables or disables a data source.
    pub fn set_enabled(&self, account_id: &str, data_source_id: &str, enabled: bool) {
        if let Some(ds) = self
            .sources
            .lock()
            .expect("lock")
            .get_mut(&(account_id.to_string(), data_source_id.to_string()))
        {
            ds.enabled = enabled;
        }
    }

    /// Removes a data source.
    pub fn remove(&self, account_id: &str, data_source_id: &str) {
        self.sources
            .lock()
            .expect("lock")
            .remove(&(account_id.to_string(), data_source_id.to_string()));
    }

    /// Returns a snapshot of a data source.
    #[must_use]
    pub fn snapshot(&self, account_id: &str, data_source_id: &str) -> Option<DataSource> {
        self.sources
            .lock()
            .expect("lock")
            .get(&(account_id.to_string(), data_source_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl DataSourceRepository for InMemoryDataSources {
    async fn get(&self, account_id: &str, data_source_id: &str) -> Result<Option<DataSource>> {
        self.check_failure()?;
        Ok(self.snapshot(account_id, data_source_id))
    }

    async fn set_worker_id(
        &self,
        account_id: &str,
        data_source_id: &str,
        worker_id: &str,
    ) -> Result<()> {
        self.check_failure()?;
        let mut sources = self.sources.lock().expect("lock");
        let ds = sources
            .get_mut(&(account_id.to_string(), data_source_id.to_string()))
            .ok_or_else(|| Error::not_found("data source", data_source_id))?;
        ds.data_collection_worker_id = Some(worker_id.to_string());
        Ok(())
    }
}

/// Sidekick executor that records payloads and fails on demand.
#[derive(Debug, Clone, Default)]
pub struct RecordingExecutor {
    executed: Arc<Mutex<Vec<SideKickData>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingExecutor {
    /// Creates an executor with no recorded calls.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Returns every payload executed, including failed ones.
    #[must_use]
    pub fn executed(&self) -> Vec<SideKickData> {
        self.executed.lock().expect("lock").clone()
    }
}

#[async_trait]
impl SideKickExecutor for RecordingExecutor {
    async fn execute(&self, data: &SideKickData, _now: DateTime<Utc>) -> anyhow::Result<()> {
        self.executed.lock().expect("lock").push(data.clone());
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("injected {} failure", data.sidekick_type());
        }
        Ok(())
    }
}
