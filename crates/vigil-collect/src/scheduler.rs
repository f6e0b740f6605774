//! Data collection task scheduler.
//!
//! The scheduler owns the task lifecycle:
//!
//! - **Enqueue**: the first ServiceGuard task for a data source, or a
//!   sequential Deployment chain
//! - **Claim**: workers poll with [`DataCollectionScheduler::claim_next`]; the
//!   store's atomic claim guarantees one winner per task
//! - **Report**: success re-schedules (ServiceGuard) or advances the chain
//!   (Deployment); failure retries with backoff or fails terminally,
//!   cascading down the chain
//!
//! ## Follow-up work
//!
//! The terminal transition of a report sets `follow_up_pending` on the task
//! in the same compare-and-swap. The marker is cleared only after the
//! successor task, chain advance, progress log, and analysis request have all
//! gone through. A repeated report for a task still carrying the marker runs
//! the follow-ups again, and [`DataCollectionScheduler::resume_pending_follow_ups`]
//! picks up tasks whose worker never reported again. Every follow-up step is
//! safe to repeat; progress logs and analysis requests are at-least-once.
//!
//! ## Retry policy
//!
//! ServiceGuard tasks retry while their window still starts inside the
//! catch-up cutoff; past it they expire and the next periodic task is created
//! at the cutoff instead. Deployment tasks retry while `retry_count` is below
//! the configured maximum.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::Instrument;

use vigil_core::observability::collection_span;
use vigil_core::time::floor_to_minute;
use vigil_core::{DataCollectionTaskId, TimeWindow, VerificationTaskId};

use crate::config::CollectionConfig;
use crate::error::{Error, Result};
use crate::external::{AnalysisOrchestrator, ProgressLog, ProgressTracker, WorkerRegistrar};
use crate::metrics::CollectMetrics;
use crate::source::{DataSource, DataSourceRepository};
use crate::store::{CasResult, TaskStore};
use crate::task::{
    ClaimFilter, DataCollectionTask, DataCollectionTaskType, ReportedStatus, TaskResult,
    TaskStatus, TaskUpdate, TransitionReason,
};
use crate::verification::VerificationTaskMapper;

/// Progress message for a successful deployment window.
pub const PROGRESS_SUCCESS_LOG: &str = "Data collection task successful";

/// Prefix of the progress message for a failed deployment window.
pub const PROGRESS_FAILURE_LOG_PREFIX: &str = "Data collection failed with exception: ";

/// Outbound services the scheduler depends on.
#[derive(Clone)]
pub struct Collaborators {
    /// Data source lookup and worker bookkeeping.
    pub data_sources: Arc<dyn DataSourceRepository>,
    /// Remote worker registration.
    pub registrar: Arc<dyn WorkerRegistrar>,
    /// Analysis queueing for collected windows.
    pub orchestrator: Arc<dyn AnalysisOrchestrator>,
    /// Deployment job progress.
    pub progress: Arc<dyn ProgressTracker>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Schedules, hands out, and settles data collection tasks.
#[derive(Clone)]
pub struct DataCollectionScheduler {
    store: Arc<dyn TaskStore>,
    mapper: VerificationTaskMapper,
    collaborators: Collaborators,
    config: CollectionConfig,
    metrics: CollectMetrics,
}

impl std::fmt::Debug for DataCollectionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCollectionScheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DataCollectionScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(
        store: Arc<dyn TaskStore>,
        mapper: VerificationTaskMapper,
        collaborators: Collaborators,
        config: CollectionConfig,
    ) -> Self {
        Self {
            store,
            mapper,
            collaborators,
            config,
            metrics: CollectMetrics::new(),
        }
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &CollectionConfig {
        &self.config
    }

    // --- Creation ---

    /// Enqueues the first ServiceGuard task for a data source.
    ///
    /// # Errors
    ///
    /// See [`DataCollectionScheduler::enqueue_first_task_at`].
    pub async fn enqueue_first_task(
        &self,
        account_id: &str,
        data_source_id: &str,
    ) -> Result<DataCollectionTask> {
        self.enqueue_first_task_at(account_id, data_source_id, Utc::now())
            .await
    }

    /// Enqueues the first ServiceGuard task for a data source at `now`.
    ///
    /// Registers a remote worker, persists a QUEUED task for the source's
    /// initial window (claimable immediately), then records the worker id on
    /// the data source. If the source's verification task already has tasks,
    /// the earliest one is returned and nothing is registered.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the data source does not exist
    /// - [`Error::PreconditionFailed`] if it has no verification task
    /// - Registrar and storage failures propagate unchanged
    #[tracing::instrument(skip(self), fields(account_id = %account_id, data_source_id = %data_source_id))]
    pub async fn enqueue_first_task_at(
        &self,
        account_id: &str,
        data_source_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DataCollectionTask> {
        let data_source = self
            .collaborators
            .data_sources
            .get(account_id, data_source_id)
            .await?
            .ok_or_else(|| Error::not_found("data source", data_source_id))?;
        let verification_task_id = self
            .mapper
            .live_monitoring_task_id(account_id, data_source_id)
            .await?
            .ok_or_else(|| {
                Error::precondition(format!(
                    "data source {data_source_id} has no verification task"
                ))
            })?;

        let existing = self
            .store
            .find_by_verification_task(&verification_task_id, &[])
            .await?;
        if let Some(first) = existing.into_iter().min_by_key(|t| (t.created_at, t.id)) {
            if data_source.data_collection_worker_id.as_deref()
                != Some(first.data_collection_worker_id.as_str())
            {
                self.collaborators
                    .data_sources
                    .set_worker_id(account_id, data_source_id, &first.data_collection_worker_id)
                    .await?;
            }
            tracing::info!(task_id = %first.id, "first collection task already enqueued");
            return Ok(first);
        }

        let worker_id = self.collaborators.registrar.register(&data_source).await?;

        let mut task = DataCollectionTask::new(
            account_id,
            verification_task_id,
            worker_id.as_str(),
            DataCollectionTaskType::ServiceGuard,
            data_source.initial_window,
        )
        .with_data_collection_info(data_source.data_collection_info.clone())
        .with_valid_after(now);
        task.stamp_created_at(now, self.config.task_retention());
        self.store.insert(&task).await?;

        self.collaborators
            .data_sources
            .set_worker_id(account_id, data_source_id, &worker_id)
            .await?;

        self.metrics
            .record_tasks_created(DataCollectionTaskType::ServiceGuard.as_label(), 1);
        tracing::info!(task_id = %task.id, worker_id = %worker_id, "enqueued first collection task");
        Ok(task)
    }

    /// Persists tasks as a sequential chain.
    ///
    /// # Errors
    ///
    /// See [`DataCollectionScheduler::create_seq_tasks_at`].
    pub async fn create_seq_tasks(
        &self,
        tasks: Vec<DataCollectionTask>,
    ) -> Result<Vec<DataCollectionTask>> {
        self.create_seq_tasks_at(tasks, Utc::now()).await
    }

    /// Persists tasks as a sequential chain at `now`.
    ///
    /// Links each task to the next through `next_task_id`; the first task is
    /// QUEUED and claimable at `now`, the rest are WAITING. The batch is
    /// written atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionFailed`] for an empty list, duplicate ids,
    /// or a task whose verification task is unknown, and propagates storage
    /// failures.
    #[tracing::instrument(skip(self, tasks), fields(task_count = tasks.len()))]
    pub async fn create_seq_tasks_at(
        &self,
        mut tasks: Vec<DataCollectionTask>,
        now: DateTime<Utc>,
    ) -> Result<Vec<DataCollectionTask>> {
        if tasks.is_empty() {
            return Err(Error::precondition("a task chain needs at least one task"));
        }
        let mut seen = HashSet::with_capacity(tasks.len());
        if let Some(duplicate) = tasks.iter().find(|t| !seen.insert(t.id)) {
            return Err(Error::precondition(format!(
                "task {} appears twice in the chain",
                duplicate.id
            )));
        }
        for task in &tasks {
            match self.mapper.get(&task.verification_task_id).await {
                Ok(_) => {}
                Err(Error::NotFound { .. }) => {
                    return Err(Error::precondition(format!(
                        "task {} references unknown verification task {}",
                        task.id, task.verification_task_id
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        let next_ids: Vec<Option<DataCollectionTaskId>> = tasks
            .iter()
            .skip(1)
            .map(|t| Some(t.id))
            .chain(std::iter::once(None))
            .collect();
        let retention = self.config.task_retention();
        for (index, (task, next_task_id)) in tasks.iter_mut().zip(next_ids).enumerate() {
            task.next_task_id = next_task_id;
            task.retry_count = 0;
            task.stamp_created_at(now, retention);
            if index == 0 {
                task.status = TaskStatus::Queued;
                task.valid_after = now;
                task.last_transition_reason = Some(TransitionReason::Created);
            } else {
                task.status = TaskStatus::Waiting;
                task.last_transition_reason = Some(TransitionReason::CreatedWaiting);
            }
        }

        self.store.insert_batch(&tasks).await?;

        for task in &tasks {
            self.metrics.record_tasks_created(task.task_type.as_label(), 1);
        }
        tracing::info!(first_task_id = %tasks[0].id, "created sequential task chain");
        Ok(tasks)
    }

    // --- Claiming ---

    /// Claims the next runnable task for a worker.
    ///
    /// # Errors
    ///
    /// Propagates storage failures. "Nothing to do" is `Ok(None)`.
    pub async fn claim_next(
        &self,
        account_id: &str,
        worker_id: &str,
    ) -> Result<Option<DataCollectionTask>> {
        self.claim_next_at(account_id, worker_id, Utc::now()).await
    }

    /// Claims the next runnable task for a worker at `now`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures. "Nothing to do" is `Ok(None)`.
    #[tracing::instrument(skip(self), fields(account_id = %account_id, worker_id = %worker_id))]
    pub async fn claim_next_at(
        &self,
        account_id: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DataCollectionTask>> {
        let filter = self.claim_filter(account_id, worker_id);
        let claimed = self.store.claim_next(&filter, now).await?;
        if let Some(task) = &claimed {
            let from = if task.last_transition_reason == Some(TransitionReason::StaleReclaimed) {
                TaskStatus::Running
            } else {
                TaskStatus::Queued
            };
            self.metrics
                .record_task_transition(from.as_label(), TaskStatus::Running.as_label());
            self.metrics.record_claim(task.task_type.as_label());
            tracing::debug!(
                task_id = %task.id,
                retry_count = task.retry_count,
                "claimed collection task"
            );
        }
        Ok(claimed)
    }

    /// Claims up to `claim_batch_limit` tasks for one worker poll.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn claim_batch(
        &self,
        account_id: &str,
        worker_id: &str,
    ) -> Result<Vec<DataCollectionTask>> {
        self.claim_batch_at(account_id, worker_id, Utc::now()).await
    }

    /// Claims up to `claim_batch_limit` tasks for one worker poll at `now`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn claim_batch_at(
        &self,
        account_id: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<DataCollectionTask>> {
        let span = collection_span("claim_batch", account_id, worker_id);
        async {
            let mut claimed = Vec::new();
            while claimed.len() < self.config.claim_batch_limit {
                match self.claim_next_at(account_id, worker_id, now).await? {
                    Some(task) => claimed.push(task),
                    None => break,
                }
            }
            Ok::<_, Error>(claimed)
        }
        .instrument(span)
        .await
    }

    fn claim_filter(&self, account_id: &str, worker_id: &str) -> ClaimFilter {
        ClaimFilter {
            account_id: account_id.to_string(),
            worker_id: worker_id.to_string(),
            stale_after: self.config.stale_running_timeout(),
            max_deployment_retries: self.config.max_deployment_retries,
        }
    }

    // --- Reporting ---

    /// Settles a worker's report.
    ///
    /// # Errors
    ///
    /// See [`DataCollectionScheduler::report_result_at`].
    pub async fn report_result(&self, result: TaskResult) -> Result<()> {
        self.report_result_at(result, Utc::now()).await
    }

    /// Settles a worker's report at `now`.
    ///
    /// Reports for tasks that are no longer RUNNING (duplicates, late reports
    /// after a reclaim settled) are ignored, unless the task settled with the
    /// reported outcome and its follow-up work is still pending; then the
    /// follow-ups run again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown task and propagates storage
    /// and collaborator failures. After a collaborator failure the task keeps
    /// its follow-up marker, so repeating the report is safe.
    #[tracing::instrument(skip(self, result), fields(task_id = %result.task_id, status = ?result.status))]
    pub async fn report_result_at(&self, result: TaskResult, now: DateTime<Utc>) -> Result<()> {
        let task = self.get_task(&result.task_id).await?;
        match result.status {
            ReportedStatus::Success => self.handle_success(task, now).await,
            ReportedStatus::Failed => {
                self.handle_failure(
                    task,
                    TransitionReason::CollectionFailed,
                    result.exception,
                    result.stacktrace,
                    now,
                )
                .await
            }
        }
    }

    async fn handle_success(&self, task: DataCollectionTask, now: DateTime<Utc>) -> Result<()> {
        if task.status == TaskStatus::Success && task.follow_up_pending {
            tracing::info!(task_id = %task.id, "resuming follow-up work of completed task");
            return self.complete_success(&task, now).await;
        }

        let update = TaskUpdate::to(TaskStatus::Success, TransitionReason::CollectionSucceeded)
            .with_follow_up_pending(true);
        let cas = self
            .store
            .cas_update(&task.id, TaskStatus::Running, update, now)
            .await?;
        if !cas.is_success() {
            tracing::warn!(task_id = %task.id, ?cas, "ignoring success report for task that is not running");
            return Ok(());
        }
        self.metrics
            .record_task_transition(TaskStatus::Running.as_label(), TaskStatus::Success.as_label());

        self.complete_success(&task, now).await
    }

    async fn complete_success(&self, task: &DataCollectionTask, now: DateTime<Utc>) -> Result<()> {
        match task.task_type {
            DataCollectionTaskType::ServiceGuard => {
                self.create_next_service_guard_task(task, false, now)
                    .await?;
            }
            DataCollectionTaskType::Deployment => {
                self.advance_chain(task, now).await?;
                self.log_deployment_progress(
                    task,
                    TaskStatus::Success,
                    PROGRESS_SUCCESS_LOG.to_string(),
                    now,
                )
                .await?;
            }
        }

        if task.queue_analysis {
            self.collaborators
                .orchestrator
                .queue_analysis(&task.verification_task_id, task.window())
                .await?;
        }
        self.finish_follow_up(task, now).await
    }

    async fn finish_follow_up(&self, task: &DataCollectionTask, now: DateTime<Utc>) -> Result<()> {
        if self.store.finish_follow_up(&task.id, now).await? {
            tracing::debug!(task_id = %task.id, "follow-up work complete");
        }
        Ok(())
    }

    async fn handle_failure(
        &self,
        task: DataCollectionTask,
        reason: TransitionReason,
        exception: Option<String>,
        stacktrace: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if task.follow_up_pending
            && matches!(task.status, TaskStatus::Failed | TaskStatus::Expired)
        {
            tracing::info!(task_id = %task.id, "resuming follow-up work of failed task");
            let exception = task.exception.clone();
            return self.fail_terminally(&task, exception.as_deref(), now).await;
        }

        let retry = self.is_retry_eligible(&task, now);
        let update = TaskUpdate::to(TaskStatus::Failed, reason)
            .with_failure(exception.clone(), stacktrace)
            .with_follow_up_pending(!retry);
        let cas = self
            .store
            .cas_update(&task.id, TaskStatus::Running, update, now)
            .await?;
        if !cas.is_success() {
            tracing::warn!(task_id = %task.id, ?cas, "ignoring failure report for task that is not running");
            return Ok(());
        }
        self.metrics
            .record_task_transition(TaskStatus::Running.as_label(), TaskStatus::Failed.as_label());

        if retry {
            let retry_count = task.retry_count.saturating_add(1);
            let valid_after = now + self.config.retry_backoff(retry_count);
            let update = TaskUpdate::to(TaskStatus::Queued, TransitionReason::RetryScheduled)
                .with_retry_count(retry_count)
                .with_valid_after(valid_after);
            let cas = self
                .store
                .cas_update(&task.id, TaskStatus::Failed, update, now)
                .await?;
            if cas.is_success() {
                self.metrics
                    .record_task_transition(TaskStatus::Failed.as_label(), TaskStatus::Queued.as_label());
                self.metrics.record_retry(task.task_type.as_label());
                tracing::info!(
                    task_id = %task.id,
                    retry_count,
                    valid_after = %valid_after,
                    "re-queued failed collection task"
                );
            } else {
                tracing::warn!(task_id = %task.id, ?cas, "failed task changed before retry");
            }
            return Ok(());
        }

        self.fail_terminally(&task, exception.as_deref(), now).await
    }

    async fn fail_terminally(
        &self,
        task: &DataCollectionTask,
        exception: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match task.task_type {
            DataCollectionTaskType::ServiceGuard => {
                let update = TaskUpdate::to(TaskStatus::Expired, TransitionReason::FellBehindCutoff);
                if self
                    .store
                    .cas_update(&task.id, TaskStatus::Failed, update, now)
                    .await?
                    .is_success()
                {
                    self.metrics.record_task_transition(
                        TaskStatus::Failed.as_label(),
                        TaskStatus::Expired.as_label(),
                    );
                }
                tracing::warn!(
                    task_id = %task.id,
                    retry_count = task.retry_count,
                    "service guard task expired"
                );
                self.create_next_service_guard_task(task, true, now)
                    .await?;
            }
            DataCollectionTaskType::Deployment => {
                let cascaded = self.cascade_failure(task, now).await?;
                tracing::warn!(
                    task_id = %task.id,
                    retry_count = task.retry_count,
                    cascaded,
                    "deployment task failed terminally"
                );
                let log = format!("{PROGRESS_FAILURE_LOG_PREFIX}{}", exception.unwrap_or_default());
                self.log_deployment_progress(task, TaskStatus::Failed, log, now)
                    .await?;
            }
        }
        self.finish_follow_up(task, now).await
    }

    fn is_retry_eligible(&self, task: &DataCollectionTask, now: DateTime<Utc>) -> bool {
        match task.task_type {
            DataCollectionTaskType::Deployment => {
                task.retry_count < self.config.max_deployment_retries
            }
            DataCollectionTaskType::ServiceGuard => {
                task.start_time >= now - self.config.catch_up_cutoff()
            }
        }
    }

    /// Fails every WAITING or QUEUED task downstream of a failed deployment
    /// task: the rest of its verification task, and every task reachable
    /// through `next_task_id` whatever verification task it belongs to.
    async fn cascade_failure(&self, failed: &DataCollectionTask, now: DateTime<Utc>) -> Result<usize> {
        let mut dependents: Vec<DataCollectionTask> = self
            .store
            .find_by_verification_task(
                &failed.verification_task_id,
                &[TaskStatus::Waiting, TaskStatus::Queued],
            )
            .await?
            .into_iter()
            .filter(|t| t.id != failed.id)
            .collect();

        let mut visited = HashSet::from([failed.id]);
        let mut next = failed.next_task_id;
        while let Some(id) = next {
            if !visited.insert(id) {
                break;
            }
            let Some(successor) = self.store.get(&id).await? else {
                tracing::warn!(next_task_id = %id, "chain link points at a missing task");
                break;
            };
            next = successor.next_task_id;
            if successor.status.is_pending() && dependents.iter().all(|t| t.id != successor.id) {
                dependents.push(successor);
            }
        }

        let mut cascaded = 0;
        for dependent in &dependents {
            let update = TaskUpdate::to(TaskStatus::Failed, TransitionReason::UpstreamFailed)
                .with_failure(
                    Some(format!("upstream data collection task {} failed", failed.id)),
                    None,
                );
            if self
                .store
                .cas_update(&dependent.id, dependent.status, update, now)
                .await?
                .is_success()
            {
                self.metrics.record_task_transition(
                    dependent.status.as_label(),
                    TaskStatus::Failed.as_label(),
                );
                cascaded += 1;
            }
        }
        self.metrics.record_cascade_failures(cascaded);
        Ok(cascaded)
    }

    async fn advance_chain(&self, task: &DataCollectionTask, now: DateTime<Utc>) -> Result<()> {
        let Some(next_id) = task.next_task_id else {
            return Ok(());
        };
        let update = TaskUpdate::to(TaskStatus::Queued, TransitionReason::PredecessorSucceeded);
        match self
            .store
            .cas_update(&next_id, TaskStatus::Waiting, update, now)
            .await?
        {
            CasResult::Success => {
                self.metrics
                    .record_task_transition(TaskStatus::Waiting.as_label(), TaskStatus::Queued.as_label());
                tracing::debug!(next_task_id = %next_id, "queued next task in chain");
            }
            CasResult::StateMismatch { actual } => {
                tracing::info!(next_task_id = %next_id, status = %actual, "next task is not waiting; leaving it");
            }
            CasResult::NotFound => {
                tracing::warn!(next_task_id = %next_id, "next task in chain does not exist");
            }
        }
        Ok(())
    }

    /// Creates the periodic successor of a ServiceGuard task.
    ///
    /// The new window starts where the previous one ended, clamped forward to
    /// the catch-up cutoff. Disabled or deleted sources get no successor. An
    /// already scheduled successor is returned instead of creating another.
    async fn create_next_service_guard_task(
        &self,
        previous: &DataCollectionTask,
        recovering: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<DataCollectionTask>> {
        let existing = self
            .store
            .find_by_verification_task(&previous.verification_task_id, &[])
            .await?
            .into_iter()
            .find(|t| t.id != previous.id && t.start_time >= previous.end_time);
        if let Some(successor) = existing {
            tracing::debug!(
                previous_task_id = %previous.id,
                next_task_id = %successor.id,
                "next service guard task already scheduled"
            );
            return Ok(Some(successor));
        }

        let data_source = self.owning_data_source(previous).await?;
        if !data_source.as_ref().is_some_and(|ds| ds.enabled) {
            tracing::info!(
                verification_task_id = %previous.verification_task_id,
                "data source disabled or missing; not scheduling next task"
            );
            return Ok(None);
        }

        let earliest_start = floor_to_minute(now - self.config.catch_up_cutoff());
        let start = previous.end_time.max(earliest_start);
        let window = TimeWindow::starting_at(start, self.config.service_guard_window());
        let mut valid_after = window.end + self.config.data_collection_delay();
        if recovering {
            valid_after = valid_after.max(now + self.config.retry_backoff(1));
        }

        let mut next = DataCollectionTask::new(
            previous.account_id.as_str(),
            previous.verification_task_id,
            previous.data_collection_worker_id.as_str(),
            DataCollectionTaskType::ServiceGuard,
            window,
        )
        .with_data_collection_info(previous.data_collection_info.clone())
        .with_valid_after(valid_after)
        .with_queue_analysis(previous.queue_analysis);
        next.stamp_created_at(now, self.config.task_retention());
        self.store.insert(&next).await?;

        self.metrics
            .record_tasks_created(DataCollectionTaskType::ServiceGuard.as_label(), 1);
        tracing::debug!(
            previous_task_id = %previous.id,
            next_task_id = %next.id,
            start = %window.start,
            "scheduled next service guard task"
        );
        Ok(Some(next))
    }

    async fn owning_data_source(&self, task: &DataCollectionTask) -> Result<Option<DataSource>> {
        let data_source_id = match self.mapper.data_source_id(&task.verification_task_id).await {
            Ok(Some(id)) => id,
            Ok(None) | Err(Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        self.collaborators
            .data_sources
            .get(&task.account_id, &data_source_id)
            .await
    }

    async fn log_deployment_progress(
        &self,
        task: &DataCollectionTask,
        status: TaskStatus,
        log: String,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let job_instance_id = match self.mapper.job_instance_id(&task.verification_task_id).await {
            Ok(Some(id)) => id,
            Ok(None) | Err(Error::NotFound { .. }) => {
                tracing::warn!(
                    verification_task_id = %task.verification_task_id,
                    "deployment task has no job instance; skipping progress log"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.collaborators
            .progress
            .log_progress(ProgressLog {
                verification_job_instance_id: job_instance_id,
                verification_task_id: task.verification_task_id,
                window: task.window(),
                status,
                log,
                is_final_state: false,
                created_at: now,
            })
            .await
    }

    // --- Housekeeping ---

    /// Aborts every WAITING or QUEUED task of the given verification tasks.
    ///
    /// Applies to ServiceGuard and Deployment tasks alike.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn abort_pending_tasks(
        &self,
        verification_task_ids: &[VerificationTaskId],
    ) -> Result<usize> {
        self.abort_pending_tasks_at(verification_task_ids, Utc::now())
            .await
    }

    /// Aborts every WAITING or QUEUED task of the given verification tasks at `now`.
    ///
    /// Returns the number of tasks aborted.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    #[tracing::instrument(skip(self, verification_task_ids), fields(verification_tasks = verification_task_ids.len()))]
    pub async fn abort_pending_tasks_at(
        &self,
        verification_task_ids: &[VerificationTaskId],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut aborted = 0;
        for verification_task_id in verification_task_ids {
            let pending = self
                .store
                .find_by_verification_task(
                    verification_task_id,
                    &[TaskStatus::Waiting, TaskStatus::Queued],
                )
                .await?;
            for task in pending {
                let update = TaskUpdate::to(TaskStatus::Aborted, TransitionReason::Aborted);
                if self
                    .store
                    .cas_update(&task.id, task.status, update, now)
                    .await?
                    .is_success()
                {
                    self.metrics
                        .record_task_transition(task.status.as_label(), TaskStatus::Aborted.as_label());
                    aborted += 1;
                }
            }
        }
        tracing::info!(aborted, "aborted pending collection tasks");
        Ok(aborted)
    }

    /// Settles RUNNING tasks that went stale and can no longer be reclaimed.
    ///
    /// # Errors
    ///
    /// See [`DataCollectionScheduler::expire_abandoned_tasks_at`].
    pub async fn expire_abandoned_tasks(&self) -> Result<usize> {
        self.expire_abandoned_tasks_at(Utc::now()).await
    }

    /// Settles abandoned tasks at `now` by routing them through the failure path.
    ///
    /// Returns the number of tasks settled.
    ///
    /// # Errors
    ///
    /// Propagates storage and collaborator failures.
    #[tracing::instrument(skip(self))]
    pub async fn expire_abandoned_tasks_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let abandoned = self
            .store
            .find_abandoned(
                self.config.stale_running_timeout(),
                self.config.max_deployment_retries,
                now,
            )
            .await?;
        let count = abandoned.len();
        for task in abandoned {
            let exception = format!(
                "data collection task abandoned: no update since {}",
                task.last_updated_at
            );
            self.handle_failure(task, TransitionReason::Abandoned, Some(exception), None, now)
                .await?;
        }
        Ok(count)
    }

    /// Resumes follow-up work left pending by reports that failed midway.
    ///
    /// # Errors
    ///
    /// See [`DataCollectionScheduler::resume_pending_follow_ups_at`].
    pub async fn resume_pending_follow_ups(&self) -> Result<usize> {
        self.resume_pending_follow_ups_at(Utc::now()).await
    }

    /// Resumes pending follow-up work at `now`.
    ///
    /// Only tasks untouched for the stale-running timeout are picked up, so a
    /// report still in flight finishes its own follow-ups. A task whose
    /// follow-ups fail again keeps its marker for the next sweep. Returns the
    /// number of tasks completed.
    ///
    /// # Errors
    ///
    /// Propagates storage failures from the lookup.
    #[tracing::instrument(skip(self))]
    pub async fn resume_pending_follow_ups_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let pending = self
            .store
            .find_pending_follow_ups(now - self.config.stale_running_timeout())
            .await?;
        let mut resumed = 0;
        for task in pending {
            let result = match task.status {
                TaskStatus::Success => self.complete_success(&task, now).await,
                TaskStatus::Failed | TaskStatus::Expired => {
                    let exception = task.exception.clone();
                    self.fail_terminally(&task, exception.as_deref(), now).await
                }
                _ => continue,
            };
            match result {
                Ok(()) => resumed += 1,
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "follow-up work still failing");
                }
            }
        }
        if resumed > 0 {
            tracing::info!(resumed, "resumed pending follow-up work");
        }
        Ok(resumed)
    }

    // --- Lookups ---

    /// Gets a task by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the task does not exist.
    pub async fn get_task(&self, id: &DataCollectionTaskId) -> Result<DataCollectionTask> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("data collection task", id))
    }

    /// Gets every task of a verification task, ordered by window start.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn tasks_for_verification_task(
        &self,
        verification_task_id: &VerificationTaskId,
    ) -> Result<Vec<DataCollectionTask>> {
        self.store
            .find_by_verification_task(verification_task_id, &[])
            .await
    }
}
