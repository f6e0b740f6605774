//! Scheduling and draining of sidekick jobs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::Instrument;

use vigil_core::observability::sidekick_span;

use super::{
    ExecutorRegistry, SideKick, SideKickData, SideKickOutcome, SideKickRetryPolicy,
    SideKickStore,
};
use crate::error::Result;
use crate::metrics::{CollectMetrics, TimingGuard};

/// Counts from one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Jobs whose executor completed.
    pub succeeded: usize,
    /// Jobs that ended FAILED.
    pub failed: usize,
    /// Jobs that failed and were put back for another attempt.
    pub requeued: usize,
}

impl DrainSummary {
    /// Total jobs processed.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.succeeded + self.failed + self.requeued
    }
}

/// Generic at-least-once background job queue.
#[derive(Clone)]
pub struct SideKickQueue {
    store: Arc<dyn SideKickStore>,
    executors: ExecutorRegistry,
    retry: SideKickRetryPolicy,
    metrics: CollectMetrics,
}

impl std::fmt::Debug for SideKickQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SideKickQueue")
            .field("executors", &self.executors)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl SideKickQueue {
    /// Creates a queue with no automatic retry.
    #[must_use]
    pub fn new(store: Arc<dyn SideKickStore>, executors: ExecutorRegistry) -> Self {
        Self {
            store,
            executors,
            retry: SideKickRetryPolicy::default(),
            metrics: CollectMetrics::new(),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: SideKickRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Persists a QUEUED job that becomes due after `run_after`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn schedule(
        &self,
        sidekick_data: SideKickData,
        run_after: DateTime<Utc>,
    ) -> Result<SideKick> {
        self.schedule_at(sidekick_data, run_after, Utc::now()).await
    }

    /// Persists a QUEUED job created at `now`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    #[tracing::instrument(
        skip(self, sidekick_data),
        fields(sidekick_type = %sidekick_data.sidekick_type(), run_after = %run_after)
    )]
    pub async fn schedule_at(
        &self,
        sidekick_data: SideKickData,
        run_after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SideKick> {
        let job = SideKick::new(sidekick_data, run_after, now);
        self.store.insert(&job).await?;
        tracing::debug!(sidekick_id = %job.id, "scheduled sidekick job");
        Ok(job)
    }

    /// Runs every due job.
    ///
    /// # Errors
    ///
    /// See [`SideKickQueue::drain_at`].
    pub async fn drain(&self) -> Result<DrainSummary> {
        self.drain_at(Utc::now()).await
    }

    /// Runs every job due at `now`, one claim at a time, until none remain.
    ///
    /// Executor failures are recorded on the job and never returned; one
    /// failing job does not stop the drain.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    #[tracing::instrument(skip(self))]
    pub async fn drain_at(&self, now: DateTime<Utc>) -> Result<DrainSummary> {
        let metrics = self.metrics.clone();
        let _timer = TimingGuard::new(move |elapsed| metrics.observe_drain_duration(elapsed));

        let mut summary = DrainSummary::default();
        while let Some(job) = self.store.claim_next(now).await? {
            let span = sidekick_span("drain", &job.id.to_string(), job.sidekick_type().as_label());
            let outcome = self.run(&job, now).instrument(span).await;

            match &outcome {
                SideKickOutcome::Succeeded => summary.succeeded += 1,
                SideKickOutcome::Failed { .. } => summary.failed += 1,
                SideKickOutcome::Requeued { .. } => summary.requeued += 1,
            }
            self.metrics.record_sidekick_outcome(
                job.sidekick_type().as_label(),
                outcome.status().as_label(),
            );

            if !self.store.complete(&job.id, outcome, now).await? {
                tracing::warn!(sidekick_id = %job.id, "sidekick job changed while running");
            }
        }

        self.metrics.set_last_drain_jobs(summary.total());
        if summary.total() > 0 {
            tracing::info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                requeued = summary.requeued,
                "drained sidekick jobs"
            );
        }
        Ok(summary)
    }

    async fn run(&self, job: &SideKick, now: DateTime<Utc>) -> SideKickOutcome {
        let Some(executor) = self.executors.get(job.sidekick_type()) else {
            let exception = format!("no executor registered for {}", job.sidekick_type());
            tracing::error!(sidekick_id = %job.id, "{exception}");
            return SideKickOutcome::Failed {
                stacktrace: exception.clone(),
                exception,
            };
        };

        match executor.execute(&job.sidekick_data, now).await {
            Ok(()) => {
                tracing::debug!(sidekick_id = %job.id, "sidekick job succeeded");
                SideKickOutcome::Succeeded
            }
            Err(err) => {
                let exception = err.to_string();
                let stacktrace = format!("{err:?}");
                match self.retry.next_run_after(job.attempts, now) {
                    Some(run_after) => {
                        tracing::warn!(
                            sidekick_id = %job.id,
                            attempts = job.attempts,
                            run_after = %run_after,
                            error = %exception,
                            "sidekick job failed, will retry"
                        );
                        SideKickOutcome::Requeued {
                            run_after,
                            exception,
                            stacktrace,
                        }
                    }
                    None => {
                        tracing::error!(
                            sidekick_id = %job.id,
                            attempts = job.attempts,
                            error = %exception,
                            "sidekick job failed"
                        );
                        SideKickOutcome::Failed {
                            exception,
                            stacktrace,
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sidekick::memory::InMemorySideKickStore;
    use crate::sidekick::{SideKickExecutor, SideKickStatus, SideKickType};
    use anyhow::Context;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    #[derive(Default)]
    struct Webhooks {
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SideKickExecutor for Webhooks {
        async fn execute(&self, data: &SideKickData, _now: DateTime<Utc>) -> anyhow::Result<()> {
            let SideKickData::WebhookCall { url, .. } = data else {
                anyhow::bail!("unexpected payload {:?}", data.sidekick_type());
            };
            if url.contains("broken") {
                return Err(std::io::Error::other("connection refused"))
                    .with_context(|| format!("POST {url}"));
            }
            self.delivered.lock().unwrap().push(url.clone());
            Ok(())
        }
    }

    fn webhook(url: &str) -> SideKickData {
        SideKickData::WebhookCall {
            url: url.into(),
            payload: serde_json::json!({}),
        }
    }

    fn queue(store: Arc<InMemorySideKickStore>, hooks: Arc<Webhooks>) -> SideKickQueue {
        SideKickQueue::new(
            store,
            ExecutorRegistry::new().with_executor(SideKickType::WebhookCall, hooks),
        )
    }

    #[tokio::test]
    async fn drains_due_jobs_in_creation_order() -> Result<()> {
        let store = Arc::new(InMemorySideKickStore::new());
        let hooks = Arc::new(Webhooks::default());
        let queue = queue(store.clone(), hooks.clone());

        queue.schedule_at(webhook("https://a"), t0(), t0()).await?;
        queue
            .schedule_at(webhook("https://b"), t0(), t0() + Duration::seconds(1))
            .await?;
        queue
            .schedule_at(webhook("https://later"), t0() + Duration::hours(1), t0())
            .await?;

        let summary = queue.drain_at(t0() + Duration::minutes(1)).await?;
        assert_eq!(summary, DrainSummary { succeeded: 2, failed: 0, requeued: 0 });
        assert_eq!(*hooks.delivered.lock().unwrap(), vec!["https://a", "https://b"]);
        assert_eq!(store.jobs_with_status(SideKickStatus::Queued)?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn failure_is_captured_and_does_not_block_others() -> Result<()> {
        let store = Arc::new(InMemorySideKickStore::new());
        let hooks = Arc::new(Webhooks::default());
        let queue = queue(store.clone(), hooks.clone());

        let broken = queue.schedule_at(webhook("https://broken"), t0(), t0()).await?;
        queue
            .schedule_at(webhook("https://ok"), t0(), t0() + Duration::seconds(1))
            .await?;

        let summary = queue.drain_at(t0() + Duration::minutes(1)).await?;
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);

        let failed = store.get(&broken.id).await?.unwrap();
        assert_eq!(failed.status, SideKickStatus::Failed);
        assert_eq!(failed.exception.as_deref(), Some("POST https://broken"));
        assert!(failed.stacktrace.unwrap().contains("connection refused"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_executor_fails_the_job() -> Result<()> {
        let store = Arc::new(InMemorySideKickStore::new());
        let queue = SideKickQueue::new(store.clone(), ExecutorRegistry::new());
        let job = queue.schedule_at(webhook("https://a"), t0(), t0()).await?;

        let summary = queue.drain_at(t0() + Duration::minutes(1)).await?;
        assert_eq!(summary.failed, 1);
        let stored = store.get(&job.id).await?.unwrap();
        assert_eq!(stored.status, SideKickStatus::Failed);
        assert!(stored.exception.unwrap().contains("webhook_call"));
        Ok(())
    }

    #[tokio::test]
    async fn retry_policy_requeues_until_attempts_run_out() -> Result<()> {
        let store = Arc::new(InMemorySideKickStore::new());
        let hooks = Arc::new(Webhooks::default());
        let queue = queue(store.clone(), hooks).with_retry_policy(SideKickRetryPolicy {
            max_attempts: 2,
            backoff: Duration::minutes(1),
        });
        let job = queue.schedule_at(webhook("https://broken"), t0(), t0()).await?;

        let first = t0() + Duration::seconds(1);
        assert_eq!(queue.drain_at(first).await?.requeued, 1);
        let requeued = store.get(&job.id).await?.unwrap();
        assert_eq!(requeued.status, SideKickStatus::Queued);
        assert_eq!(requeued.run_after, first + Duration::minutes(1));

        assert_eq!(queue.drain_at(first + Duration::seconds(30)).await?.total(), 0);

        let second = first + Duration::minutes(2);
        assert_eq!(queue.drain_at(second).await?.failed, 1);
        let failed = store.get(&job.id).await?.unwrap();
        assert_eq!(failed.status, SideKickStatus::Failed);
        assert_eq!(failed.attempts, 2);
        Ok(())
    }

    #[tokio::test]
    async fn empty_drain_is_not_an_error() -> Result<()> {
        let store = Arc::new(InMemorySideKickStore::new());
        let queue = SideKickQueue::new(store, ExecutorRegistry::new());
        assert_eq!(queue.drain_at(t0()).await?, DrainSummary::default());
        Ok(())
    }
}
