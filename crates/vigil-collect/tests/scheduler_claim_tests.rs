//! Claim-path tests: mutual exclusion, staleness reclaim, and batch claims.

use chrono::Duration;

use vigil_collect::config::CollectionConfig;
use vigil_collect::error::Result;
use vigil_collect::store::TaskStore;
use vigil_collect::task::{DataCollectionTask, DataCollectionTaskType, TaskStatus, TransitionReason};
use vigil_core::{TimeWindow, VerificationTaskId};
use vigil_test_utils::{ACCOUNT_ID, TestContext, assert_status, init_test_logging, t0};

async fn seed_service_guard_task(ctx: &TestContext, worker_id: &str) -> Result<DataCollectionTask> {
    let mut task = DataCollectionTask::new(
        ACCOUNT_ID,
        VerificationTaskId::generate(),
        worker_id,
        DataCollectionTaskType::ServiceGuard,
        TimeWindow::starting_at(t0() - Duration::minutes(10), Duration::minutes(5)),
    );
    task.stamp_created_at(t0() - Duration::minutes(1), Duration::days(30));
    ctx.tasks.insert(&task).await?;
    Ok(task)
}

#[tokio::test]
async fn concurrent_claims_have_exactly_one_winner() -> Result<()> {
    init_test_logging();
    let ctx = TestContext::new();
    seed_service_guard_task(&ctx, "worker-1").await?;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let scheduler = ctx.scheduler.clone();
            tokio::spawn(async move { scheduler.claim_next_at(ACCOUNT_ID, "worker-1", t0()).await })
        })
        .collect();

    let mut winners = Vec::new();
    for handle in futures::future::join_all(handles).await {
        if let Some(task) = handle.expect("claim task panicked")? {
            winners.push(task);
        }
    }
    assert_eq!(winners.len(), 1);
    assert_status(&winners[0], TaskStatus::Running);
    assert_eq!(winners[0].retry_count, 0);
    Ok(())
}

#[tokio::test]
async fn claims_only_for_matching_worker_and_account() -> Result<()> {
    let ctx = TestContext::new();
    seed_service_guard_task(&ctx, "worker-1").await?;

    assert!(ctx.scheduler.claim_next_at(ACCOUNT_ID, "worker-2", t0()).await?.is_none());
    assert!(ctx.scheduler.claim_next_at("other", "worker-1", t0()).await?.is_none());
    assert!(ctx.scheduler.claim_next_at(ACCOUNT_ID, "worker-1", t0()).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn respects_valid_after() -> Result<()> {
    let ctx = TestContext::new();
    let mut task = DataCollectionTask::new(
        ACCOUNT_ID,
        VerificationTaskId::generate(),
        "worker-1",
        DataCollectionTaskType::ServiceGuard,
        TimeWindow::starting_at(t0(), Duration::minutes(5)),
    );
    task.stamp_created_at(t0(), Duration::days(30));
    ctx.tasks.insert(&task).await?;

    let window_end = t0() + Duration::minutes(5);
    assert!(
        ctx.scheduler
            .claim_next_at(ACCOUNT_ID, "worker-1", window_end - Duration::seconds(1))
            .await?
            .is_none()
    );
    assert!(ctx.scheduler.claim_next_at(ACCOUNT_ID, "worker-1", window_end).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn stale_running_task_is_reclaimed_as_a_retry() -> Result<()> {
    let ctx = TestContext::new();
    let seeded = seed_service_guard_task(&ctx, "worker-1").await?;
    ctx.scheduler.claim_next_at(ACCOUNT_ID, "worker-1", t0()).await?;

    let fresh = t0() + Duration::minutes(4);
    assert!(ctx.scheduler.claim_next_at(ACCOUNT_ID, "worker-1", fresh).await?.is_none());
    let boundary = t0() + Duration::minutes(5);
    assert!(ctx.scheduler.claim_next_at(ACCOUNT_ID, "worker-1", boundary).await?.is_none());

    let stale = boundary + Duration::seconds(1);
    let reclaimed = ctx
        .scheduler
        .claim_next_at(ACCOUNT_ID, "worker-1", stale)
        .await?
        .expect("stale task should be reclaimed");
    assert_eq!(reclaimed.id, seeded.id);
    assert_status(&reclaimed, TaskStatus::Running);
    assert_eq!(reclaimed.retry_count, 1);
    assert_eq!(reclaimed.last_updated_at, stale);
    assert_eq!(reclaimed.last_transition_reason, Some(TransitionReason::StaleReclaimed));
    Ok(())
}

#[tokio::test]
async fn service_guard_reclaim_ignores_retry_ceiling() -> Result<()> {
    let config = CollectionConfig {
        max_deployment_retries: 1,
        ..CollectionConfig::default()
    };
    let ctx = TestContext::with_config(config);
    seed_service_guard_task(&ctx, "worker-1").await?;

    let mut now = t0();
    ctx.scheduler.claim_next_at(ACCOUNT_ID, "worker-1", now).await?;
    for expected_retry in 1..=3 {
        now += Duration::minutes(6);
        let task = ctx
            .scheduler
            .claim_next_at(ACCOUNT_ID, "worker-1", now)
            .await?
            .expect("service guard task is always reclaimable");
        assert_eq!(task.retry_count, expected_retry);
    }
    Ok(())
}

#[tokio::test]
async fn deployment_reclaim_stops_at_retry_ceiling_and_sweep_settles_it() -> Result<()> {
    let config = CollectionConfig {
        max_deployment_retries: 1,
        ..CollectionConfig::default()
    };
    let ctx = TestContext::with_config(config);
    let windows = [TimeWindow::starting_at(t0() - Duration::minutes(10), Duration::minutes(5))];
    let chain = ctx.shared_deployment_chain("job-1", "worker-1", &windows).await;
    ctx.scheduler.create_seq_tasks_at(chain, t0()).await?;

    ctx.scheduler.claim_next_at(ACCOUNT_ID, "worker-1", t0()).await?.expect("first claim");
    let reclaimed = ctx
        .scheduler
        .claim_next_at(ACCOUNT_ID, "worker-1", t0() + Duration::minutes(6))
        .await?
        .expect("one reclaim allowed");
    assert_eq!(reclaimed.retry_count, 1);

    let later = t0() + Duration::minutes(12);
    assert!(ctx.scheduler.claim_next_at(ACCOUNT_ID, "worker-1", later).await?.is_none());

    assert_eq!(ctx.scheduler.expire_abandoned_tasks_at(later).await?, 1);
    let settled = ctx.scheduler.get_task(&reclaimed.id).await?;
    assert_status(&settled, TaskStatus::Failed);
    assert_eq!(settled.last_transition_reason, Some(TransitionReason::Abandoned));
    assert!(settled.exception.unwrap_or_default().contains("abandoned"));

    assert_eq!(ctx.scheduler.expire_abandoned_tasks_at(later).await?, 0);
    Ok(())
}

#[tokio::test]
async fn batch_claim_is_capped_by_limit() -> Result<()> {
    let ctx = TestContext::new();
    for _ in 0..7 {
        seed_service_guard_task(&ctx, "worker-1").await?;
    }

    let first = ctx.scheduler.claim_batch_at(ACCOUNT_ID, "worker-1", t0()).await?;
    assert_eq!(first.len(), 5);
    let second = ctx.scheduler.claim_batch_at(ACCOUNT_ID, "worker-1", t0()).await?;
    assert_eq!(second.len(), 2);
    assert!(ctx.scheduler.claim_batch_at(ACCOUNT_ID, "worker-1", t0()).await?.is_empty());

    let mut ids: Vec<_> = first.iter().chain(&second).map(|t| t.id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 7);
    Ok(())
}

#[tokio::test]
async fn claim_prefers_least_recently_updated() -> Result<()> {
    let ctx = TestContext::new();
    let older = seed_service_guard_task(&ctx, "worker-1").await?;
    let mut newer = DataCollectionTask::new(
        ACCOUNT_ID,
        VerificationTaskId::generate(),
        "worker-1",
        DataCollectionTaskType::ServiceGuard,
        TimeWindow::starting_at(t0() - Duration::minutes(10), Duration::minutes(5)),
    );
    newer.stamp_created_at(t0() - Duration::seconds(10), Duration::days(30));
    ctx.tasks.insert(&newer).await?;

    let claimed = ctx
        .scheduler
        .claim_next_at(ACCOUNT_ID, "worker-1", t0())
        .await?
        .expect("a task");
    assert_eq!(claimed.id, older.id);
    Ok(())
}
