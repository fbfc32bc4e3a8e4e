mod common;

use common::try_setup_db;
use serial_test::serial;
use snapqueue::jobs::model::EnqueueOutcome;
use snapqueue::jobs::repo::JobsRepo;
use uuid::Uuid;

#[tokio::test]
#[serial]
async fn enqueue_is_idempotent_per_snapshot() {
    let Some(pool) = try_setup_db().await else { return };
    let repo = JobsRepo::new(pool.clone());

    let snapshot_id = Uuid::new_v4();
    let first = repo.enqueue(snapshot_id, 3).await.unwrap();
    let second = repo.enqueue(snapshot_id, 3).await.unwrap();

    let EnqueueOutcome::Created(job_id) = first else {
        panic!("first enqueue should create, got {first:?}");
    };
    assert_eq!(second, EnqueueOutcome::AlreadyQueued(job_id));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snapshot_jobs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[serial]
async fn two_workers_never_claim_the_same_job() {
    let Some(pool) = try_setup_db().await else { return };
    let repo = JobsRepo::new(pool.clone());

    repo.enqueue(Uuid::new_v4(), 3).await.unwrap();

    let repo_a = repo.clone();
    let repo_b = repo.clone();
    let (a, b) = tokio::join!(
        async move { repo_a.claim_next("worker-a").await.unwrap() },
        async move { repo_b.claim_next("worker-b").await.unwrap() },
    );

    // Exactly one claimer wins; the loser gets empty, not an error.
    assert!(
        a.is_some() ^ b.is_some(),
        "expected exactly one winner, got_a={} got_b={}",
        a.is_some(),
        b.is_some()
    );

    let (status, lock_owner): (String, Option<String>) =
        sqlx::query_as("SELECT status, lock_owner FROM snapshot_jobs LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "running");
    assert!(
        lock_owner.as_deref() == Some("worker-a") || lock_owner.as_deref() == Some("worker-b"),
        "job should be locked by one of the workers"
    );
}

#[tokio::test]
#[serial]
async fn claim_sets_lock_fields_and_increments_attempts() {
    let Some(pool) = try_setup_db().await else { return };
    let repo = JobsRepo::new(pool.clone());

    let job_id = repo.enqueue(Uuid::new_v4(), 3).await.unwrap().job_id();

    let claim = repo
        .claim_next("worker-a")
        .await
        .unwrap()
        .expect("job should be claimable");

    assert_eq!(claim.job_id, job_id);
    assert_eq!(claim.attempts, 1);
    assert_eq!(claim.max_attempts, 3);

    let job = repo.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, "running");
    assert_eq!(job.lock_owner.as_deref(), Some("worker-a"));
    assert!(job.locked_at.is_some());
    assert!(job.started_at.is_some());
}

#[tokio::test]
#[serial]
async fn claim_order_is_fifo_by_eligibility_then_creation() {
    let Some(pool) = try_setup_db().await else { return };
    let repo = JobsRepo::new(pool.clone());

    let first = repo.enqueue(Uuid::new_v4(), 3).await.unwrap().job_id();
    let second = repo.enqueue(Uuid::new_v4(), 3).await.unwrap().job_id();

    // Push the first job's eligibility later than the second's.
    sqlx::query("UPDATE snapshot_jobs SET next_run_at = now() - interval '5 seconds' WHERE id = $1")
        .bind(second)
        .execute(&pool)
        .await
        .unwrap();

    let c1 = repo.claim_next("worker-a").await.unwrap().unwrap();
    let c2 = repo.claim_next("worker-a").await.unwrap().unwrap();
    assert_eq!(c1.job_id, second, "earlier next_run_at claims first");
    assert_eq!(c2.job_id, first);
}

#[tokio::test]
#[serial]
async fn future_scheduled_job_is_not_claimable() {
    let Some(pool) = try_setup_db().await else { return };
    let repo = JobsRepo::new(pool.clone());

    let job_id = repo.enqueue(Uuid::new_v4(), 3).await.unwrap().job_id();
    sqlx::query("UPDATE snapshot_jobs SET next_run_at = now() + interval '60 seconds' WHERE id = $1")
        .bind(job_id)
        .execute(&pool)
        .await
        .unwrap();

    let claim = repo.claim_next("worker-a").await.unwrap();
    assert!(claim.is_none(), "job before next_run_at must not be claimed");
}

#[tokio::test]
#[serial]
async fn empty_queue_returns_none() {
    let Some(pool) = try_setup_db().await else { return };
    let repo = JobsRepo::new(pool);

    assert!(repo.claim_next("worker-a").await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn claims_are_counted_on_the_shared_registry() {
    let Some(pool) = try_setup_db().await else { return };
    let telemetry = std::sync::Arc::new(snapqueue::jobs::telemetry::JobTelemetry::new());
    let repo = JobsRepo::with_telemetry(pool, telemetry.clone());

    repo.enqueue(Uuid::new_v4(), 3).await.unwrap();

    // Claims through the repo count even outside the poll loop; a miss on an
    // empty queue does not.
    repo.claim_next("worker-a").await.unwrap().unwrap();
    assert!(repo.claim_next("worker-a").await.unwrap().is_none());
    assert_eq!(telemetry.snapshot().claimed, 1);
}

#[tokio::test]
#[serial]
async fn heartbeat_refreshes_only_owned_running_rows() {
    let Some(pool) = try_setup_db().await else { return };
    let repo = JobsRepo::new(pool.clone());

    let owned = repo.enqueue(Uuid::new_v4(), 3).await.unwrap().job_id();
    repo.claim_next("worker-a").await.unwrap().unwrap();

    common::backdate_lock(&pool, owned, 90).await;

    // A foreign worker's heartbeat touches nothing.
    assert_eq!(repo.heartbeat("worker-b").await.unwrap(), 0);

    let refreshed = repo.heartbeat("worker-a").await.unwrap();
    assert_eq!(refreshed, 1);

    let age_secs: f64 = sqlx::query_scalar(
        "SELECT EXTRACT(EPOCH FROM (now() - locked_at))::float8 FROM snapshot_jobs WHERE id = $1",
    )
    .bind(owned)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(age_secs < 5.0, "locked_at should be fresh, age={age_secs}s");
}
