mod common;

use common::try_setup_db;
use serial_test::serial;
use snapqueue::jobs::maintenance::MaintenanceRepo;
use snapqueue::jobs::telemetry::JobTelemetry;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

const RETENTION_HOURS: i64 = 168;

/// Inserts a terminal row whose `finished_at` is `age_seconds` in the past.
async fn insert_terminal_job(pool: &PgPool, status: &str, age_seconds: i64) -> Uuid {
    sqlx::query_scalar(
        r#"
        INSERT INTO snapshot_jobs
            (snapshot_id, status, attempts, max_attempts, next_run_at,
             started_at, finished_at)
        VALUES
            ($1, $2, 1, 3, now(),
             now() - ($3::bigint * interval '1 second') - interval '5 seconds',
             now() - ($3::bigint * interval '1 second'))
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(status)
    .bind(age_seconds)
    .fetch_one(pool)
    .await
    .expect("failed to insert terminal job")
}

#[tokio::test]
#[serial]
async fn cleanup_respects_the_retention_boundary() {
    let Some(pool) = try_setup_db().await else { return };
    let telemetry = Arc::new(JobTelemetry::new());
    let maintenance = MaintenanceRepo::new(pool.clone(), telemetry.clone());

    let retention_secs = RETENTION_HOURS * 3600;
    let expired = insert_terminal_job(&pool, "completed", retention_secs + 1).await;
    let retained = insert_terminal_job(&pool, "failed", retention_secs - 1).await;

    let deleted = maintenance
        .cleanup_terminal_once(RETENTION_HOURS, 100)
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    let expired_exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM snapshot_jobs WHERE id = $1)")
            .bind(expired)
            .fetch_one(&pool)
            .await
            .unwrap();
    let retained_exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM snapshot_jobs WHERE id = $1)")
            .bind(retained)
            .fetch_one(&pool)
            .await
            .unwrap();

    assert!(!expired_exists, "row past retention must be deleted");
    assert!(retained_exists, "row inside retention must survive");
    assert_eq!(telemetry.snapshot().cleanup_deleted, 1);
}

#[tokio::test]
#[serial]
async fn cleanup_never_touches_non_terminal_rows() {
    let Some(pool) = try_setup_db().await else { return };
    let telemetry = Arc::new(JobTelemetry::new());
    let maintenance = MaintenanceRepo::new(pool.clone(), telemetry);

    // An ancient pending row has no finished_at and must never be deleted.
    sqlx::query(
        r#"
        INSERT INTO snapshot_jobs (snapshot_id, status, attempts, max_attempts, next_run_at, created_at)
        VALUES ($1, 'pending', 0, 3, now(), now() - interval '365 days')
        "#,
    )
    .bind(Uuid::new_v4())
    .execute(&pool)
    .await
    .unwrap();

    let deleted = maintenance
        .cleanup_terminal_once(RETENTION_HOURS, 100)
        .await
        .unwrap();
    assert_eq!(deleted, 0);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snapshot_jobs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[serial]
async fn cleanup_is_bounded_by_the_hard_cap() {
    let Some(pool) = try_setup_db().await else { return };
    let telemetry = Arc::new(JobTelemetry::new());
    let maintenance = MaintenanceRepo::new(pool.clone(), telemetry.clone());

    let retention_secs = RETENTION_HOURS * 3600;
    for _ in 0..120 {
        insert_terminal_job(&pool, "completed", retention_secs + 60).await;
    }

    // Requesting more than the hard cap still deletes at most 100 per cycle.
    let first = maintenance
        .cleanup_terminal_once(RETENTION_HOURS, 500)
        .await
        .unwrap();
    assert_eq!(first, 100);

    let second = maintenance
        .cleanup_terminal_once(RETENTION_HOURS, 500)
        .await
        .unwrap();
    assert_eq!(second, 20);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snapshot_jobs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
    assert_eq!(telemetry.snapshot().cleanup_deleted, 120);
}

#[tokio::test]
#[serial]
async fn oldest_terminal_rows_are_deleted_first() {
    let Some(pool) = try_setup_db().await else { return };
    let telemetry = Arc::new(JobTelemetry::new());
    let maintenance = MaintenanceRepo::new(pool.clone(), telemetry);

    let retention_secs = RETENTION_HOURS * 3600;
    let older = insert_terminal_job(&pool, "failed", retention_secs + 7200).await;
    let newer = insert_terminal_job(&pool, "completed", retention_secs + 60).await;

    let deleted = maintenance
        .cleanup_terminal_once(RETENTION_HOURS, 1)
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    let older_exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM snapshot_jobs WHERE id = $1)")
            .bind(older)
            .fetch_one(&pool)
            .await
            .unwrap();
    let newer_exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM snapshot_jobs WHERE id = $1)")
            .bind(newer)
            .fetch_one(&pool)
            .await
            .unwrap();

    assert!(!older_exists);
    assert!(newer_exists);
}
