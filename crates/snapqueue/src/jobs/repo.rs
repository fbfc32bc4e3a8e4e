use crate::jobs::model::{ClaimedJob, EnqueueOutcome, Job, JobSnapshot, JobStatus};
use crate::jobs::telemetry::JobTelemetry;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Data access for the `snapshot_jobs` queue table.
///
/// Every write happens in a short transaction scoped to one logical step;
/// the database row lock is the only synchronization primitive shared
/// between workers.
#[derive(Clone)]
pub struct JobsRepo {
    pool: PgPool,
    telemetry: Arc<JobTelemetry>,
}

impl JobsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self::with_telemetry(pool, Arc::new(JobTelemetry::new()))
    }

    /// Shares the process-wide registry so claims are counted wherever they
    /// originate, not only inside the poll loop.
    pub fn with_telemetry(pool: PgPool, telemetry: Arc<JobTelemetry>) -> Self {
        Self { pool, telemetry }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ----------------------------
    // Enqueue
    // ----------------------------

    /// Enqueues one job per snapshot. A second enqueue for the same snapshot
    /// is a no-op that reports the existing job id.
    pub async fn enqueue(
        &self,
        snapshot_id: Uuid,
        max_attempts: i32,
    ) -> anyhow::Result<EnqueueOutcome> {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO snapshot_jobs (snapshot_id, status, attempts, max_attempts, next_run_at)
            VALUES ($1, $2, 0, $3, now())
            ON CONFLICT (snapshot_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(snapshot_id)
        .bind(JobStatus::Pending.as_str())
        .bind(max_attempts)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok(EnqueueOutcome::Created(id));
        }

        let existing: Uuid =
            sqlx::query_scalar("SELECT id FROM snapshot_jobs WHERE snapshot_id = $1")
                .bind(snapshot_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(EnqueueOutcome::AlreadyQueued(existing))
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get_job(&self, job_id: Uuid) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM snapshot_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn get_by_snapshot(&self, snapshot_id: Uuid) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM snapshot_jobs WHERE snapshot_id = $1")
            .bind(snapshot_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Introspection projection for read-path APIs.
    pub async fn job_snapshot(&self, job_id: Uuid) -> anyhow::Result<Option<JobSnapshot>> {
        Ok(self.get_job(job_id).await?.map(|job| JobSnapshot::from(&job)))
    }

    /// Row counts grouped by status, for the admin metrics endpoint.
    pub async fn status_counts(&self) -> anyhow::Result<Vec<(String, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT status, COUNT(*)
            FROM snapshot_jobs
            GROUP BY status
            ORDER BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ----------------------------
    // Claim protocol
    // ----------------------------

    /// Claims exactly one runnable job for this worker.
    ///
    /// Correctness: `SELECT ... FOR UPDATE SKIP LOCKED` — concurrent claimers
    /// skip rows already locked by another transaction instead of blocking,
    /// so no two workers ever claim the same row. Ordering is FIFO by
    /// eligibility time (`next_run_at`, `created_at` tie-break); an empty
    /// queue returns None, not an error.
    pub async fn claim_next(&self, worker_id: &str) -> anyhow::Result<Option<ClaimedJob>> {
        let mut tx = self.pool.begin().await?;

        let candidate: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM snapshot_jobs
            WHERE status IN ('pending', 'retry_wait')
              AND next_run_at <= now()
            ORDER BY next_run_at ASC, created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job_id) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        // started_at is preserved across retries: only the first transition
        // into running stamps it.
        let claimed = sqlx::query_as::<_, ClaimedJob>(
            r#"
            UPDATE snapshot_jobs
            SET status = 'running',
                attempts = attempts + 1,
                locked_at = now(),
                lock_owner = $2,
                started_at = COALESCE(started_at, now()),
                updated_at = now()
            WHERE id = $1
            RETURNING id AS job_id, snapshot_id, attempts, max_attempts
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        self.telemetry.record_claim();
        Ok(Some(claimed))
    }

    // ----------------------------
    // Heartbeat
    // ----------------------------

    /// Refreshes `locked_at` for every running job owned by this worker,
    /// proving the owner is still alive so stale recovery leaves the rows
    /// alone. Returns the number of rows refreshed.
    pub async fn heartbeat(&self, worker_id: &str) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE snapshot_jobs
            SET locked_at = now(),
                updated_at = now()
            WHERE status = 'running'
              AND lock_owner = $1
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }
}
