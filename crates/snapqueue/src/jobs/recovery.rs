use crate::jobs::exec::ExecError;
use crate::jobs::finalizer::{terminal_duration_ms, truncate_error};
use crate::jobs::repo::JobsRepo;
use crate::jobs::retry::{retry_delay_seconds, BackoffConfig};
use crate::jobs::telemetry::JobTelemetry;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Reclaims `running` jobs whose owner stopped heartbeating.
///
/// A stale lock is an infrastructure failure, not a job failure, so recovery
/// routes each abandoned row through the same retry-or-terminal decision as
/// an execution failure, with a synthetic lock-timeout error. Together with
/// the heartbeat this makes the queue self-healing across worker crashes and
/// restarts without operator intervention.
#[derive(Clone)]
pub struct RecoveryService {
    jobs: JobsRepo,
    backoff: BackoffConfig,
    lock_timeout_seconds: i64,
    telemetry: Arc<JobTelemetry>,
}

#[derive(sqlx::FromRow)]
struct StaleRow {
    id: Uuid,
    snapshot_id: Uuid,
    attempts: i32,
    max_attempts: i32,
    started_at: Option<DateTime<Utc>>,
}

/// Committed disposition of one recovered row; `duration_ms` is set only for
/// terminal failures.
struct RecoveredOutcome {
    id: Uuid,
    snapshot_id: Uuid,
    attempts: i32,
    max_attempts: i32,
    can_retry: bool,
    duration_ms: Option<u64>,
}

impl RecoveryService {
    pub fn new(
        jobs: JobsRepo,
        backoff: BackoffConfig,
        lock_timeout_seconds: i64,
        telemetry: Arc<JobTelemetry>,
    ) -> Self {
        Self {
            jobs,
            backoff,
            lock_timeout_seconds: lock_timeout_seconds.max(1),
            telemetry,
        }
    }

    /// One recovery sweep; returns the number of stale jobs recovered.
    ///
    /// Runs in a single transaction. `SKIP LOCKED` keeps concurrent sweeps
    /// from other workers out of each other's way. Telemetry and log lines
    /// are emitted only after the commit, so an aborted sweep leaves the
    /// counters untouched.
    pub async fn recover_stale_once(&self) -> anyhow::Result<u64> {
        let stale_error = truncate_error(&ExecError::LockTimeout.to_string());

        let mut tx = self.jobs.pool().begin().await?;

        let stale: Vec<StaleRow> = sqlx::query_as(
            r#"
            SELECT id, snapshot_id, attempts, max_attempts, started_at
            FROM snapshot_jobs
            WHERE status = 'running'
              AND locked_at < now() - ($1::bigint * interval '1 second')
            ORDER BY locked_at ASC
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(self.lock_timeout_seconds)
        .fetch_all(&mut *tx)
        .await?;

        let mut outcomes: Vec<RecoveredOutcome> = Vec::with_capacity(stale.len());
        for row in stale {
            // Same decision as a finalizer failure: the synthetic lock-timeout
            // error is retryable, so only exhausted attempts go terminal.
            let can_retry = row.attempts < row.max_attempts;

            let duration_ms = if can_retry {
                let delay_secs = retry_delay_seconds(row.attempts, &self.backoff);
                sqlx::query(
                    r#"
                    UPDATE snapshot_jobs
                    SET status = 'retry_wait',
                        next_run_at = now() + ($2::bigint * interval '1 second'),
                        finished_at = NULL,
                        locked_at = NULL,
                        lock_owner = NULL,
                        last_error = $3,
                        updated_at = now()
                    WHERE id = $1
                    "#,
                )
                .bind(row.id)
                .bind(delay_secs)
                .bind(&stale_error)
                .execute(&mut *tx)
                .await?;

                None
            } else {
                let finished_at: DateTime<Utc> = sqlx::query_scalar(
                    r#"
                    UPDATE snapshot_jobs
                    SET status = 'failed',
                        finished_at = now(),
                        locked_at = NULL,
                        lock_owner = NULL,
                        last_error = $2,
                        updated_at = now()
                    WHERE id = $1
                    RETURNING finished_at
                    "#,
                )
                .bind(row.id)
                .bind(&stale_error)
                .fetch_one(&mut *tx)
                .await?;

                Some(terminal_duration_ms(row.started_at, finished_at))
            };

            outcomes.push(RecoveredOutcome {
                id: row.id,
                snapshot_id: row.snapshot_id,
                attempts: row.attempts,
                max_attempts: row.max_attempts,
                can_retry,
                duration_ms,
            });
        }

        tx.commit().await?;

        for outcome in &outcomes {
            self.telemetry.record_stale_recovered();
            match outcome.duration_ms {
                None => self.telemetry.record_retry_scheduled(),
                Some(duration_ms) => self.telemetry.record_terminal("failed", duration_ms),
            }

            eprintln!(
                "snap_job_stale_recovered jobId={} snapshotId={} canRetry={} attempts={} maxAttempts={}",
                outcome.id,
                outcome.snapshot_id,
                outcome.can_retry,
                outcome.attempts,
                outcome.max_attempts
            );
        }

        Ok(outcomes.len() as u64)
    }

    /// One heartbeat cycle for this worker's in-flight jobs.
    pub async fn heartbeat_once(&self, worker_id: &str) -> anyhow::Result<u64> {
        self.jobs.heartbeat(worker_id).await
    }
}
