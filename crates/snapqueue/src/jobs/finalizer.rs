use crate::jobs::exec::{ExecError, ResultSink, SnapshotResult};
use crate::jobs::model::{ClaimedJob, JobStatus};
use crate::jobs::repo::JobsRepo;
use crate::jobs::retry::{retry_delay_seconds, BackoffConfig};
use crate::jobs::telemetry::JobTelemetry;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Upper bound for persisted error messages; keeps rows and log lines bounded.
const MAX_ERROR_LEN: usize = 4000;

/// Reported by finalize calls so callers can tell a real transition from an
/// idempotent no-op on an already-terminal row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Applied,
    AlreadyTerminal,
}

/// Commits terminal or retry outcomes back to the job store.
///
/// Each entry point runs one short transaction and re-reads the current row
/// under lock before writing, so re-invocation on the same job id is a no-op
/// once the row is terminal.
#[derive(Clone)]
pub struct Finalizer {
    jobs: JobsRepo,
    backoff: BackoffConfig,
    telemetry: Arc<JobTelemetry>,
}

impl Finalizer {
    pub fn new(jobs: JobsRepo, backoff: BackoffConfig, telemetry: Arc<JobTelemetry>) -> Self {
        Self {
            jobs,
            backoff,
            telemetry,
        }
    }

    /// Persists a successful execution: hands the result to the domain sink,
    /// then marks the job `completed` and clears lock and error fields.
    pub async fn finalize_success(
        &self,
        claim: &ClaimedJob,
        result: &SnapshotResult,
        sink: &dyn ResultSink,
    ) -> anyhow::Result<FinalizeOutcome> {
        let mut tx = self.jobs.pool().begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM snapshot_jobs WHERE id = $1 FOR UPDATE")
                .bind(claim.job_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(status) = current else {
            anyhow::bail!("job not found while finalizing: {}", claim.job_id);
        };
        if JobStatus::parse(&status).is_some_and(|s| s.is_terminal()) {
            tx.commit().await?;
            return Ok(FinalizeOutcome::AlreadyTerminal);
        }

        // The business result belongs to the domain layer; the queue row only
        // records that the work is done.
        sink.persist(claim.snapshot_id, result).await?;

        let (started_at, finished_at): (Option<DateTime<Utc>>, DateTime<Utc>) = sqlx::query_as(
            r#"
            UPDATE snapshot_jobs
            SET status = 'completed',
                finished_at = now(),
                locked_at = NULL,
                lock_owner = NULL,
                last_error = NULL,
                updated_at = now()
            WHERE id = $1
            RETURNING started_at, finished_at
            "#,
        )
        .bind(claim.job_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let duration_ms = terminal_duration_ms(started_at, finished_at);
        self.telemetry.record_terminal("completed", duration_ms);
        println!(
            "snap_job_completed jobId={} snapshotId={} attempts={} durationMs={}",
            claim.job_id, claim.snapshot_id, claim.attempts, duration_ms
        );

        Ok(FinalizeOutcome::Applied)
    }

    /// Persists a failed execution: reschedules with backoff when the error is
    /// retryable and attempts remain, otherwise marks the job `failed`.
    /// `last_error` is updated either way for diagnostics.
    pub async fn finalize_failure(
        &self,
        claim: &ClaimedJob,
        error: &ExecError,
    ) -> anyhow::Result<FinalizeOutcome> {
        let message = truncate_error(&error.to_string());

        let mut tx = self.jobs.pool().begin().await?;

        let current: Option<(String, i32, i32)> = sqlx::query_as(
            "SELECT status, attempts, max_attempts FROM snapshot_jobs WHERE id = $1 FOR UPDATE",
        )
        .bind(claim.job_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((status, attempts, max_attempts)) = current else {
            anyhow::bail!("job not found while handling failure: {}", claim.job_id);
        };
        if JobStatus::parse(&status).is_some_and(|s| s.is_terminal()) {
            tx.commit().await?;
            return Ok(FinalizeOutcome::AlreadyTerminal);
        }

        let can_retry = error.is_retryable() && attempts < max_attempts;

        if can_retry {
            let delay_secs = retry_delay_seconds(attempts, &self.backoff);
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
            .bind(claim.job_id)
            .bind(delay_secs)
            .bind(&message)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            self.telemetry.record_retry_scheduled();
            println!(
                "snap_job_failed jobId={} snapshotId={} attempts={} maxAttempts={} retryScheduled=true delaySecs={} error={}",
                claim.job_id, claim.snapshot_id, attempts, max_attempts, delay_secs, message
            );
        } else {
            let (started_at, finished_at): (Option<DateTime<Utc>>, DateTime<Utc>) = sqlx::query_as(
                r#"
                UPDATE snapshot_jobs
                SET status = 'failed',
                    finished_at = now(),
                    locked_at = NULL,
                    lock_owner = NULL,
                    last_error = $2,
                    updated_at = now()
                WHERE id = $1
                RETURNING started_at, finished_at
                "#,
            )
            .bind(claim.job_id)
            .bind(&message)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;

            let duration_ms = terminal_duration_ms(started_at, finished_at);
            self.telemetry.record_terminal("failed", duration_ms);
            eprintln!(
                "snap_job_failed jobId={} snapshotId={} attempts={} maxAttempts={} retryScheduled=false durationMs={} error={}",
                claim.job_id, claim.snapshot_id, attempts, max_attempts, duration_ms, message
            );
        }

        Ok(FinalizeOutcome::Applied)
    }
}

/// Terminal duration spans the job's whole lifetime, from the first transition
/// into `running` to the terminal transition, including retry waits.
pub(crate) fn terminal_duration_ms(
    started_at: Option<DateTime<Utc>>,
    finished_at: DateTime<Utc>,
) -> u64 {
    match started_at {
        Some(started) => (finished_at - started).num_milliseconds().max(0) as u64,
        None => 0,
    }
}

/// Flattens newlines and bounds the length before persistence/logging.
pub(crate) fn truncate_error(message: &str) -> String {
    let compact: String = message
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if compact.chars().count() <= MAX_ERROR_LEN {
        compact
    } else {
        compact.chars().take(MAX_ERROR_LEN).collect()
    }
}
