use crate::jobs::telemetry::JobTelemetry;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Hard per-cycle ceiling, independent of the configured batch size, to keep
/// one cleanup transaction bounded.
const CLEANUP_HARD_CAP: i64 = 100;

/// Retention-based cleanup of terminal queue rows.
///
/// Only the queue bookkeeping rows are deleted; the snapshot domain rows are
/// part of the product contract and are never touched from here.
#[derive(Clone)]
pub struct MaintenanceRepo {
    pool: PgPool,
    telemetry: Arc<JobTelemetry>,
}

impl MaintenanceRepo {
    pub fn new(pool: PgPool, telemetry: Arc<JobTelemetry>) -> Self {
        Self { pool, telemetry }
    }

    /// Deletes one bounded batch of terminal jobs whose `finished_at` is older
    /// than `retention_hours`. Returns the number of rows deleted this cycle.
    pub async fn cleanup_terminal_once(
        &self,
        retention_hours: i64,
        batch_size: i64,
    ) -> anyhow::Result<u64> {
        let retention_hours = retention_hours.max(1);
        let effective_batch = batch_size.clamp(1, CLEANUP_HARD_CAP);

        let mut tx = self.pool.begin().await?;

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM snapshot_jobs
            WHERE status IN ('completed', 'failed')
              AND finished_at < now() - ($1::bigint * interval '1 hour')
            ORDER BY finished_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT $2
            "#,
        )
        .bind(retention_hours)
        .bind(effective_batch)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        let deleted = sqlx::query("DELETE FROM snapshot_jobs WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        self.telemetry.record_cleanup_deleted(deleted);
        println!(
            "snap_job_cleanup_deleted count={} retentionHours={} requestedBatchSize={} effectiveBatchSize={}",
            deleted, retention_hours, batch_size, effective_batch
        );

        Ok(deleted)
    }
}
