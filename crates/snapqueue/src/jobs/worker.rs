use crate::config::Config;
use crate::jobs::exec::{ResultSink, SnapshotExecutor};
use crate::jobs::finalizer::Finalizer;
use crate::jobs::recovery::RecoveryService;
use crate::jobs::repo::JobsRepo;
use crate::jobs::retry::BackoffConfig;
use crate::jobs::telemetry::JobTelemetry;
use std::sync::Arc;
use std::time::Duration;

/// DB-polling worker loop for asynchronous snapshot processing.
///
/// Each cycle first recovers abandoned `running` rows, then claims up to
/// `batch_size` runnable jobs, executing each to completion through the
/// delegate and finalizing before the next claim. Within one worker the loop
/// is sequential on purpose; throughput comes from running more worker
/// instances, and the database row locks keep them from colliding.
pub struct PollWorker {
    jobs: JobsRepo,
    finalizer: Finalizer,
    recovery: RecoveryService,
    executor: Arc<dyn SnapshotExecutor>,
    sink: Arc<dyn ResultSink>,

    worker_id: String,
    batch_size: usize,
    poll_interval: Duration,
    enabled: bool,
}

impl PollWorker {
    pub fn new(
        cfg: &Config,
        pool: sqlx::PgPool,
        telemetry: Arc<JobTelemetry>,
        executor: Arc<dyn SnapshotExecutor>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let jobs = JobsRepo::with_telemetry(pool, telemetry.clone());
        let backoff = BackoffConfig::new(
            cfg.retry_base_seconds,
            cfg.retry_backoff_multiplier,
            cfg.retry_max_delay_seconds,
        );
        let finalizer = Finalizer::new(jobs.clone(), backoff.clone(), telemetry.clone());
        let recovery = RecoveryService::new(
            jobs.clone(),
            backoff,
            cfg.lock_timeout_seconds,
            telemetry,
        );

        Self {
            jobs,
            finalizer,
            recovery,
            executor,
            sink,
            worker_id: cfg.worker_instance_id.clone(),
            batch_size: cfg.batch_size.max(1),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            enabled: cfg.async_enabled && cfg.worker_enabled,
        }
    }

    pub fn jobs(&self) -> &JobsRepo {
        &self.jobs
    }

    pub fn recovery(&self) -> &RecoveryService {
        &self.recovery
    }

    /// Processes one deterministic cycle: recover stale jobs, then claim and
    /// execute up to `batch_size` jobs. Public so integration tests and tools
    /// can drive the queue without scheduler timing. Returns the number of
    /// jobs processed.
    ///
    /// Job-level failures are finalized locally and never escape; only store
    /// errors propagate, aborting the cycle to be retried on the next poll.
    pub async fn process_pending_once(&self) -> anyhow::Result<usize> {
        self.recovery.recover_stale_once().await?;

        let mut processed = 0;
        while processed < self.batch_size {
            let Some(claim) = self.jobs.claim_next(&self.worker_id).await? else {
                break;
            };
            processed += 1;

            match self.executor.execute(&claim).await {
                Ok(result) => {
                    self.finalizer
                        .finalize_success(&claim, &result, self.sink.as_ref())
                        .await?;
                }
                Err(err) => {
                    self.finalizer.finalize_failure(&claim, &err).await?;
                }
            }
        }

        Ok(processed)
    }

    /// Scheduled polling loop. Store errors are logged and the cycle retried
    /// after the normal interval. A disabled worker parks forever instead of
    /// returning, so sibling tasks (admin, cleanup, heartbeat) keep running.
    pub async fn run(&self) {
        if !self.enabled {
            println!("[{}] poll worker disabled by config; staying dormant", self.worker_id);
            std::future::pending::<()>().await;
        }

        loop {
            if let Err(e) = self.process_pending_once().await {
                eprintln!("[{}] poll cycle error: {e:#}", self.worker_id);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Heartbeat loop refreshing `locked_at` for this worker's in-flight
    /// jobs. Runs on its own schedule so one long delegate call cannot
    /// starve lock renewal.
    pub async fn run_heartbeat(&self, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            match self.recovery.heartbeat_once(&self.worker_id).await {
                Ok(0) => {}
                Ok(n) => println!("[{}] heartbeat refreshed {} running jobs", self.worker_id, n),
                Err(e) => eprintln!("[{}] heartbeat error: {e:#}", self.worker_id),
            }
        }
    }
}
