use snapqueue::admin;
use snapqueue::config::Config;
use snapqueue::db;
use snapqueue::jobs::maintenance::MaintenanceRepo;
use snapqueue::jobs::repo::JobsRepo;
use snapqueue::jobs::telemetry::JobTelemetry;
use snapqueue::jobs::worker::PollWorker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod handlers;
use handlers::{FfprobeExecutor, LogResultSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;

    println!(
        "snapqueue worker starting... worker_id={} async_enabled={} worker_enabled={} \
         poll_interval_ms={} batch_size={} max_attempts={} lock_timeout_s={} heartbeat_ms={} \
         cleanup_enabled={} retention_hours={} admin={} migrate_on_startup={}",
        cfg.worker_instance_id,
        cfg.async_enabled,
        cfg.worker_enabled,
        cfg.poll_interval_ms,
        cfg.batch_size,
        cfg.max_attempts,
        cfg.lock_timeout_seconds,
        cfg.heartbeat_interval_ms,
        cfg.cleanup_enabled,
        cfg.retention_hours,
        cfg.admin_addr.clone().unwrap_or_else(|| "disabled".to_string()),
        cfg.migrate_on_startup,
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let telemetry = Arc::new(JobTelemetry::new());

    let media_root = std::env::var("SNAPQ_MEDIA_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./media"));
    let exec_timeout_secs: u64 = std::env::var("SNAPQ_EXEC_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(300);

    let executor = Arc::new(FfprobeExecutor::new(
        media_root,
        Duration::from_secs(exec_timeout_secs),
    ));
    let sink = Arc::new(LogResultSink);

    let worker = Arc::new(PollWorker::new(
        &cfg,
        pool.clone(),
        telemetry.clone(),
        executor,
        sink,
    ));

    // ---- Admin API task ----
    let admin_addr = cfg.admin_addr.clone();
    let admin_state = admin::AdminState {
        jobs: JobsRepo::with_telemetry(pool.clone(), telemetry.clone()),
        telemetry: telemetry.clone(),
    };
    let admin_handle = tokio::spawn(async move {
        if let Some(addr) = admin_addr {
            let app = admin::router(admin_state);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            println!("admin api listening on http://{addr}");
            axum::serve(listener, app).await?;
        } else {
            std::future::pending::<()>().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    // ---- Cleanup task ----
    let cleanup_handle = {
        let maintenance = MaintenanceRepo::new(pool.clone(), telemetry.clone());
        let enabled = cfg.cleanup_enabled;
        let interval = Duration::from_millis(cfg.cleanup_interval_ms);
        let retention_hours = cfg.retention_hours;
        let batch_size = cfg.cleanup_batch_size;

        tokio::spawn(async move {
            if !enabled {
                std::future::pending::<()>().await;
            }
            loop {
                if let Err(e) = maintenance
                    .cleanup_terminal_once(retention_hours, batch_size)
                    .await
                {
                    eprintln!("[cleanup] error: {e:#}");
                }
                tokio::time::sleep(interval).await;
            }
        })
    };

    // ---- Heartbeat task ----
    // Separate from the poll loop so one long ffprobe call cannot starve
    // lock renewal.
    let heartbeat_handle = {
        let worker = worker.clone();
        let interval = Duration::from_millis(cfg.heartbeat_interval_ms);
        tokio::spawn(async move {
            worker.run_heartbeat(interval).await;
        })
    };

    // ---- Poll loop task ----
    let worker_handle = {
        let worker = worker.clone();
        tokio::spawn(async move {
            worker.run().await;
        })
    };

    tokio::select! {
        res = admin_handle => res??,
        res = cleanup_handle => res?,
        res = heartbeat_handle => res?,
        res = worker_handle => res?,
    }

    Ok(())
}
