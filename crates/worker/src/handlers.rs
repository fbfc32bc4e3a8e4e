use serde_json::Value;
use snapqueue::jobs::exec::{BoxFuture, ExecError, ResultSink, SnapshotExecutor, SnapshotResult};
use snapqueue::jobs::model::ClaimedJob;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use uuid::Uuid;

/// Execution delegate that probes the snapshot's source media with ffprobe.
///
/// Demo wiring: source files are resolved as `<media_root>/<snapshot_id>.mp4`.
/// A real deployment replaces the lookup with the domain layer's storage
/// resolution; the queue core only ever sees the trait.
pub struct FfprobeExecutor {
    media_root: PathBuf,
    timeout: Duration,
}

impl FfprobeExecutor {
    pub fn new(media_root: PathBuf, timeout: Duration) -> Self {
        Self { media_root, timeout }
    }

    async fn probe(&self, job: &ClaimedJob) -> Result<SnapshotResult, ExecError> {
        let source = self.media_root.join(format!("{}.mp4", job.snapshot_id));
        if !source.exists() {
            return Err(ExecError::MissingSnapshot(job.snapshot_id));
        }

        let output = Command::new("ffprobe")
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(&source)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecError::Tool(format!(
                "ffprobe exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let probe: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ExecError::Tool(format!("unparseable ffprobe output: {e}")))?;

        let frame_count = probe
            .get("streams")
            .and_then(|s| s.get(0))
            .and_then(|s| s.get("nb_frames"))
            .and_then(|n| n.as_str())
            .and_then(|n| n.parse::<i32>().ok())
            .unwrap_or(0);

        Ok(SnapshotResult {
            snapshot_id: job.snapshot_id,
            probe,
            frame_count,
            output_dir: source
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        })
    }
}

impl SnapshotExecutor for FfprobeExecutor {
    fn execute<'a>(
        &'a self,
        job: &'a ClaimedJob,
    ) -> BoxFuture<'a, Result<SnapshotResult, ExecError>> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, self.probe(job)).await {
                Ok(res) => res,
                Err(_) => Err(ExecError::Timeout(format!(
                    "ffprobe exceeded {}ms",
                    self.timeout.as_millis()
                ))),
            }
        })
    }
}

/// Stand-in for the domain persistence layer: acknowledges results without
/// storing them. A real deployment writes the probe back onto the snapshot
/// row and uploads artifacts.
pub struct LogResultSink;

impl ResultSink for LogResultSink {
    fn persist<'a>(
        &'a self,
        snapshot_id: Uuid,
        result: &'a SnapshotResult,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            println!(
                "snap_result_persisted snapshotId={} frameCount={} outputDir={}",
                snapshot_id, result.frame_count, result.output_dir
            );
            Ok(())
        })
    }
}
