use crate::jobs::model::ClaimedJob;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failure modes of snapshot execution, as a closed set.
///
/// The queue decides retry-vs-terminal from the variant alone; deterministic
/// errors (bad input, missing referenced snapshot) are fatal because retrying
/// cannot change the outcome, everything else is presumed transient.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("snapshot not found: {0}")]
    MissingSnapshot(Uuid),

    #[error("external tool failed: {0}")]
    Tool(String),

    #[error("execution timed out: {0}")]
    Timeout(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Synthetic error used by stale-lock recovery; the job's owner stopped
    /// heartbeating, which says nothing about the job itself.
    #[error("recovered stale running job after lock timeout")]
    LockTimeout,
}

impl ExecError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecError::InvalidInput(_) | ExecError::MissingSnapshot(_) => false,
            ExecError::Tool(_) | ExecError::Timeout(_) | ExecError::Io(_) => true,
            ExecError::LockTimeout => true,
        }
    }
}

/// Business result handed back by the execution delegate on success.
///
/// The queue never interprets or stores this; it flows straight to the
/// result sink.
#[derive(Debug, Clone)]
pub struct SnapshotResult {
    pub snapshot_id: Uuid,
    pub probe: Value,
    pub frame_count: i32,
    pub output_dir: String,
}

/// Execution delegate: performs the actual unit of work for one claimed job.
///
/// Called at most once per claim attempt; the queue does not retry beyond
/// what the finalizer schedules. The call may block for the duration of the
/// external operation.
pub trait SnapshotExecutor: Send + Sync {
    fn execute<'a>(&'a self, job: &'a ClaimedJob) -> BoxFuture<'a, Result<SnapshotResult, ExecError>>;
}

/// Domain-persistence collaborator that receives successful results.
pub trait ResultSink: Send + Sync {
    fn persist<'a>(
        &'a self,
        snapshot_id: Uuid,
        result: &'a SnapshotResult,
    ) -> BoxFuture<'a, anyhow::Result<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_errors_are_fatal() {
        assert!(!ExecError::InvalidInput("bad fps".into()).is_retryable());
        assert!(!ExecError::MissingSnapshot(Uuid::nil()).is_retryable());
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(ExecError::Tool("ffprobe exited with 1".into()).is_retryable());
        assert!(ExecError::Timeout("after 30s".into()).is_retryable());
        assert!(ExecError::LockTimeout.is_retryable());
        let io = ExecError::from(std::io::Error::new(std::io::ErrorKind::Other, "pipe"));
        assert!(io.is_retryable());
    }
}
