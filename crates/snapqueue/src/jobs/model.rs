use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One row of the `snapshot_jobs` queue table.
///
/// The snapshot domain row referenced by `snapshot_id` is the public source
/// of truth; this row only tracks worker scheduling and execution lifecycle.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub snapshot_id: Uuid,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_run_at: DateTime<Utc>,

    pub locked_at: Option<DateTime<Utc>>,
    pub lock_owner: Option<String>,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    RetryWait,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::RetryWait => "retry_wait",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "retry_wait" => Some(JobStatus::RetryWait),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Terminal rows never transition again; only cleanup may delete them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Compact value-type projection returned by a successful claim.
///
/// Later stages (delegate execution, finalization) receive this instead of a
/// live row so no state is mutated outside an explicit transaction.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct ClaimedJob {
    pub job_id: Uuid,
    pub snapshot_id: Uuid,
    pub attempts: i32,
    pub max_attempts: i32,
}

/// Read-path projection surfaced by introspection APIs.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub snapshot_id: Uuid,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_run_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            snapshot_id: job.snapshot_id,
            status: job.status.clone(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            next_run_at: job.next_run_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            last_error: job.last_error.clone(),
        }
    }
}

/// Result of an idempotent enqueue: either a fresh job or the id of the job
/// that already covers this snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created(Uuid),
    AlreadyQueued(Uuid),
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueOutcome::Created(id) | EnqueueOutcome::AlreadyQueued(id) => *id,
        }
    }
}
