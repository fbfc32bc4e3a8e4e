pub mod exec;
pub mod finalizer;
pub mod maintenance;
pub mod model;
pub mod recovery;
pub mod repo;
pub mod retry;
pub mod telemetry;
pub mod worker;

pub use exec::{ExecError, ResultSink, SnapshotExecutor, SnapshotResult};
pub use finalizer::{FinalizeOutcome, Finalizer};
pub use maintenance::MaintenanceRepo;
pub use model::{ClaimedJob, EnqueueOutcome, Job, JobSnapshot, JobStatus};
pub use recovery::RecoveryService;
pub use repo::JobsRepo;
pub use retry::BackoffConfig;
pub use telemetry::{JobTelemetry, TelemetrySnapshot};
pub use worker::PollWorker;
