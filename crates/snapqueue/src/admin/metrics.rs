use crate::jobs::repo::JobsRepo;
use crate::jobs::telemetry::{JobTelemetry, TelemetrySnapshot};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AdminState {
    pub jobs: JobsRepo,
    pub telemetry: Arc<JobTelemetry>,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/metrics", get(metrics))
        .route("/admin/jobs/:id", get(job_snapshot))
        .with_state(state)
}

#[derive(Serialize)]
struct MetricsResponse {
    worker: TelemetrySnapshot,
    queue_by_status: BTreeMap<String, i64>,
}

/// Worker telemetry plus live row counts by status.
async fn metrics(
    State(st): State<AdminState>,
) -> Result<Json<MetricsResponse>, (StatusCode, String)> {
    let counts = st.jobs.status_counts().await.map_err(internal_err)?;

    Ok(Json(MetricsResponse {
        worker: st.telemetry.snapshot(),
        queue_by_status: counts.into_iter().collect(),
    }))
}

/// Processing-state introspection for one job.
async fn job_snapshot(
    State(st): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::jobs::model::JobSnapshot>, (StatusCode, String)> {
    let snapshot = st.jobs.job_snapshot(id).await.map_err(internal_err)?;
    match snapshot {
        Some(s) => Ok(Json(s)),
        None => Err((StatusCode::NOT_FOUND, format!("no job with id {id}"))),
    }
}

fn internal_err(e: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}"))
}
