use std::net::SocketAddr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::RunnerError;
use crate::scheduler::job::{JobOutcome, JobRecord, ResourceUsage, Verdict};
use crate::scheduler::{JobDescriptor, JobStatus, Submitter};

#[derive(Clone)]
pub struct ApiState {
    pub submitter: Submitter,
}

impl ApiState {
    pub fn new(submitter: Submitter) -> Self {
        Self { submitter }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub code: String,
    #[serde(default)]
    pub stdin: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    job_id: String,
    status: JobStatus,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    detail: String,
}

/// Flat JSON shape of a job record as served to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobView {
    pub job_id: String,
    pub status: JobStatus,
    pub slot_id: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_diagnostic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResourceUsage>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&JobRecord> for JobView {
    fn from(record: &JobRecord) -> Self {
        let mut view = JobView {
            job_id: record.id.to_string(),
            status: record.status,
            slot_id: record.slot_id,
            stdout: None,
            stderr: None,
            compile_error: None,
            sandbox_diagnostic: None,
            internal_error: None,
            verdict: None,
            usage: None,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
        };

        match &record.outcome {
            Some(JobOutcome::Finished {
                stdout,
                stderr,
                sandbox_diagnostic,
                verdict,
                usage,
            }) => {
                view.stdout = Some(stdout.clone());
                view.stderr = Some(stderr.clone());
                view.compile_error = Some(String::new());
                view.sandbox_diagnostic = Some(sandbox_diagnostic.clone());
                view.verdict = Some(*verdict);
                view.usage = Some(*usage);
            }
            Some(JobOutcome::CompileFailed { compile_error }) => {
                view.compile_error = Some(compile_error.clone());
            }
            Some(JobOutcome::SandboxInitFailed { sandbox_diagnostic }) => {
                view.sandbox_diagnostic = Some(sandbox_diagnostic.clone());
            }
            Some(JobOutcome::InternalError { message }) => {
                view.internal_error = Some(message.clone());
            }
            None => {}
        }
        view
    }
}

fn error_response(status: StatusCode, detail: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            detail: detail.to_string(),
        }),
    )
        .into_response()
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/run_c", post(submit_handler))
        .route("/jobs", get(list_jobs_handler))
        .route("/jobs/{job_id}", get(job_status_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve the HTTP API until `shutdown` is cancelled.
pub async fn run_api(
    addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!(addr = %addr, error = %e, "Failed to bind API server");
        e
    })?;

    tracing::info!(addr = %addr, "Starting API server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

async fn index_handler() -> Json<&'static str> {
    Json("Connected")
}

async fn submit_handler(
    State(state): State<ApiState>,
    Json(payload): Json<SubmitRequest>,
) -> Response {
    let descriptor = JobDescriptor {
        code: payload.code,
        stdin: payload.stdin,
    };

    match state.submitter.submit(descriptor).await {
        Ok(job_id) => (
            StatusCode::OK,
            Json(SubmitResponse {
                job_id: job_id.to_string(),
                status: JobStatus::Queued,
            }),
        )
            .into_response(),
        Err(RunnerError::QueueFull { .. }) => {
            error_response(StatusCode::TOO_MANY_REQUESTS, "Server queue is full")
        }
        Err(RunnerError::ShuttingDown) | Err(RunnerError::StoreClosed) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down")
        }
        Err(e) => {
            tracing::error!(error = %e, "Job submission failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Job submission failed")
        }
    }
}

async fn job_status_handler(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&job_id) else {
        return error_response(StatusCode::NOT_FOUND, "Job not found");
    };

    match state.submitter.status(&id).await {
        Some(record) => Json(JobView::from(&record)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Job not found"),
    }
}

async fn list_jobs_handler(State(state): State<ApiState>) -> Json<Vec<JobView>> {
    let jobs = state
        .submitter
        .list()
        .await
        .iter()
        .map(JobView::from)
        .collect();
    Json(jobs)
}
