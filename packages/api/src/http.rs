//! HTTP routes in front of the job splitter.

use actors::AppContext;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use render_core::{JobView, SubmitRequest};
use serde::Serialize;

use crate::jobs::{ApiResponse, submit_job};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn submit(
    State(ctx): State<AppContext>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResponse {
    match payload {
        Ok(Json(request)) => submit_job(&ctx, request).await.into(),
        Err(rejection) => ApiResponse::bad_request(rejection.body_text()),
    }
}

async fn job_status(State(ctx): State<AppContext>, Path(file): Path<String>) -> ApiResponse {
    match ctx.jobs.status(&file).await {
        Ok(JobView::Known(progress)) => ApiResponse::ok(progress.to_string()),
        Ok(JobView::Unknown) => ApiResponse {
            status: axum::http::StatusCode::NOT_FOUND,
            body: format!("Not Found: no job for {file}"),
        },
        Err(e) => {
            tracing::warn!("Status lookup for {} failed: {}", file, e);
            ApiResponse::internal_error(e)
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (self.status, self.body).into_response()
    }
}

/// Routes served by a node.
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/jobs", post(submit))
        .route("/api/jobs/{file}", get(job_status))
        .with_state(ctx)
}
