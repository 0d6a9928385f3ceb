//! API request handlers

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::types::*;
use crate::error::ErrorKind;
use crate::models::{DeploymentRequest, GuestId};
use crate::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Cancelled on server shutdown; running pipelines roll back
    pub shutdown: CancellationToken,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

// === Health ===

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// === Deploy ===

pub async fn deploy(
    State(state): State<AppState>,
    body: Result<Json<DeployRequest>, JsonRejection>,
) -> ApiResult<DeployResponse> {
    let Json(req) = body.map_err(bad_request)?;
    let request = DeploymentRequest::try_from(req).map_err(to_api_error)?;

    let orch = state.orchestrator.clone();
    let cancel = state.shutdown.child_token();
    let record = detached(async move { orch.deploy_with_cancel(request, cancel).await })
        .await?
        .map_err(to_api_error)?;
    Ok(Json(record.into()))
}

pub async fn deploy_all(
    State(state): State<AppState>,
    query: Result<Query<DeployAllQuery>, QueryRejection>,
) -> ApiResult<BatchResponse> {
    let Query(query) = query.map_err(bad_request)?;
    let orch = state.orchestrator.clone();
    let cancel = state.shutdown.child_token();
    let results = detached(async move { orch.deploy_all(query.kind, cancel).await }).await?;
    Ok(Json(BatchResponse { results }))
}

pub async fn active_deployments(State(state): State<AppState>) -> Json<ActiveResponse> {
    Json(ActiveResponse {
        deployments: state.orchestrator.active_deployments(),
    })
}

// === Inventory ===

pub async fn list(State(state): State<AppState>) -> ApiResult<ListResponse> {
    let containers = state.orchestrator.list().await.map_err(to_api_error)?;
    Ok(Json(ListResponse { containers }))
}

pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<GuestId>,
) -> ApiResult<crate::models::GuestStatus> {
    let status = state.orchestrator.status(id).await.map_err(to_api_error)?;
    Ok(Json(status))
}

pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<GuestId>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> ApiResult<LogsResponse> {
    let Query(query) = query.map_err(bad_request)?;
    let logs = state
        .orchestrator
        .logs(id, query.lines)
        .await
        .map_err(to_api_error)?;
    Ok(Json(LogsResponse { ctid: id, logs }))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<GuestId>,
) -> ApiResult<DeleteResponse> {
    let outcome = state.orchestrator.delete(id).await.map_err(to_api_error)?;
    Ok(Json(DeleteResponse {
        status: if outcome.existed { "deleted" } else { "absent" }.to_string(),
        ctid: outcome.ctid,
    }))
}

// === Frameworks ===

pub async fn frameworks(State(state): State<AppState>) -> Json<FrameworksResponse> {
    let frameworks = state
        .orchestrator
        .frameworks()
        .iter()
        .map(|f| {
            (
                f.key.clone(),
                FrameworkInfo {
                    name: f.display_name.clone(),
                    port: f.listen_port,
                    test_repo: f.default_source_repo.clone().unwrap_or_default(),
                },
            )
        })
        .collect();
    Json(FrameworksResponse { frameworks })
}

// === Helpers ===

/// Run `fut` on its own task so a dropped client connection cannot abandon
/// a pipeline between Create and rollback
async fn detached<F>(fut: F) -> Result<F::Output, (StatusCode, Json<ApiError>)>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(fut).await.map_err(|e| {
        tracing::error!(error = %e, "Deployment task failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                kind: ErrorKind::Internal,
                message: "deployment task aborted".to_string(),
                stage: None,
                output: None,
            }),
        )
    })
}

/// Unparseable request bodies and queries are validation errors
fn bad_request(rejection: impl std::fmt::Display) -> (StatusCode, Json<ApiError>) {
    to_api_error(crate::Error::Validation(rejection.to_string()))
}

pub(crate) fn to_api_error(e: crate::Error) -> (StatusCode, Json<ApiError>) {
    let kind = e.kind();
    let status = match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Capacity | ErrorKind::HypervisorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Cancelled => StatusCode::CONFLICT,
        ErrorKind::Provisioning | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ApiError {
            kind,
            message: e.to_string(),
            stage: e.stage(),
            output: e.output().map(str::to_string),
        }),
    )
}
