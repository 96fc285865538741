use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::api::signature::verify_signature;
use crate::error::AppError;
use crate::model::{CostAnomaly, TenantContext, WorkflowState};
use crate::server::AppState;
use crate::workflow::{ApprovalDecision, RunStatus};

#[derive(Debug, Deserialize)]
pub struct StartWorkflowRequest {
    pub tenant: TenantContext,
    pub anomaly: Option<CostAnomaly>,
}

/// Accept an anomaly and kick off a run. The run proceeds in the background;
/// its id is enough to follow it through the inspection endpoints.
pub async fn start_workflow(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartWorkflowRequest>,
) -> Response {
    let run = WorkflowState::new(request.tenant, request.anomaly);
    let workflow_id = run.workflow_id.clone();

    let engine = Arc::clone(&state.engine);
    tokio::spawn(async move {
        if let Err(e) = engine.start(run).await {
            tracing::error!(error = %e, "Workflow run failed");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({ "workflow_id": workflow_id })),
    )
        .into_response()
}

pub async fn list_workflows(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.store().list().await {
        Ok(runs) => Json(runs).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list workflows");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
) -> Response {
    match state.engine.store().load(&workflow_id).await {
        Ok(Some(checkpoint)) => Json(checkpoint.state).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to load workflow");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApprovalCallback {
    by: String,
}

pub async fn approve_workflow(
    state: State<Arc<AppState>>,
    path: Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    resolve_approval(state, path, headers, body, true).await
}

pub async fn deny_workflow(
    state: State<Arc<AppState>>,
    path: Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    resolve_approval(state, path, headers, body, false).await
}

/// Shared approve/deny path: verify the callback signature when a secret is
/// configured, then resume the suspended run with the decision.
async fn resolve_approval(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
    approve: bool,
) -> Response {
    if let Some(secret) = state.config.callback_secret() {
        let signature = match headers.get("x-signature-256").and_then(|v| v.to_str().ok()) {
            Some(sig) => sig,
            None => {
                tracing::warn!("Missing X-Signature-256 header on approval callback");
                return StatusCode::UNAUTHORIZED.into_response();
            }
        };
        if let Err(e) = verify_signature(secret, &body, signature) {
            tracing::warn!(error = %e, "Approval callback signature verification failed");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let callback: ApprovalCallback = match serde_json::from_slice(&body) {
        Ok(callback) => callback,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed approval callback body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let decision = ApprovalDecision {
        approve,
        by: callback.by,
    };

    match state.engine.resume(&workflow_id, decision).await {
        Ok(outcome) => {
            let status = match outcome.status {
                RunStatus::Completed => "completed",
                RunStatus::Suspended => "suspended",
            };
            Json(json!({
                "workflow_id": workflow_id,
                "status": status,
                "approval": outcome.state.approval,
                "current_phase": outcome.state.current_phase,
            }))
            .into_response()
        }
        // resumed twice, or never suspended: the first decision stands
        Err(AppError::Workflow(msg)) => {
            (StatusCode::CONFLICT, Json(json!({ "error": msg }))).into_response()
        }
        Err(AppError::Store(msg)) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": msg }))).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to resume workflow");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn health_check() -> &'static str {
    "ok"
}
