//! Session and inspection handlers.

use super::{ApiResult, AppState};
use crate::orchestrator::{GroupedInspectRequest, InspectRequest, InspectionResponse};
use crate::session::SessionSummary;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub product_id: String,
    #[serde(default)]
    pub client_info: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<Json<CreateSessionResponse>> {
    let session = state
        .sessions
        .create(&request.product_id, request.client_info)?;
    Ok(Json(CreateSessionResponse {
        session_id: session.id,
    }))
}

pub async fn destroy_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.sessions.destroy(id)?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

pub async fn list_sessions(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<SessionSummary>>> {
    Ok(Json(state.sessions.list()?))
}

pub async fn inspect(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<InspectRequest>,
) -> ApiResult<Json<InspectionResponse>> {
    let response = state.orchestrator.inspect(id, request).await?;
    Ok(Json(response))
}

pub async fn inspect_grouped(
    State(state): State<AppState>,
    Json(request): Json<GroupedInspectRequest>,
) -> ApiResult<Json<InspectionResponse>> {
    let response = state.orchestrator.inspect_grouped(request).await?;
    Ok(Json(response))
}

pub async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.sessions.count(),
    }))
}
