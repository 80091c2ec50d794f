//! HTTP surface: a thin axum adapter over the inspection core.
//!
//! Handlers deserialize, call into the core, and map `AoiError` classes to
//! status codes. No inspection logic lives here.

pub mod golden_api;
pub mod routes;

use crate::config::Settings;
use crate::error::AoiError;
use crate::golden::GoldenStore;
use crate::orchestrator::Orchestrator;
use crate::session::SessionManager;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Upper bound on request bodies; inline base64 frames and golden uploads
/// fit comfortably, runaway payloads do not.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub sessions: Arc<SessionManager>,
    pub store: Arc<GoldenStore>,
    pub orchestrator: Arc<Orchestrator>,
}

/// Error wrapper giving `AoiError` an HTTP projection.
pub struct ApiError(pub AoiError);

impl From<AoiError> for ApiError {
    fn from(err: AoiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AoiError::SessionUnknown(_)
            | AoiError::ProductUnknown(_)
            | AoiError::GoldenNotFound(_) => StatusCode::NOT_FOUND,
            AoiError::SourceNotFound(_)
            | AoiError::SourceUnreadable(_)
            | AoiError::SourceMalformed(_)
            | AoiError::SourceMissing
            | AoiError::ConfigInvalid { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Builds the full route table.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/sessions", get(routes::list_sessions))
        .route("/session", post(routes::create_session))
        .route("/session/:id", delete(routes::destroy_session))
        .route("/session/:id/inspect", post(routes::inspect))
        .route("/process_grouped_inspection", post(routes::inspect_grouped))
        .route("/golden/products", get(golden_api::list_products))
        .route("/golden/:product", get(golden_api::list_rois))
        .route(
            "/golden/:product/:idx",
            get(golden_api::list_samples).post(golden_api::upload_sample),
        )
        .route(
            "/golden/:product/:idx/:name",
            get(golden_api::download_sample).delete(golden_api::delete_sample),
        )
        .route(
            "/golden/:product/:idx/:name/promote",
            post(golden_api::promote_sample),
        )
        .route(
            "/golden/:product/:idx/:name/restore",
            post(golden_api::restore_sample),
        )
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}
