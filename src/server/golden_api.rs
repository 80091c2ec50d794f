//! Golden sample CRUD handlers.
//!
//! Thin wrappers over [`GoldenStore`]: every mutation goes through the
//! store's per-ROI mutex and preserves the `best_golden.jpg` invariant.
//! Returned sample paths are expressed against the client mount, where the
//! golden tree appears under `<mount>/golden/` via the shared symlink.
//!
//! [`GoldenStore`]: crate::golden::GoldenStore

use super::{ApiResult, AppState};
use crate::golden::{GoldenSample, SampleRole};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct SampleMetadata {
    pub name: String,
    pub role: SampleRole,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub client_path: String,
}

fn metadata_of(state: &AppState, product: &str, idx: u32, sample: &GoldenSample) -> SampleMetadata {
    SampleMetadata {
        name: sample.name.clone(),
        role: sample.role,
        size: sample.size,
        modified: DateTime::<Utc>::from(sample.modified),
        client_path: format!(
            "{}/golden/{product}/golden_rois/roi_{idx}/{}",
            state.settings.client_mount_prefix.trim_end_matches('/'),
            sample.name
        ),
    }
}

pub async fn list_products(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.store.list_products()?))
}

pub async fn list_rois(
    State(state): State<AppState>,
    Path(product): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let rois = state.store.list_rois(&product)?;
    Ok(Json(serde_json::json!({ "product_id": product, "rois": rois })))
}

pub async fn list_samples(
    State(state): State<AppState>,
    Path((product, idx)): Path<(String, u32)>,
) -> ApiResult<Json<Vec<SampleMetadata>>> {
    let samples = state.store.list(&product, idx)?;
    Ok(Json(
        samples
            .iter()
            .map(|s| metadata_of(&state, &product, idx, s))
            .collect(),
    ))
}

pub async fn download_sample(
    State(state): State<AppState>,
    Path((product, idx, name)): Path<(String, u32, String)>,
) -> ApiResult<impl IntoResponse> {
    let bytes = state.store.read_sample(&product, idx, &name).await?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes))
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub as_best: bool,
}

pub async fn upload_sample(
    State(state): State<AppState>,
    Path((product, idx)): Path<(String, u32)>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let name = state
        .store
        .upload(&product, idx, &body, query.as_best)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "name": name, "as_best": query.as_best })),
    ))
}

pub async fn promote_sample(
    State(state): State<AppState>,
    Path((product, idx, name)): Path<(String, u32, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.promote(&product, idx, &name).await?;
    Ok(Json(serde_json::json!({ "status": "promoted" })))
}

pub async fn restore_sample(
    State(state): State<AppState>,
    Path((product, idx, name)): Path<(String, u32, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.restore(&product, idx, &name).await?;
    Ok(Json(serde_json::json!({ "status": "restored" })))
}

pub async fn delete_sample(
    State(state): State<AppState>,
    Path((product, idx, name)): Path<(String, u32, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.delete(&product, idx, &name).await?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}
