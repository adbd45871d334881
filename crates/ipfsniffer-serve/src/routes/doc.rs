//! Single-document lookup.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::value::RawValue;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
struct DocResponse {
    id: String,
    doc: Box<RawValue>,
}

pub async fn get_doc(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = id.trim().to_string();
    if id.is_empty() {
        return Err(ApiError::BadRequest("missing doc id".into()));
    }

    match state.search.get_doc(&id).await? {
        Some(doc) => Ok(Json(DocResponse { id, doc })),
        None => Err(ApiError::NotFound),
    }
}
