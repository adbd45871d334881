//! Search endpoint: strict parameter parsing in front of the shared client.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::Json;

use ipfsniffer_index::query::SearchParams;
use ipfsniffer_index::SearchResult;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<SearchResult>, ApiError> {
    let params = parse_params(&params)?;
    let result = state.search.search(params).await?;
    Ok(Json(result))
}

/// Parse and validate query parameters.
///
/// Unparseable numbers and negative offsets are 400s; an oversized `size` is
/// clamped into the supported window. Sort validation happens in the client
/// so the write and read sides agree on the allowed fields.
fn parse_params(raw: &HashMap<String, String>) -> Result<SearchParams, ApiError> {
    let mut params = SearchParams {
        q: raw.get("q").cloned().unwrap_or_default(),
        root_cid: raw.get("root_cid").cloned().unwrap_or_default(),
        path: raw.get("path").cloned().unwrap_or_default(),
        mime: raw.get("mime").cloned().unwrap_or_default(),
        ext: raw.get("ext").cloned().unwrap_or_default(),
        source: raw.get("source").cloned().unwrap_or_default(),
        sort: raw.get("sort").cloned().unwrap_or_default(),
        from: 0,
        size: 20,
    };

    if let Some(from) = non_empty(raw, "from") {
        let from: i64 = from
            .parse()
            .map_err(|_| ApiError::BadRequest("from must be an integer".into()))?;
        if from < 0 {
            return Err(ApiError::BadRequest("from must be >= 0".into()));
        }
        params.from = from;
    }

    if let Some(size) = non_empty(raw, "size") {
        let size: i64 = size
            .parse()
            .map_err(|_| ApiError::BadRequest("size must be an integer".into()))?;
        // Clamped into [1, 100] rather than rejected.
        params.size = size.clamp(1, 100);
    }

    Ok(params)
}

fn non_empty<'a>(raw: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    raw.get(key).map(|s| s.trim()).filter(|s| !s.is_empty())
}
