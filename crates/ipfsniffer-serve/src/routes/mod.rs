//! API route definitions.
//!
//! - `GET /healthz` - liveness probe
//! - `GET /search` - full-text search with filters, paging, and sort
//! - `GET /doc/{id}` - single document by id

mod doc;
mod health;
mod search;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/search", get(search::search))
        .route("/doc/{id}", get(doc::get_doc))
        .with_state(state)
}
