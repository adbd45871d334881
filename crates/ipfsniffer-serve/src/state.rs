//! Shared application state.

use std::sync::Arc;

use ipfsniffer_index::SearchClient;

/// State available to every request handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub search: Arc<SearchClient>,
}

impl AppState {
    pub fn new(search: SearchClient) -> AppState {
        AppState { search: Arc::new(search) }
    }
}
