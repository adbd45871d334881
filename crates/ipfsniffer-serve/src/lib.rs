//! Read-only HTTP query API over the IPFSniffer index.
//!
//! Three endpoints: `/healthz`, `/search`, and `/doc/{id}`. The API is a
//! thin parameter-checking layer over the shared search client; bad input
//! maps to 400, backend trouble to 502, misconfiguration to 500.

mod error;
mod routes;
mod state;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
