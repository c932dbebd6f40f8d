//! Davenport API crate - axum HTTP server, route handlers, SSE streaming.
//!
//! Exposes the chat gateway over HTTP: blocking and streamed chat turns,
//! answer feedback, voice-memo upload and a health check.

pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod sse;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
