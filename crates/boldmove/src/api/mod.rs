//! HTTP API module.
//!
//! REST endpoints for creating, joining and driving game sessions, plus the
//! live channel route.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
