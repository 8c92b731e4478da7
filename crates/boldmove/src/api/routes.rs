//! API route definitions.

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::ws::live_handler;

use super::handlers;
use super::state::AppState;

/// Origins allowed when none are configured.
const DEV_ORIGINS: [&str; 4] = [
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
];

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.allowed_origins);

    // Tracing layer with request IDs and timing
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/health", get(handlers::health))
        // Sessions
        .route("/games", post(handlers::create_game))
        .route("/games/{session_id}", get(handlers::get_game))
        .route("/games/{session_id}/players", post(handlers::join_game))
        .route(
            "/games/invite/{invite_code}/players",
            post(handlers::join_by_invite),
        )
        // Lifecycle
        .route("/games/{session_id}/start", post(handlers::start_game))
        .route("/games/{session_id}/rounds", post(handlers::complete_round))
        .route("/games/{session_id}/end", post(handlers::end_game))
        .route("/games/{session_id}/abort", post(handlers::abort_game))
        .route("/games/{session_id}/close", post(handlers::close_game))
        // Live updates
        .route("/games/{session_id}/scores", post(handlers::publish_scores))
        .route("/events/{session_id}", get(live_handler))
        .with_state(state)
        .layer(cors)
        .layer(trace_layer)
}

/// Build the CORS layer from the configured origins.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let configured: Vec<&str> = if allowed_origins.is_empty() {
        tracing::warn!("CORS: No origins configured, allowing local development origins");
        DEV_ORIGINS.to_vec()
    } else {
        allowed_origins.iter().map(String::as_str).collect()
    };

    let origins: Vec<HeaderValue> = configured
        .into_iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("CORS: Invalid origin in config: {}", origin);
                None
            })
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN])
}
