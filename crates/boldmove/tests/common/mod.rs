//! Test utilities and common setup.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use boldmove::api::{self, AppState};
use boldmove::db::Database;
use boldmove::game::{GameCoordinator, GameServiceConfig};
use boldmove::repository::{MemoryRepository, SqliteRepository};
use serde_json::Value;
use tokio::net::TcpListener;
use tower::ServiceExt;

/// Create a test application backed by an in-memory SQLite database.
pub async fn test_app() -> (Router, Arc<GameCoordinator>) {
    let db = Database::in_memory().await.unwrap();
    let repository = Arc::new(SqliteRepository::new(db.pool().clone()));
    let games = Arc::new(GameCoordinator::new(
        repository,
        GameServiceConfig::default(),
    ));
    let router = api::create_router(AppState::new(games.clone()));
    (router, games)
}

/// Create application state on the in-memory repository.
pub fn memory_state(config: GameServiceConfig) -> AppState {
    let games = Arc::new(GameCoordinator::new(Arc::new(MemoryRepository::new()), config));
    AppState::new(games).with_ping_interval(Duration::from_secs(30))
}

/// Serve `state` on an ephemeral local port.
pub async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Send a request and decode the JSON response body (`Null` when empty).
pub async fn request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().uri(uri).method(method);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}
