//! HTTP handlers over the game coordinator.

use axum::{
    Json,
    extract::{FromRequest, Path, State},
    http::StatusCode,
};
use boldmove_protocol::{
    CreateGameRequest, CreateGameResponse, GameUpdate, GameView, HostActionRequest,
    JoinGameRequest, JoinGameResponse, PublishScoresRequest, RoundResponse,
};
use serde::Serialize;
use tracing::{info, instrument};

use crate::session::Membership;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// JSON body extractor that rejects with the structured error body.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Create a new game session.
#[instrument(skip(state, request), fields(host_id = %request.host_id, rounds = request.rounds))]
pub async fn create_game(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateGameRequest>,
) -> ApiResult<(StatusCode, Json<CreateGameResponse>)> {
    let created = state
        .games
        .create_game(&request.host_id, request.rounds, request.scoring_rules)
        .await?;
    info!(session_id = %created.session_id, "Created game");
    Ok((StatusCode::CREATED, Json(created)))
}

/// Get a session snapshot.
#[instrument(skip(state))]
pub async fn get_game(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<GameView>> {
    Ok(Json(state.games.get_game(&session_id).await?))
}

/// Join a session by ID.
#[instrument(skip(state, request), fields(player_id = %request.player_id))]
pub async fn join_game(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ApiJson(request): ApiJson<JoinGameRequest>,
) -> ApiResult<Json<JoinGameResponse>> {
    let membership = state
        .games
        .join_game(&session_id, &request.player_id, &request.specialization)
        .await?;
    Ok(Json(confirmed(membership)))
}

/// Join a session by invite code.
#[instrument(skip(state, request), fields(player_id = %request.player_id))]
pub async fn join_by_invite(
    State(state): State<AppState>,
    Path(invite_code): Path<String>,
    ApiJson(request): ApiJson<JoinGameRequest>,
) -> ApiResult<Json<JoinGameResponse>> {
    let membership = state
        .games
        .join_by_invite(&invite_code, &request.player_id, &request.specialization)
        .await?;
    info!(session_id = %membership.session_id, "Joined by invite");
    Ok(Json(confirmed(membership)))
}

fn confirmed(membership: Membership) -> JoinGameResponse {
    JoinGameResponse {
        membership_confirmed: true,
        session_id: membership.session_id,
        player_id: membership.player_id,
    }
}

/// Start a session before it fills up.
#[instrument(skip(state, request))]
pub async fn start_game(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ApiJson(request): ApiJson<HostActionRequest>,
) -> ApiResult<Json<GameView>> {
    state.games.start_game(&session_id, &request.host_id).await?;
    Ok(Json(state.games.get_game(&session_id).await?))
}

/// Complete the current round.
#[instrument(skip(state, request))]
pub async fn complete_round(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ApiJson(request): ApiJson<HostActionRequest>,
) -> ApiResult<Json<RoundResponse>> {
    let outcome = state
        .games
        .complete_round(&session_id, &request.host_id)
        .await?;
    Ok(Json(RoundResponse {
        current_round: outcome.round,
        rounds: outcome.session.rounds,
        state: outcome.session.state,
    }))
}

/// End a running session.
#[instrument(skip(state, request))]
pub async fn end_game(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ApiJson(request): ApiJson<HostActionRequest>,
) -> ApiResult<Json<GameView>> {
    state.games.end_game(&session_id, &request.host_id).await?;
    Ok(Json(state.games.get_game(&session_id).await?))
}

/// Abort a session that has not started.
#[instrument(skip(state, request))]
pub async fn abort_game(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ApiJson(request): ApiJson<HostActionRequest>,
) -> ApiResult<Json<GameView>> {
    state.games.abort_game(&session_id, &request.host_id).await?;
    Ok(Json(state.games.get_game(&session_id).await?))
}

/// Close a session unconditionally.
#[instrument(skip(state))]
pub async fn close_game(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<GameView>> {
    state.games.close_session(&session_id).await?;
    Ok(Json(state.games.get_game(&session_id).await?))
}

/// Push a leaderboard to every live connection of the session.
#[instrument(skip(state, request), fields(entries = request.leaderboard.len()))]
pub async fn publish_scores(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ApiJson(request): ApiJson<PublishScoresRequest>,
) -> ApiResult<StatusCode> {
    let report = state
        .games
        .publish_update(
            &session_id,
            GameUpdate::ScoreUpdate {
                leaderboard: request.leaderboard,
            },
        )
        .await?;
    info!(
        delivered = report.delivered,
        dropped = report.dropped,
        "Published scores"
    );
    Ok(StatusCode::ACCEPTED)
}
