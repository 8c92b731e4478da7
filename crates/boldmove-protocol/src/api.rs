//! HTTP request and response bodies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{LeaderboardEntry, SessionState};

/// `POST /games`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameRequest {
    pub host_id: String,
    /// Signed so that out-of-range values surface as validation errors
    /// rather than body parse failures.
    pub rounds: i64,
    /// Opaque to the server.
    #[serde(default)]
    pub scoring_rules: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameResponse {
    pub session_id: String,
    pub invite_code: String,
    /// Where to open the live connection.
    pub connect_endpoint_hint: String,
}

/// `POST /games/{id}/players`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGameRequest {
    pub player_id: String,
    #[serde(default)]
    pub specialization: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGameResponse {
    pub membership_confirmed: bool,
    pub session_id: String,
    pub player_id: String,
}

/// Body for host-only lifecycle calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostActionRequest {
    pub host_id: String,
}

/// `POST /games/{id}/scores`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishScoresRequest {
    pub leaderboard: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResponse {
    pub current_round: u32,
    pub rounds: u32,
    pub state: SessionState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub player_id: String,
    pub specialization: String,
}

/// `GET /games/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameView {
    pub session_id: String,
    pub host_id: String,
    pub rounds: u32,
    pub current_round: u32,
    pub scoring_rules: Value,
    /// Only present while the session is open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_code: Option<String>,
    pub capacity: u32,
    pub member_count: u32,
    pub state: SessionState,
    pub members: Vec<MemberView>,
    pub connection_count: usize,
    /// Member rows the repository knows about; may trail `member_count`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted_member_count: Option<u64>,
}
