//! Server -> client live events.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a game session.
///
/// `Open --(capacity reached | host starts)--> InProgress --(host ends | last round)--> Closed`,
/// plus `Open --(host aborts)--> Closed`. Nothing leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Accepting joins.
    Open,
    /// Rounds are being played; joins are rejected.
    InProgress,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Whether a transition from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Open, SessionState::InProgress)
                | (SessionState::Open, SessionState::Closed)
                | (SessionState::InProgress, SessionState::Closed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Open => "open",
            SessionState::InProgress => "in_progress",
            SessionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(SessionState::Open),
            "in_progress" => Ok(SessionState::InProgress),
            "closed" => Ok(SessionState::Closed),
            _ => Err(format!("unknown session state: {}", s)),
        }
    }
}

/// One row of a leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub player_id: String,
    pub score: i64,
}

/// An update published into a session by the game logic.
///
/// Tagged by `kind`; the coordinator turns it into the matching [`LiveEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GameUpdate {
    /// New standings for the session.
    ScoreUpdate { leaderboard: Vec<LeaderboardEntry> },
}

/// Events sent from the server to every live connection of a session.
///
/// Consumers must ignore `type` values they do not know; deserializing one
/// yields [`LiveEvent::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum LiveEvent {
    // ========== Connection Events ==========
    /// Sent once right after the live connection is accepted.
    Connected { session_id: String },

    /// Keepalive.
    Ping,

    /// Error message.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    // ========== Game Events ==========
    /// Current standings.
    ScoreUpdate {
        session_id: String,
        leaderboard: Vec<LeaderboardEntry>,
    },

    /// A player took a seat.
    PlayerJoined {
        session_id: String,
        player_id: String,
        specialization: String,
        member_count: u32,
    },

    /// The session changed lifecycle state.
    SessionState {
        session_id: String,
        state: SessionState,
        current_round: u32,
    },

    /// The host finished a round.
    RoundCompleted {
        session_id: String,
        round: u32,
        rounds: u32,
    },

    /// Any event kind this build does not know about.
    #[serde(other)]
    Unknown,
}

impl LiveEvent {
    /// Build the live event for a published game update.
    pub fn from_update(session_id: &str, update: GameUpdate) -> Self {
        match update {
            GameUpdate::ScoreUpdate { leaderboard } => LiveEvent::ScoreUpdate {
                session_id: session_id.to_string(),
                leaderboard,
            },
        }
    }
}
