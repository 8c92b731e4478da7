//! Session data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SessionState;

/// A game session as tracked by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID (`game-<uuid>`).
    pub id: String,
    /// Player who created the session.
    pub host_id: String,
    /// Number of rounds to play.
    pub rounds: u32,
    /// Rounds completed so far.
    pub current_round: u32,
    /// Opaque scoring configuration.
    pub scoring_rules: Value,
    /// Code players type to find the session. Unique among open sessions.
    pub invite_code: String,
    /// Maximum number of members.
    pub capacity: u32,
    /// Members currently holding a seat.
    pub member_count: u32,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn is_full(&self) -> bool {
        self.member_count >= self.capacity
    }
}

/// A player's seat in a session. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub session_id: String,
    pub player_id: String,
    pub specialization: String,
    pub joined_at: DateTime<Utc>,
}

/// Point-in-time copy of a session and its members.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session: Session,
    /// In join order.
    pub members: Vec<Membership>,
}

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub membership: Membership,
    /// Member count right after this join.
    pub member_count: u32,
    /// Set when this join filled the session and moved it out of `Open`.
    pub started: bool,
}

/// Result of a lifecycle transition.
#[derive(Debug, Clone)]
pub struct Transition {
    pub session: Session,
    /// False when the session was already in the target state.
    pub changed: bool,
}

/// Result of completing a round.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub session: Session,
    /// The round that was just completed (1-based).
    pub round: u32,
    /// True when this was the final round and the session closed.
    pub finished: bool,
}
