//! Domain error taxonomy for session coordination.

use thiserror::Error;

use crate::repository::StorageError;
use crate::session::SessionState;

/// Result type for registry, hub and coordinator operations.
pub type GameResult<T> = Result<T, GameError>;

/// Errors returned by the session core.
///
/// Every failure is a typed value; nothing in the registry or hub panics
/// across the component boundary.
#[derive(Debug, Error)]
pub enum GameError {
    /// Bad input, rejected before any state changed.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("session {session_id} is full (capacity {capacity})")]
    CapacityExceeded { session_id: String, capacity: u32 },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session {0} is not accepting joins")]
    SessionClosed(String),

    #[error("player {player_id} already joined session {session_id}")]
    AlreadyJoined {
        session_id: String,
        player_id: String,
    },

    /// Invite-code collision bound hit. Transient; the caller may retry.
    #[error("could not allocate a unique invite code after {0} attempts")]
    GenerationExhausted(usize),

    /// Repository failure. For joins the in-memory membership has already been
    /// committed and stays in place.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Live registration by an identity that is neither host nor member.
    #[error("{identity} is not a participant of session {session_id}")]
    NotAMember {
        session_id: String,
        identity: String,
    },

    #[error("{identity} is not the host of session {session_id}")]
    NotHost {
        session_id: String,
        identity: String,
    },

    /// Round bookkeeping on a session that is not being played.
    #[error("session {0} is not in progress")]
    NotInProgress(String),

    #[error("session {session_id} cannot move from {from} to {to}")]
    InvalidTransition {
        session_id: String,
        from: SessionState,
        to: SessionState,
    },
}

impl GameError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::SessionClosed(_) => "SESSION_CLOSED",
            Self::AlreadyJoined { .. } => "ALREADY_JOINED",
            Self::GenerationExhausted(_) => "GENERATION_EXHAUSTED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::NotAMember { .. } => "NOT_A_MEMBER",
            Self::NotHost { .. } => "NOT_HOST",
            Self::NotInProgress(_) => "NOT_IN_PROGRESS",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }

    /// Whether the same call may succeed if simply retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GenerationExhausted(_) | Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GameError::CapacityExceeded {
            session_id: "game-1".to_string(),
            capacity: 8,
        };
        assert_eq!(err.to_string(), "session game-1 is full (capacity 8)");
        assert_eq!(err.code(), "CAPACITY_EXCEEDED");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(GameError::GenerationExhausted(16).is_retryable());
        assert!(GameError::Storage(StorageError::Backend("disk full".to_string())).is_retryable());
        assert!(!GameError::SessionNotFound("x".to_string()).is_retryable());
        assert!(
            !GameError::AlreadyJoined {
                session_id: "g".to_string(),
                player_id: "p".to_string(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_storage_error_converts() {
        let err: GameError = StorageError::Backend("boom".to_string()).into();
        assert_eq!(err.code(), "STORAGE_ERROR");
        assert_eq!(err.to_string(), "storage error: backend error: boom");
    }
}
