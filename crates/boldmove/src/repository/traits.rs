//! Repository trait definition.

use async_trait::async_trait;

use crate::session::{Membership, Session, SessionState};

use super::StorageResult;

/// Durable storage of sessions and memberships.
///
/// Writes are "last write observed": the in-memory registry stays
/// authoritative for capacity and state, and the repository trails it.
#[async_trait]
pub trait GameRepository: Send + Sync {
    /// Store a freshly created session.
    async fn insert_session(&self, session: &Session) -> StorageResult<()>;

    /// Number of stored members of a session.
    async fn count_members(&self, session_id: &str) -> StorageResult<u64>;

    /// Store a membership. Storing the same (session, player) twice is not an error.
    async fn insert_membership(&self, membership: &Membership) -> StorageResult<()>;

    /// Record a lifecycle transition.
    async fn update_session_state(&self, session_id: &str, state: SessionState)
    -> StorageResult<()>;
}
