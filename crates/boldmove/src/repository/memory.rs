//! In-memory repository.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::session::{Membership, Session, SessionState};

use super::{GameRepository, StorageError, StorageResult};

/// Repository keeping rows in process memory.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    /// Session ID -> stored session
    sessions: DashMap<String, Session>,

    /// Session ID -> stored members in insertion order
    members: DashMap<String, Vec<Membership>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored copy of a session.
    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }

    /// Stored members of a session.
    pub fn members(&self, session_id: &str) -> Vec<Membership> {
        self.members
            .get(session_id)
            .map(|m| m.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl GameRepository for MemoryRepository {
    async fn insert_session(&self, session: &Session) -> StorageResult<()> {
        if self.sessions.contains_key(&session.id) {
            return Err(StorageError::Backend(format!(
                "session {} already stored",
                session.id
            )));
        }
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn count_members(&self, session_id: &str) -> StorageResult<u64> {
        Ok(self
            .members
            .get(session_id)
            .map(|m| m.len() as u64)
            .unwrap_or(0))
    }

    async fn insert_membership(&self, membership: &Membership) -> StorageResult<()> {
        let mut members = self
            .members
            .entry(membership.session_id.clone())
            .or_default();
        if !members
            .iter()
            .any(|m| m.player_id == membership.player_id)
        {
            members.push(membership.clone());
        }
        Ok(())
    }

    async fn update_session_state(
        &self,
        session_id: &str,
        state: SessionState,
    ) -> StorageResult<()> {
        match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                session.state = state;
                Ok(())
            }
            None => Err(StorageError::Backend(format!(
                "session {} not stored",
                session_id
            ))),
        }
    }
}
