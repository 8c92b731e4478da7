//! SQLite repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use crate::session::{Membership, Session, SessionState};

use super::{GameRepository, StorageError, StorageResult};

/// Repository for game persistence in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stored state of a game, if any.
    pub async fn session_state(&self, session_id: &str) -> StorageResult<Option<SessionState>> {
        let state: Option<String> = sqlx::query_scalar("SELECT state FROM games WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        state
            .map(|s| s.parse::<SessionState>().map_err(StorageError::Backend))
            .transpose()
    }
}

#[async_trait]
impl GameRepository for SqliteRepository {
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    async fn insert_session(&self, session: &Session) -> StorageResult<()> {
        let scoring_rules = serde_json::to_string(&session.scoring_rules)?;

        sqlx::query(
            r#"
            INSERT INTO games (id, host_id, rounds, scoring_rules, invite_code, state, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.host_id)
        .bind(session.rounds)
        .bind(scoring_rules)
        .bind(&session.invite_code)
        .bind(session.state.as_str())
        .bind(session.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!("Stored game");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn count_members(&self, session_id: &str) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM players WHERE game_id = ?")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self, membership), fields(session_id = %membership.session_id, player_id = %membership.player_id))]
    async fn insert_membership(&self, membership: &Membership) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO players (game_id, player_id, specialization, joined_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (game_id, player_id) DO NOTHING
            "#,
        )
        .bind(&membership.session_id)
        .bind(&membership.player_id)
        .bind(&membership.specialization)
        .bind(membership.joined_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_session_state(
        &self,
        session_id: &str,
        state: SessionState,
    ) -> StorageResult<()> {
        let result = sqlx::query("UPDATE games SET state = ?, updated_at = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Backend(format!(
                "game {} not stored",
                session_id
            )));
        }
        Ok(())
    }
}
