//! Game coordinator - composes the registry, the hub and the repository.

use std::sync::Arc;
use std::time::Duration;

use boldmove_protocol::{CreateGameResponse, GameUpdate, GameView, LiveEvent, MemberView};
use dashmap::DashMap;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{GameError, GameResult};
use crate::repository::GameRepository;
use crate::session::{
    Membership, RegistryConfig, RoundOutcome, Session, SessionRegistry, SessionState,
};
use crate::ws::{BroadcastReport, ConnectionHub, ConnectionId, HubConfig, LiveConnection};

/// Default public address clients use to reach the live endpoint.
const DEFAULT_PUBLIC_BASE_URL: &str = "ws://localhost:8080";

/// Default time a session waits for a disconnected host.
const DEFAULT_HOST_GRACE: Duration = Duration::from_secs(30);

/// Default time closed sessions stay readable.
const DEFAULT_CLOSED_RETENTION: Duration = Duration::from_secs(600);

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct GameServiceConfig {
    /// Base of the connect endpoint hint (e.g. `ws://games.example.com`).
    pub public_base_url: String,
    /// How long a session survives without any host connection.
    pub host_grace: Duration,
    /// How long closed sessions remain in memory.
    pub closed_retention: Duration,
    pub registry: RegistryConfig,
    pub hub: HubConfig,
}

impl Default for GameServiceConfig {
    fn default() -> Self {
        Self {
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
            host_grace: DEFAULT_HOST_GRACE,
            closed_retention: DEFAULT_CLOSED_RETENTION,
            registry: RegistryConfig::default(),
            hub: HubConfig::default(),
        }
    }
}

/// Public entry point for everything that happens to a game session.
///
/// All broadcasts for a session go through the one hub, so updates published
/// sequentially by a caller reach each connection in the same order.
pub struct GameCoordinator {
    registry: Arc<SessionRegistry>,
    hub: Arc<ConnectionHub>,
    repository: Arc<dyn GameRepository>,
    config: GameServiceConfig,

    /// Session ID -> host presence epoch. Bumped whenever the host connects or
    /// drops its last connection; a pending grace timer only fires if the
    /// epoch it captured is still current.
    host_epochs: DashMap<String, u64>,
}

impl GameCoordinator {
    /// Create a coordinator with a fresh registry and hub over `repository`.
    pub fn new(repository: Arc<dyn GameRepository>, config: GameServiceConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(
            repository.clone(),
            config.registry.clone(),
        ));
        Self::with_registry(registry, repository, config)
    }

    /// Create a coordinator around an existing registry.
    pub fn with_registry(
        registry: Arc<SessionRegistry>,
        repository: Arc<dyn GameRepository>,
        config: GameServiceConfig,
    ) -> Self {
        let hub = Arc::new(ConnectionHub::new(registry.clone(), config.hub.clone()));
        Self {
            registry,
            hub,
            repository,
            config,
            host_epochs: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    pub fn config(&self) -> &GameServiceConfig {
        &self.config
    }

    // ========== Creation and joining ==========

    /// Create a session and tell the host where to open the live connection.
    pub async fn create_game(
        &self,
        host_id: &str,
        rounds: i64,
        scoring_rules: Value,
    ) -> GameResult<CreateGameResponse> {
        let session = self
            .registry
            .create_session(host_id, rounds, scoring_rules)
            .await?;

        Ok(CreateGameResponse {
            connect_endpoint_hint: self.connect_endpoint(&session.id),
            session_id: session.id,
            invite_code: session.invite_code,
        })
    }

    fn connect_endpoint(&self, session_id: &str) -> String {
        format!(
            "{}/events/{}",
            self.config.public_base_url.trim_end_matches('/'),
            session_id
        )
    }

    /// Join a session.
    ///
    /// The seat is committed in memory first. A persistence failure is
    /// returned as `Storage`, but the seat stands and the join is announced.
    /// Retrying then reports `AlreadyJoined` once the membership is stored.
    pub async fn join_game(
        &self,
        session_id: &str,
        player_id: &str,
        specialization: &str,
    ) -> GameResult<Membership> {
        let outcome = match self.registry.try_join(session_id, player_id, specialization) {
            Ok(outcome) => outcome,
            Err(err @ GameError::AlreadyJoined { .. }) => {
                self.repersist_membership(session_id, player_id).await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        let persisted = self.registry.persist_membership(&outcome.membership).await;

        self.announce(
            session_id,
            LiveEvent::PlayerJoined {
                session_id: session_id.to_string(),
                player_id: outcome.membership.player_id.clone(),
                specialization: outcome.membership.specialization.clone(),
                member_count: outcome.member_count,
            },
        )
        .await;

        if outcome.started {
            let session = self.registry.get(session_id)?.session;
            self.record_transition(&session).await;
        }

        persisted.map(|()| outcome.membership)
    }

    /// Write an existing seat again. Membership inserts are idempotent, so
    /// this repairs a join whose first write failed.
    async fn repersist_membership(&self, session_id: &str, player_id: &str) -> GameResult<()> {
        let player_id = player_id.trim();
        let membership = self
            .registry
            .get(session_id)?
            .members
            .into_iter()
            .find(|m| m.player_id == player_id);
        match membership {
            Some(membership) => self.registry.persist_membership(&membership).await,
            None => Ok(()),
        }
    }

    /// Join the open session an invite code belongs to. Codes are matched
    /// case-insensitively.
    pub async fn join_by_invite(
        &self,
        invite_code: &str,
        player_id: &str,
        specialization: &str,
    ) -> GameResult<Membership> {
        let session_id = self.registry.find_by_invite(invite_code)?;
        self.join_game(&session_id, player_id, specialization).await
    }

    // ========== Publishing ==========

    /// Fan an update out to every live connection of the session.
    pub async fn publish_update(
        &self,
        session_id: &str,
        update: GameUpdate,
    ) -> GameResult<BroadcastReport> {
        let session = self.registry.get(session_id)?.session;
        if session.state == SessionState::Closed {
            return Err(GameError::SessionClosed(session_id.to_string()));
        }
        self.hub
            .broadcast(session_id, &LiveEvent::from_update(session_id, update))
            .await
    }

    /// Broadcast an internal event. Failures are logged, not returned.
    async fn announce(&self, session_id: &str, event: LiveEvent) {
        match self.hub.broadcast(session_id, &event).await {
            Ok(report) if report.dropped > 0 => {
                debug!(
                    "Event for session {} dropped {} connection(s)",
                    session_id, report.dropped
                );
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to broadcast to session {}: {}", session_id, e),
        }
    }

    // ========== Lifecycle ==========

    /// `Open -> InProgress`, host only.
    pub async fn start_game(&self, session_id: &str, host_id: &str) -> GameResult<Session> {
        self.ensure_host(session_id, host_id)?;
        let transition = self
            .registry
            .transition_from(session_id, SessionState::Open, SessionState::InProgress)?;
        self.record_transition(&transition.session).await;
        Ok(transition.session)
    }

    /// Mark the current round as played, host only. The final round closes
    /// the session.
    pub async fn complete_round(&self, session_id: &str, host_id: &str) -> GameResult<RoundOutcome> {
        self.ensure_host(session_id, host_id)?;
        let outcome = self.registry.complete_round(session_id)?;

        self.announce(
            session_id,
            LiveEvent::RoundCompleted {
                session_id: session_id.to_string(),
                round: outcome.round,
                rounds: outcome.session.rounds,
            },
        )
        .await;

        if outcome.finished {
            self.finish_close(&outcome.session).await;
        }
        Ok(outcome)
    }

    /// `InProgress -> Closed`, host only.
    pub async fn end_game(&self, session_id: &str, host_id: &str) -> GameResult<Session> {
        self.ensure_host(session_id, host_id)?;
        let transition = self.registry.transition_from(
            session_id,
            SessionState::InProgress,
            SessionState::Closed,
        )?;
        self.finish_close(&transition.session).await;
        Ok(transition.session)
    }

    /// `Open -> Closed`, host only.
    pub async fn abort_game(&self, session_id: &str, host_id: &str) -> GameResult<Session> {
        self.ensure_host(session_id, host_id)?;
        let transition = self.registry.transition_from(
            session_id,
            SessionState::Open,
            SessionState::Closed,
        )?;
        self.finish_close(&transition.session).await;
        Ok(transition.session)
    }

    /// Close a session from any state. Idempotent.
    pub async fn close_session(&self, session_id: &str) -> GameResult<Session> {
        let transition = self.registry.close_session(session_id)?;
        if transition.changed {
            self.finish_close(&transition.session).await;
        }
        Ok(transition.session)
    }

    fn ensure_host(&self, session_id: &str, host_id: &str) -> GameResult<()> {
        let host = self.registry.host_of(session_id)?;
        if host != host_id.trim() {
            return Err(GameError::NotHost {
                session_id: session_id.to_string(),
                identity: host_id.to_string(),
            });
        }
        Ok(())
    }

    /// Persist and announce a state change. Persistence is best-effort.
    async fn record_transition(&self, session: &Session) {
        if let Err(e) = self
            .repository
            .update_session_state(&session.id, session.state)
            .await
        {
            warn!(
                "Session {} is {} in memory but the change was not persisted: {}",
                session.id, session.state, e
            );
        }

        self.announce(
            &session.id,
            LiveEvent::SessionState {
                session_id: session.id.clone(),
                state: session.state,
                current_round: session.current_round,
            },
        )
        .await;
    }

    /// Announce the close, then drop every live connection of the session.
    async fn finish_close(&self, session: &Session) {
        self.record_transition(session).await;
        let closed = self.hub.close_session(&session.id);
        self.host_epochs.remove(&session.id);
        info!(
            "Session {} closed, {} live connection(s) terminated",
            session.id, closed
        );
    }

    // ========== Queries ==========

    /// Snapshot of a session with live and persisted counts.
    pub async fn get_game(&self, session_id: &str) -> GameResult<GameView> {
        let snapshot = self.registry.get(session_id)?;
        let session = snapshot.session;

        let persisted_member_count = match self.repository.count_members(session_id).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("Failed to count stored members of {}: {}", session_id, e);
                None
            }
        };

        Ok(GameView {
            connection_count: self.hub.connection_count(session_id),
            invite_code: session.is_open().then(|| session.invite_code.clone()),
            members: snapshot
                .members
                .into_iter()
                .map(|m| MemberView {
                    player_id: m.player_id,
                    specialization: m.specialization,
                })
                .collect(),
            session_id: session.id,
            host_id: session.host_id,
            rounds: session.rounds,
            current_round: session.current_round,
            scoring_rules: session.scoring_rules,
            capacity: session.capacity,
            member_count: session.member_count,
            state: session.state,
            persisted_member_count,
        })
    }

    // ========== Live connections ==========

    /// Register a live connection for a participant of a session that is
    /// not closed.
    pub fn connect(&self, session_id: &str, identity: &str) -> GameResult<LiveConnection> {
        let identity = identity.trim();
        let host = self.registry.host_of(session_id)?;
        let connection = self.hub.register(session_id, identity)?;

        // A close that ran between the membership check and the insert has
        // already swept the hub, so this connection would be left behind.
        let open = self
            .registry
            .get(session_id)
            .is_ok_and(|snapshot| snapshot.session.state != SessionState::Closed);
        if !open {
            self.hub.unregister(session_id, connection.id);
            return Err(GameError::SessionClosed(session_id.to_string()));
        }

        if host == identity {
            self.bump_host_epoch(session_id);
        }
        Ok(connection)
    }

    /// Unregister a live connection. When the host's last connection goes,
    /// the host grace timer starts.
    pub fn disconnect(self: &Arc<Self>, session_id: &str, conn_id: ConnectionId) {
        let Some(identity) = self.hub.unregister(session_id, conn_id) else {
            return;
        };
        let Ok(host) = self.registry.host_of(session_id) else {
            return;
        };
        if identity == host && self.hub.identity_connection_count(session_id, &host) == 0 {
            self.start_host_grace(session_id, host);
        }
    }

    fn bump_host_epoch(&self, session_id: &str) -> u64 {
        let mut epoch = self.host_epochs.entry(session_id.to_string()).or_insert(0);
        *epoch += 1;
        *epoch
    }

    fn host_epoch(&self, session_id: &str) -> Option<u64> {
        self.host_epochs.get(session_id).map(|e| *e)
    }

    fn start_host_grace(self: &Arc<Self>, session_id: &str, host: String) {
        let epoch = self.bump_host_epoch(session_id);
        let grace = self.config.host_grace;
        let session_id = session_id.to_string();
        let coordinator = Arc::clone(self);
        debug!(
            "Host {} left session {}, closing in {:?} unless they return",
            host, session_id, grace
        );

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if coordinator.host_epoch(&session_id) != Some(epoch)
                || coordinator.hub.identity_connection_count(&session_id, &host) > 0
            {
                return;
            }
            match coordinator.registry.get(&session_id) {
                Ok(snapshot) if snapshot.session.state != SessionState::Closed => {
                    info!(
                        "Host {} did not return to session {}, closing it",
                        host, session_id
                    );
                    if let Err(e) = coordinator.close_session(&session_id).await {
                        warn!("Failed to close abandoned session {}: {}", session_id, e);
                    }
                }
                _ => {}
            }
        });
    }

    // ========== Maintenance ==========

    /// Evict sessions closed for longer than the retention period.
    pub fn sweep_closed(&self) -> Vec<String> {
        let evicted = self.registry.evict_closed(self.config.closed_retention);
        for session_id in &evicted {
            self.hub.close_session(session_id);
            self.host_epochs.remove(session_id);
        }
        if !evicted.is_empty() {
            info!("Evicted {} closed session(s)", evicted.len());
        }
        evicted
    }

    /// Run [`Self::sweep_closed`] every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        coordinator.sweep_closed();
                    }
                }
            }
            debug!("Closed-session sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryRepository, StorageError, StorageResult};
    use async_trait::async_trait;
    use boldmove_protocol::LeaderboardEntry;
    use serde_json::json;
    use std::time::Instant;

    fn coordinator() -> (Arc<GameCoordinator>, Arc<MemoryRepository>) {
        coordinator_with(GameServiceConfig::default())
    }

    fn coordinator_with(config: GameServiceConfig) -> (Arc<GameCoordinator>, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::new());
        let games = Arc::new(GameCoordinator::new(repo.clone(), config));
        (games, repo)
    }

    async fn next_event(conn: &mut LiveConnection) -> LiveEvent {
        let payload = conn.receiver.recv().await.unwrap();
        serde_json::from_str(&payload).unwrap()
    }

    fn scores(points: i64) -> GameUpdate {
        GameUpdate::ScoreUpdate {
            leaderboard: vec![LeaderboardEntry {
                player_id: "p1".to_string(),
                score: points,
            }],
        }
    }

    /// Repository whose membership writes fail.
    #[derive(Default)]
    struct FlakyRepository {
        inner: MemoryRepository,
    }

    #[async_trait]
    impl GameRepository for FlakyRepository {
        async fn insert_session(&self, session: &Session) -> StorageResult<()> {
            self.inner.insert_session(session).await
        }

        async fn count_members(&self, _session_id: &str) -> StorageResult<u64> {
            Err(StorageError::Backend("count unavailable".to_string()))
        }

        async fn insert_membership(&self, _membership: &Membership) -> StorageResult<()> {
            Err(StorageError::Backend("disk full".to_string()))
        }

        async fn update_session_state(
            &self,
            _session_id: &str,
            _state: SessionState,
        ) -> StorageResult<()> {
            Err(StorageError::Backend("disk full".to_string()))
        }
    }

    /// Repository whose first membership write fails.
    #[derive(Default)]
    struct FailOnceRepository {
        inner: MemoryRepository,
        failed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl GameRepository for FailOnceRepository {
        async fn insert_session(&self, session: &Session) -> StorageResult<()> {
            self.inner.insert_session(session).await
        }

        async fn count_members(&self, session_id: &str) -> StorageResult<u64> {
            self.inner.count_members(session_id).await
        }

        async fn insert_membership(&self, membership: &Membership) -> StorageResult<()> {
            if !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(StorageError::Backend("connection reset".to_string()));
            }
            self.inner.insert_membership(membership).await
        }

        async fn update_session_state(
            &self,
            session_id: &str,
            state: SessionState,
        ) -> StorageResult<()> {
            self.inner.update_session_state(session_id, state).await
        }
    }

    #[tokio::test]
    async fn test_full_game_scenario() {
        let (games, repo) = coordinator();
        let created = games
            .create_game("host", 5, json!({"mode": "marketcap"}))
            .await
            .unwrap();
        assert_eq!(created.invite_code.len(), 6);
        assert_eq!(
            created.connect_endpoint_hint,
            format!("ws://localhost:8080/events/{}", created.session_id)
        );

        for i in 1..=8 {
            games
                .join_game(&created.session_id, &format!("p{i}"), "trader")
                .await
                .unwrap();
        }

        let err = games
            .join_game(&created.session_id, "p9", "trader")
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::CapacityExceeded { .. }));
        assert_eq!(repo.members(&created.session_id).len(), 8);

        let mut connections: Vec<_> = (1..=8)
            .map(|i| games.connect(&created.session_id, &format!("p{i}")).unwrap())
            .collect();

        let report = games
            .publish_update(&created.session_id, scores(100))
            .await
            .unwrap();
        assert_eq!(report, BroadcastReport { delivered: 8, dropped: 0 });

        let expected = json!({
            "type": "score_update",
            "sessionId": created.session_id,
            "leaderboard": [{"playerId": "p1", "score": 100}],
        });
        for conn in &mut connections {
            let payload = conn.receiver.recv().await.unwrap();
            let value: Value = serde_json::from_str(&payload).unwrap();
            assert_eq!(value, expected);
        }
    }

    #[tokio::test]
    async fn test_join_announces_and_auto_starts() {
        let (games, repo) = coordinator();
        let created = games.create_game("host", 3, Value::Null).await.unwrap();
        let mut host = games.connect(&created.session_id, "host").unwrap();

        for i in 0..8 {
            games
                .join_game(&created.session_id, &format!("p{i}"), "analyst")
                .await
                .unwrap();
        }

        for i in 0..8u32 {
            match next_event(&mut host).await {
                LiveEvent::PlayerJoined {
                    player_id,
                    member_count,
                    ..
                } => {
                    assert_eq!(player_id, format!("p{i}"));
                    assert_eq!(member_count, i + 1);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(matches!(
            next_event(&mut host).await,
            LiveEvent::SessionState {
                state: SessionState::InProgress,
                ..
            }
        ));
        assert_eq!(
            repo.session(&created.session_id).unwrap().state,
            SessionState::InProgress
        );
    }

    #[tokio::test]
    async fn test_join_by_invite_is_case_insensitive() {
        let (games, _) = coordinator();
        let created = games.create_game("host", 3, Value::Null).await.unwrap();

        let lower = format!("  {}  ", created.invite_code.to_lowercase());
        let membership = games.join_by_invite(&lower, "p1", "").await.unwrap();
        assert_eq!(membership.session_id, created.session_id);

        games.start_game(&created.session_id, "host").await.unwrap();
        assert!(matches!(
            games
                .join_by_invite(&created.invite_code, "p2", "")
                .await
                .unwrap_err(),
            GameError::SessionNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_storage_failure_on_join_keeps_seat() {
        let repo = Arc::new(FlakyRepository::default());
        let games = GameCoordinator::new(repo, GameServiceConfig::default());
        let created = games.create_game("host", 3, Value::Null).await.unwrap();

        let err = games
            .join_game(&created.session_id, "p1", "")
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::Storage(_)));
        assert!(err.is_retryable());

        let view = games.get_game(&created.session_id).await.unwrap();
        assert_eq!(view.member_count, 1);
        assert_eq!(view.persisted_member_count, None);
        assert!(matches!(
            games
                .join_game(&created.session_id, "p1", "")
                .await
                .unwrap_err(),
            GameError::AlreadyJoined { .. }
        ));
    }

    #[tokio::test]
    async fn test_publish_preserves_order() {
        let (games, _) = coordinator();
        let created = games.create_game("host", 3, Value::Null).await.unwrap();
        games.join_game(&created.session_id, "p1", "").await.unwrap();
        let mut player = games.connect(&created.session_id, "p1").unwrap();
        let mut host = games.connect(&created.session_id, "host").unwrap();

        games
            .publish_update(&created.session_id, scores(1))
            .await
            .unwrap();
        games
            .publish_update(&created.session_id, scores(2))
            .await
            .unwrap();

        for conn in [&mut player, &mut host] {
            for points in [1, 2] {
                match next_event(conn).await {
                    LiveEvent::ScoreUpdate { leaderboard, .. } => {
                        assert_eq!(leaderboard[0].score, points)
                    }
                    other => panic!("unexpected event: {other:?}"),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_stalled_connection_does_not_delay_others() {
        let config = GameServiceConfig {
            hub: HubConfig {
                send_timeout: Duration::from_millis(100),
                connection_buffer: 1,
            },
            ..Default::default()
        };
        let (games, _) = coordinator_with(config);
        let created = games.create_game("host", 3, Value::Null).await.unwrap();
        games.join_game(&created.session_id, "slow", "").await.unwrap();
        games.join_game(&created.session_id, "fast", "").await.unwrap();
        let _slow = games.connect(&created.session_id, "slow").unwrap();
        let mut fast = games.connect(&created.session_id, "fast").unwrap();

        let started = Instant::now();
        for points in 1..=3 {
            games
                .publish_update(&created.session_id, scores(points))
                .await
                .unwrap();
            next_event(&mut fast).await;
        }
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(games.hub().identity_connection_count(&created.session_id, "slow"), 0);
        assert_eq!(games.hub().connection_count(&created.session_id), 1);
    }

    #[tokio::test]
    async fn test_connect_requires_participant() {
        let (games, _) = coordinator();
        let created = games.create_game("host", 3, Value::Null).await.unwrap();

        assert!(matches!(
            games.connect(&created.session_id, "nobody").unwrap_err(),
            GameError::NotAMember { .. }
        ));
        assert!(matches!(
            games.connect("game-missing", "host").unwrap_err(),
            GameError::SessionNotFound(_)
        ));
        assert!(games.connect(&created.session_id, " host ").is_ok());
    }

    #[tokio::test]
    async fn test_lifecycle_is_host_only() {
        let (games, repo) = coordinator();
        let created = games.create_game("host", 3, Value::Null).await.unwrap();
        let id = &created.session_id;

        assert!(matches!(
            games.start_game(id, "p1").await.unwrap_err(),
            GameError::NotHost { .. }
        ));
        assert!(matches!(
            games.end_game(id, "host").await.unwrap_err(),
            GameError::InvalidTransition { .. }
        ));
        assert!(matches!(
            games.complete_round(id, "host").await.unwrap_err(),
            GameError::NotInProgress(_)
        ));

        let session = games.start_game(id, "host").await.unwrap();
        assert_eq!(session.state, SessionState::InProgress);
        assert!(matches!(
            games.abort_game(id, "host").await.unwrap_err(),
            GameError::InvalidTransition { .. }
        ));

        let session = games.end_game(id, "host").await.unwrap();
        assert_eq!(session.state, SessionState::Closed);
        assert_eq!(repo.session(id).unwrap().state, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_rounds_close_the_session() {
        let (games, _) = coordinator();
        let created = games.create_game("host", 3, Value::Null).await.unwrap();
        let id = &created.session_id;
        games.start_game(id, "host").await.unwrap();
        let mut host = games.connect(id, "host").unwrap();

        for expected in 1..=3u32 {
            let outcome = games.complete_round(id, "host").await.unwrap();
            assert_eq!(outcome.round, expected);
            assert_eq!(outcome.finished, expected == 3);
        }

        for round in 1..=3u32 {
            assert!(matches!(
                next_event(&mut host).await,
                LiveEvent::RoundCompleted { round: r, rounds: 3, .. } if r == round
            ));
        }
        assert!(matches!(
            next_event(&mut host).await,
            LiveEvent::SessionState {
                state: SessionState::Closed,
                current_round: 3,
                ..
            }
        ));
        // Connections are terminated after the final event.
        assert!(host.receiver.recv().await.is_none());
        assert!(host.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_close_session_is_idempotent_and_terminates_connections() {
        let (games, _) = coordinator();
        let created = games.create_game("host", 3, Value::Null).await.unwrap();
        let id = &created.session_id;
        let mut host = games.connect(id, "host").unwrap();

        let first = games.close_session(id).await.unwrap();
        let second = games.close_session(id).await.unwrap();
        assert_eq!(first.state, SessionState::Closed);
        assert_eq!(first, second);

        assert!(matches!(
            next_event(&mut host).await,
            LiveEvent::SessionState {
                state: SessionState::Closed,
                ..
            }
        ));
        assert!(host.receiver.recv().await.is_none());
        assert_eq!(games.hub().connection_count(id), 0);

        assert!(matches!(
            games.publish_update(id, scores(1)).await.unwrap_err(),
            GameError::SessionClosed(_)
        ));
        assert!(matches!(
            games.join_game(id, "p1", "").await.unwrap_err(),
            GameError::SessionClosed(_)
        ));
    }

    #[tokio::test]
    async fn test_connect_to_closed_session_is_rejected() {
        let (games, _) = coordinator();
        let created = games.create_game("host", 3, Value::Null).await.unwrap();
        let id = &created.session_id;
        games.join_game(id, "p1", "").await.unwrap();
        games.close_session(id).await.unwrap();

        for identity in ["p1", "host"] {
            assert!(matches!(
                games.connect(id, identity).unwrap_err(),
                GameError::SessionClosed(_)
            ));
        }
        assert_eq!(games.hub().connection_count(id), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_connect_racing_close_leaves_no_connection() {
        for _ in 0..50 {
            let (games, _) = coordinator();
            let created = games.create_game("host", 3, Value::Null).await.unwrap();
            let id = created.session_id.clone();

            let connector = {
                let games = games.clone();
                let id = id.clone();
                tokio::spawn(async move { games.connect(&id, "host").is_ok() })
            };
            games.close_session(&id).await.unwrap();
            connector.await.unwrap();

            assert_eq!(games.hub().connection_count(&id), 0);
        }
    }

    #[tokio::test]
    async fn test_connect_to_evicted_session_registers_nothing() {
        let config = GameServiceConfig {
            closed_retention: Duration::ZERO,
            ..Default::default()
        };
        let (games, _) = coordinator_with(config);
        let created = games.create_game("host", 3, Value::Null).await.unwrap();
        let id = &created.session_id;
        games.close_session(id).await.unwrap();
        games.sweep_closed();

        assert!(matches!(
            games.connect(id, "host").unwrap_err(),
            GameError::SessionNotFound(_)
        ));
        assert_eq!(games.hub().connection_count(id), 0);
    }

    #[tokio::test]
    async fn test_join_retry_persists_membership_after_storage_failure() {
        let repo = Arc::new(FailOnceRepository::default());
        let games = GameCoordinator::new(repo.clone(), GameServiceConfig::default());
        let created = games.create_game("host", 3, Value::Null).await.unwrap();
        let id = &created.session_id;

        let err = games.join_game(id, "p1", "quant").await.unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
        assert!(err.is_retryable());
        assert!(repo.inner.members(id).is_empty());

        let err = games.join_game(id, "p1", "quant").await.unwrap_err();
        assert!(matches!(err, GameError::AlreadyJoined { .. }));
        let stored = repo.inner.members(id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].specialization, "quant");
        assert_eq!(games.registry().get(id).unwrap().session.member_count, 1);
    }

    #[tokio::test]
    async fn test_state_persistence_failure_is_not_rolled_back() {
        let repo = Arc::new(FlakyRepository::default());
        let games = GameCoordinator::new(repo, GameServiceConfig::default());
        let created = games.create_game("host", 3, Value::Null).await.unwrap();

        let session = games.start_game(&created.session_id, "host").await.unwrap();
        assert_eq!(session.state, SessionState::InProgress);
        assert_eq!(
            games.get_game(&created.session_id).await.unwrap().state,
            SessionState::InProgress
        );
    }

    #[tokio::test]
    async fn test_get_game_view() {
        let (games, _) = coordinator();
        let created = games
            .create_game("host", 4, json!({"mode": "marketcap"}))
            .await
            .unwrap();
        games.join_game(&created.session_id, "p1", "quant").await.unwrap();
        let _conn = games.connect(&created.session_id, "p1").unwrap();

        let view = games.get_game(&created.session_id).await.unwrap();
        assert_eq!(view.host_id, "host");
        assert_eq!(view.rounds, 4);
        assert_eq!(view.capacity, 8);
        assert_eq!(view.member_count, 1);
        assert_eq!(view.persisted_member_count, Some(1));
        assert_eq!(view.connection_count, 1);
        assert_eq!(view.invite_code.as_deref(), Some(created.invite_code.as_str()));
        assert_eq!(view.scoring_rules, json!({"mode": "marketcap"}));
        assert_eq!(view.members[0].specialization, "quant");

        games.start_game(&created.session_id, "host").await.unwrap();
        let view = games.get_game(&created.session_id).await.unwrap();
        assert_eq!(view.invite_code, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_grace_closes_abandoned_session() {
        let (games, _) = coordinator();
        let created = games.create_game("host", 3, Value::Null).await.unwrap();
        let id = created.session_id.clone();

        let conn = games.connect(&id, "host").unwrap();
        games.disconnect(&id, conn.id);

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert_eq!(
            games.registry().get(&id).unwrap().session.state,
            SessionState::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_reconnect_cancels_grace() {
        let (games, _) = coordinator();
        let created = games.create_game("host", 3, Value::Null).await.unwrap();
        let id = created.session_id.clone();

        let first = games.connect(&id, "host").unwrap();
        games.disconnect(&id, first.id);
        tokio::time::sleep(Duration::from_secs(10)).await;
        let _second = games.connect(&id, "host").unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(
            games.registry().get(&id).unwrap().session.state,
            SessionState::Open
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_disconnect_keeps_seat_and_session() {
        let (games, _) = coordinator();
        let created = games.create_game("host", 3, Value::Null).await.unwrap();
        let id = created.session_id.clone();
        games.join_game(&id, "p1", "").await.unwrap();

        let conn = games.connect(&id, "p1").unwrap();
        games.disconnect(&id, conn.id);
        games.disconnect(&id, conn.id);

        tokio::time::sleep(Duration::from_secs(60)).await;
        let snapshot = games.registry().get(&id).unwrap();
        assert_eq!(snapshot.session.state, SessionState::Open);
        assert_eq!(snapshot.session.member_count, 1);
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_expired_closed_sessions() {
        let config = GameServiceConfig {
            closed_retention: Duration::ZERO,
            ..Default::default()
        };
        let (games, _) = coordinator_with(config);
        let open = games.create_game("host", 3, Value::Null).await.unwrap();
        let closed = games.create_game("host", 3, Value::Null).await.unwrap();
        games.close_session(&closed.session_id).await.unwrap();

        let evicted = games.sweep_closed();
        assert_eq!(evicted, vec![closed.session_id.clone()]);
        assert!(matches!(
            games.get_game(&closed.session_id).await.unwrap_err(),
            GameError::SessionNotFound(_)
        ));
        assert!(games.get_game(&open.session_id).await.is_ok());
    }
}
