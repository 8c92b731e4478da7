//! In-memory session registry with per-session capacity enforcement.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, info, warn};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{GameError, GameResult};
use crate::repository::GameRepository;
use crate::ws::MembershipDirectory;

use super::invite::{generate_invite_code, normalize_invite_code};
use super::models::{JoinOutcome, Membership, RoundOutcome, Session, SessionSnapshot, Transition};
use super::SessionState;

/// Default number of members per session.
const DEFAULT_CAPACITY: u32 = 8;

/// Default bound on invite code generation attempts.
const DEFAULT_INVITE_CODE_ATTEMPTS: usize = 16;

/// Source of candidate invite codes.
pub type CodeGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Registry limits.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub min_rounds: u32,
    pub max_rounds: u32,
    pub capacity: u32,
    /// Invite codes tried before giving up with `GenerationExhausted`.
    pub invite_code_attempts: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            min_rounds: 3,
            max_rounds: 10,
            capacity: DEFAULT_CAPACITY,
            invite_code_attempts: DEFAULT_INVITE_CODE_ATTEMPTS,
        }
    }
}

/// Mutable state of one session, guarded by that session's mutex.
#[derive(Debug)]
struct SessionEntry {
    session: Session,
    members: Vec<Membership>,
}

impl SessionEntry {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session: self.session.clone(),
            members: self.members.clone(),
        }
    }

    fn is_member(&self, player_id: &str) -> bool {
        self.members.iter().any(|m| m.player_id == player_id)
    }
}

/// Authoritative map of active sessions.
///
/// Each session sits behind its own mutex, so callers working on different
/// sessions never contend. Every check-and-mutate happens inside one critical
/// section of that mutex and never spans repository I/O.
pub struct SessionRegistry {
    /// Session ID -> session state
    sessions: DashMap<String, Arc<Mutex<SessionEntry>>>,

    /// Invite code -> session ID, for open sessions only
    invites: DashMap<String, String>,

    repository: Arc<dyn GameRepository>,
    config: RegistryConfig,
    code_generator: CodeGenerator,
}

impl SessionRegistry {
    /// Create a registry backed by `repository`.
    pub fn new(repository: Arc<dyn GameRepository>, config: RegistryConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            invites: DashMap::new(),
            repository,
            config,
            code_generator: Arc::new(generate_invite_code),
        }
    }

    /// Replace the invite code source.
    pub fn with_code_generator(mut self, generator: CodeGenerator) -> Self {
        self.code_generator = generator;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Create and persist a new open session.
    ///
    /// The invite code is reserved first and released again if persistence
    /// fails, so a failed create leaves nothing behind in memory.
    pub async fn create_session(
        &self,
        host_id: &str,
        rounds: i64,
        scoring_rules: Value,
    ) -> GameResult<Session> {
        let host_id = host_id.trim();
        if host_id.is_empty() {
            return Err(GameError::validation("hostId must not be empty"));
        }
        let rounds = self.validate_rounds(rounds)?;

        let id = format!("game-{}", Uuid::new_v4());
        let invite_code = self.reserve_invite_code(&id)?;

        let session = Session {
            id: id.clone(),
            host_id: host_id.to_string(),
            rounds,
            current_round: 0,
            scoring_rules,
            invite_code: invite_code.clone(),
            capacity: self.config.capacity,
            member_count: 0,
            state: SessionState::Open,
            created_at: Utc::now(),
            closed_at: None,
        };

        if let Err(err) = self.repository.insert_session(&session).await {
            self.invites.remove(&invite_code);
            warn!("Failed to persist session {}, rolled back: {}", id, err);
            return Err(err.into());
        }

        self.sessions.insert(
            id.clone(),
            Arc::new(Mutex::new(SessionEntry {
                session: session.clone(),
                members: Vec::new(),
            })),
        );
        info!(
            "Created session {} for host {} ({} rounds, invite {})",
            id, session.host_id, rounds, invite_code
        );
        Ok(session)
    }

    fn validate_rounds(&self, rounds: i64) -> GameResult<u32> {
        let (min, max) = (self.config.min_rounds, self.config.max_rounds);
        match u32::try_from(rounds) {
            Ok(r) if (min..=max).contains(&r) => Ok(r),
            _ => Err(GameError::validation(format!(
                "rounds must be between {} and {}, got {}",
                min, max, rounds
            ))),
        }
    }

    fn reserve_invite_code(&self, session_id: &str) -> GameResult<String> {
        let attempts = self.config.invite_code_attempts;
        for attempt in 1..=attempts {
            let code = (self.code_generator)();
            match self.invites.entry(code) {
                Entry::Vacant(slot) => {
                    let code = slot.key().clone();
                    slot.insert(session_id.to_string());
                    return Ok(code);
                }
                Entry::Occupied(taken) => {
                    debug!(
                        "Invite code {} already in use (attempt {}/{})",
                        taken.key(),
                        attempt,
                        attempts
                    );
                }
            }
        }
        warn!("Invite code generation exhausted after {} attempts", attempts);
        Err(GameError::GenerationExhausted(attempts))
    }

    fn entry(&self, session_id: &str) -> GameResult<Arc<Mutex<SessionEntry>>> {
        self.sessions
            .get(session_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| GameError::SessionNotFound(session_id.to_string()))
    }

    /// Take a seat in a session.
    ///
    /// Existence, duplicate, capacity and state checks plus the increment are
    /// one indivisible step: of N concurrent callers racing for the last seat
    /// exactly one succeeds. The join that fills the session moves it to
    /// `InProgress`. Nothing is persisted here; see [`Self::persist_membership`].
    pub fn try_join(
        &self,
        session_id: &str,
        player_id: &str,
        specialization: &str,
    ) -> GameResult<JoinOutcome> {
        let player_id = player_id.trim();
        if player_id.is_empty() {
            return Err(GameError::validation("playerId must not be empty"));
        }

        let entry = self.entry(session_id)?;
        let mut guard = lock(&entry);

        if guard.is_member(player_id) {
            return Err(GameError::AlreadyJoined {
                session_id: session_id.to_string(),
                player_id: player_id.to_string(),
            });
        }
        if guard.session.state == SessionState::Closed {
            return Err(GameError::SessionClosed(session_id.to_string()));
        }
        // A session started by filling up still reports the capacity violation.
        if guard.session.is_full() {
            return Err(GameError::CapacityExceeded {
                session_id: session_id.to_string(),
                capacity: guard.session.capacity,
            });
        }
        if !guard.session.is_open() {
            return Err(GameError::SessionClosed(session_id.to_string()));
        }

        let membership = Membership {
            session_id: session_id.to_string(),
            player_id: player_id.to_string(),
            specialization: specialization.to_string(),
            joined_at: Utc::now(),
        };
        guard.members.push(membership.clone());
        guard.session.member_count += 1;
        let member_count = guard.session.member_count;

        let started = guard.session.is_full();
        if started {
            self.apply_state(&mut guard, SessionState::InProgress);
        }
        drop(guard);

        info!(
            "Player {} joined session {} ({}/{})",
            player_id, session_id, member_count, self.config.capacity
        );
        Ok(JoinOutcome {
            membership,
            member_count,
            started,
        })
    }

    /// Persist a membership already committed by [`Self::try_join`].
    ///
    /// A failure is reported but the in-memory seat stands.
    pub async fn persist_membership(&self, membership: &Membership) -> GameResult<()> {
        self.repository
            .insert_membership(membership)
            .await
            .map_err(|err| {
                warn!(
                    "Membership {}/{} kept in memory but not persisted: {}",
                    membership.session_id, membership.player_id, err
                );
                GameError::from(err)
            })
    }

    /// Move a session to `target`.
    ///
    /// Closing an already closed session is a no-op reported with
    /// `changed == false`.
    pub fn transition(&self, session_id: &str, target: SessionState) -> GameResult<Transition> {
        self.transition_checked(session_id, None, target)
    }

    /// Move a session to `target` only if it is currently in `expected`.
    pub fn transition_from(
        &self,
        session_id: &str,
        expected: SessionState,
        target: SessionState,
    ) -> GameResult<Transition> {
        self.transition_checked(session_id, Some(expected), target)
    }

    fn transition_checked(
        &self,
        session_id: &str,
        expected: Option<SessionState>,
        target: SessionState,
    ) -> GameResult<Transition> {
        let entry = self.entry(session_id)?;
        let mut guard = lock(&entry);

        let current = guard.session.state;
        if expected.is_some_and(|expected| expected != current) {
            return Err(GameError::InvalidTransition {
                session_id: session_id.to_string(),
                from: current,
                to: target,
            });
        }
        if current == target && target == SessionState::Closed {
            return Ok(Transition {
                session: guard.session.clone(),
                changed: false,
            });
        }
        if !current.can_transition_to(target) {
            return Err(GameError::InvalidTransition {
                session_id: session_id.to_string(),
                from: current,
                to: target,
            });
        }

        self.apply_state(&mut guard, target);
        info!("Session {} moved {} -> {}", session_id, current, target);
        Ok(Transition {
            session: guard.session.clone(),
            changed: true,
        })
    }

    /// Close a session. Idempotent.
    pub fn close_session(&self, session_id: &str) -> GameResult<Transition> {
        self.transition(session_id, SessionState::Closed)
    }

    /// Record a completed round; the last one closes the session.
    pub fn complete_round(&self, session_id: &str) -> GameResult<RoundOutcome> {
        let entry = self.entry(session_id)?;
        let mut guard = lock(&entry);

        if guard.session.state != SessionState::InProgress {
            return Err(GameError::NotInProgress(session_id.to_string()));
        }

        guard.session.current_round += 1;
        let round = guard.session.current_round;
        let finished = round >= guard.session.rounds;
        if finished {
            self.apply_state(&mut guard, SessionState::Closed);
            info!("Session {} finished after {} rounds", session_id, round);
        }

        Ok(RoundOutcome {
            session: guard.session.clone(),
            round,
            finished,
        })
    }

    /// Set the state and keep the invite index in sync. Caller holds the lock.
    fn apply_state(&self, entry: &mut SessionEntry, target: SessionState) {
        let was_open = entry.session.is_open();
        entry.session.state = target;
        if target == SessionState::Closed {
            entry.session.closed_at = Some(Utc::now());
        }
        if was_open && target != SessionState::Open {
            self.invites
                .remove_if(&entry.session.invite_code, |_, id| *id == entry.session.id);
        }
    }

    /// Snapshot of a session.
    pub fn get(&self, session_id: &str) -> GameResult<SessionSnapshot> {
        let entry = self.entry(session_id)?;
        let guard = lock(&entry);
        Ok(guard.snapshot())
    }

    /// Resolve an invite code to the open session it belongs to.
    pub fn find_by_invite(&self, code: &str) -> GameResult<String> {
        let code = normalize_invite_code(code)
            .ok_or_else(|| GameError::validation(format!("malformed invite code: {}", code)))?;
        self.invites
            .get(&code)
            .map(|id| id.value().clone())
            .ok_or(GameError::SessionNotFound(code))
    }

    /// Host of a session.
    pub fn host_of(&self, session_id: &str) -> GameResult<String> {
        let entry = self.entry(session_id)?;
        let host = lock(&entry).session.host_id.clone();
        Ok(host)
    }

    /// Drop sessions closed for longer than `retention`. Returns their IDs.
    pub fn evict_closed(&self, retention: Duration) -> Vec<String> {
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        else {
            return Vec::new();
        };

        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter_map(|item| {
                let guard = lock(item.value());
                match guard.session.closed_at {
                    Some(closed_at) if closed_at <= cutoff => Some(item.key().clone()),
                    _ => None,
                }
            })
            .collect();

        for id in &expired {
            self.sessions.remove(id);
            debug!("Evicted closed session {}", id);
        }
        expired
    }

    /// Number of sessions held in memory, closed ones included.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl MembershipDirectory for SessionRegistry {
    fn is_participant(&self, session_id: &str, identity: &str) -> GameResult<bool> {
        let entry = self.entry(session_id)?;
        let guard = lock(&entry);
        if guard.session.state == SessionState::Closed {
            return Err(GameError::SessionClosed(session_id.to_string()));
        }
        Ok(guard.session.host_id == identity || guard.is_member(identity))
    }
}

/// The guarded data is always left consistent, so a poisoned lock is still usable.
fn lock(entry: &Mutex<SessionEntry>) -> MutexGuard<'_, SessionEntry> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}
