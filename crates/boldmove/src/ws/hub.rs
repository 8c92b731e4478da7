//! Per-session connection hub with snapshot fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use boldmove_protocol::LiveEvent;
use dashmap::DashMap;
use futures::future::join_all;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{GameError, GameResult};

/// Default time a single delivery may wait on a full connection buffer.
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Default size of the per-connection send buffer.
const DEFAULT_CONNECTION_BUFFER: usize = 64;

/// Identifier of a live connection, unique per hub.
pub type ConnectionId = u64;

/// Serialized event shared by every recipient of one broadcast.
pub type Payload = Arc<str>;

/// Answers whether an identity may receive a session's live updates.
pub trait MembershipDirectory: Send + Sync {
    /// True for the host and for joined members. Fails if the session is unknown.
    fn is_participant(&self, session_id: &str, identity: &str) -> GameResult<bool>;
}

/// Hub tuning.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// How long one delivery may wait before the connection is dropped.
    pub send_timeout: Duration,
    /// Messages buffered per connection.
    pub connection_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            send_timeout: DEFAULT_SEND_TIMEOUT,
            connection_buffer: DEFAULT_CONNECTION_BUFFER,
        }
    }
}

/// Hub-side half of a live connection.
#[derive(Debug, Clone)]
struct Subscriber {
    identity: String,
    tx: mpsc::Sender<Payload>,
    cancel: CancellationToken,
}

/// Transport-side half of a live connection, handed to whoever drives the socket.
///
/// Serialized events arrive on `receiver`. `cancel` fires when the hub drops
/// the connection; the driver should then flush what is buffered and close.
#[derive(Debug)]
pub struct LiveConnection {
    pub id: ConnectionId,
    pub session_id: String,
    pub identity: String,
    pub receiver: mpsc::Receiver<Payload>,
    pub cancel: CancellationToken,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections that accepted the message.
    pub delivered: usize,
    /// Connections that failed or timed out and were unregistered.
    pub dropped: usize,
}

type ConnectionSet = Mutex<HashMap<ConnectionId, Subscriber>>;

/// Live connections grouped by session.
///
/// Registration requires a membership (or host identity) in the session.
/// A broadcast snapshots the session's connection set under its lock and
/// sends outside it, each delivery bounded by `send_timeout`, so a stalled
/// connection can neither block registration nor hold up other recipients.
pub struct ConnectionHub {
    directory: Arc<dyn MembershipDirectory>,

    /// Session ID -> connection ID -> subscriber
    sessions: DashMap<String, Arc<ConnectionSet>>,

    next_id: AtomicU64,
    config: HubConfig,
}

impl ConnectionHub {
    /// Create a hub that checks registrations against `directory`.
    pub fn new(directory: Arc<dyn MembershipDirectory>, config: HubConfig) -> Self {
        Self {
            directory,
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Bind a new connection for `identity` to a session.
    pub fn register(&self, session_id: &str, identity: &str) -> GameResult<LiveConnection> {
        if !self.directory.is_participant(session_id, identity)? {
            return Err(GameError::NotAMember {
                session_id: session_id.to_string(),
                identity: identity.to_string(),
            });
        }

        let (tx, receiver) = mpsc::channel(self.config.connection_buffer);
        let cancel = CancellationToken::new();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        {
            // Hold the map entry while inserting so a concurrent cleanup of an
            // empty set cannot orphan this connection.
            let set = self.sessions.entry(session_id.to_string()).or_default();
            lock(&set).insert(
                id,
                Subscriber {
                    identity: identity.to_string(),
                    tx,
                    cancel: cancel.clone(),
                },
            );
        }

        info!(
            "Registered live connection {} for {} in session {}",
            id, identity, session_id
        );
        Ok(LiveConnection {
            id,
            session_id: session_id.to_string(),
            identity: identity.to_string(),
            receiver,
            cancel,
        })
    }

    /// Remove a connection. Unknown or already removed connections are a no-op.
    ///
    /// Returns the identity the connection belonged to if it was removed.
    pub fn unregister(&self, session_id: &str, conn_id: ConnectionId) -> Option<String> {
        let removed = {
            let set = self.sessions.get(session_id)?;
            let removed = lock(&set).remove(&conn_id);
            removed
        };

        self.sessions
            .remove_if(session_id, |_, set| lock(set).is_empty());

        let subscriber = removed?;
        subscriber.cancel.cancel();
        info!(
            "Unregistered live connection {} for {} in session {}",
            conn_id, subscriber.identity, session_id
        );
        Some(subscriber.identity)
    }

    /// Deliver `event` to every connection registered in the session right now.
    ///
    /// The event is serialized once. Connections that are closed, cancelled or
    /// still full after `send_timeout` are unregistered; the others are
    /// unaffected. Sequential broadcasts reach each connection in call order.
    pub async fn broadcast(&self, session_id: &str, event: &LiveEvent) -> GameResult<BroadcastReport> {
        let payload: Payload = serde_json::to_string(event)
            .map_err(|e| GameError::validation(format!("unserializable event: {}", e)))?
            .into();

        let recipients: Vec<(ConnectionId, Subscriber)> = match self.sessions.get(session_id) {
            Some(set) => lock(&set)
                .iter()
                .map(|(id, sub)| (*id, sub.clone()))
                .collect(),
            None => Vec::new(),
        };

        if recipients.is_empty() {
            debug!("Broadcast to session {} with no live connections", session_id);
            return Ok(BroadcastReport::default());
        }

        let send_timeout = self.config.send_timeout;
        let deliveries = recipients.into_iter().map(|(id, sub)| {
            let payload = payload.clone();
            async move {
                let delivered = tokio::select! {
                    _ = sub.cancel.cancelled() => false,
                    sent = tokio::time::timeout(send_timeout, sub.tx.send(payload)) => {
                        matches!(sent, Ok(Ok(())))
                    }
                };
                (id, delivered)
            }
        });

        let mut report = BroadcastReport::default();
        for (id, delivered) in join_all(deliveries).await {
            if delivered {
                report.delivered += 1;
            } else {
                warn!(
                    "Dropping live connection {} in session {}: delivery failed",
                    id, session_id
                );
                if self.unregister(session_id, id).is_some() {
                    report.dropped += 1;
                }
            }
        }

        debug!(
            "Broadcast to session {}: {} delivered, {} dropped",
            session_id, report.delivered, report.dropped
        );
        Ok(report)
    }

    /// Drop every connection of a session. Already buffered messages stay
    /// readable by the connection drivers.
    pub fn close_session(&self, session_id: &str) -> usize {
        let Some((_, set)) = self.sessions.remove(session_id) else {
            return 0;
        };
        let subscribers: Vec<Subscriber> = lock(&set).drain().map(|(_, sub)| sub).collect();
        for sub in &subscribers {
            sub.cancel.cancel();
        }
        if !subscribers.is_empty() {
            info!(
                "Closed {} live connection(s) in session {}",
                subscribers.len(),
                session_id
            );
        }
        subscribers.len()
    }

    /// Number of live connections in a session.
    pub fn connection_count(&self, session_id: &str) -> usize {
        self.sessions
            .get(session_id)
            .map(|set| lock(&set).len())
            .unwrap_or(0)
    }

    /// Number of live connections `identity` holds in a session.
    pub fn identity_connection_count(&self, session_id: &str, identity: &str) -> usize {
        self.sessions
            .get(session_id)
            .map(|set| {
                lock(&set)
                    .values()
                    .filter(|sub| sub.identity == identity)
                    .count()
            })
            .unwrap_or(0)
    }
}

fn lock(set: &ConnectionSet) -> MutexGuard<'_, HashMap<ConnectionId, Subscriber>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}
