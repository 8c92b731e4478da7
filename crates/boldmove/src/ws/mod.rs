//! Live channel for session participants.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Clients (host + players)                   │
//! │  - One WebSocket per participant and session                │
//! │  - Receive LiveEvent stream, send LiveCommand               │
//! └──────────────────────────────┬──────────────────────────────┘
//!                                │ GET /events/{sessionId}
//! ┌──────────────────────────────▼──────────────────────────────┐
//! │                      Connection Hub                         │
//! │  - Per-session connection sets                              │
//! │  - Snapshot fan-out with bounded per-connection sends       │
//! └──────────────────────────────┬──────────────────────────────┘
//!                                │ membership checks
//! ┌──────────────────────────────▼──────────────────────────────┐
//! │                     Session Registry                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod handler;
mod hub;

pub use handler::live_handler;
pub use hub::{
    BroadcastReport, ConnectionHub, ConnectionId, HubConfig, LiveConnection, MembershipDirectory,
    Payload,
};
