//! Wire types for Bold Move game sessions.
//!
//! This crate holds every type that crosses a process boundary:
//!
//! - [`events`] - live channel messages pushed from the server to clients
//! - [`commands`] - live channel messages sent by clients
//! - [`api`] - HTTP request and response bodies
//!
//! All JSON field names are camelCase; tagged unions use a `type` (events,
//! commands) or `kind` (game updates) discriminator in snake_case.

pub mod api;
pub mod commands;
pub mod events;

pub use api::{
    CreateGameRequest, CreateGameResponse, GameView, HostActionRequest, JoinGameRequest,
    JoinGameResponse, MemberView, PublishScoresRequest, RoundResponse,
};
pub use commands::LiveCommand;
pub use events::{GameUpdate, LeaderboardEntry, LiveEvent, SessionState};
