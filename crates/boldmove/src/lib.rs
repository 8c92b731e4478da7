//! Bold Move game session server.
//!
//! Hosts create sessions, players join them under a fixed capacity, and every
//! participant receives live score updates over a WebSocket.

pub mod api;
pub mod db;
pub mod error;
pub mod game;
pub mod repository;
pub mod session;
pub mod ws;
