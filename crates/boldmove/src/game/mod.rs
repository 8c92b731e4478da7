//! Session coordinator.
//!
//! The only entry point the HTTP and live layers talk to.

mod service;

pub use service::{GameCoordinator, GameServiceConfig};
