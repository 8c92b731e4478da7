//! Persistence of game and player rows.
//!
//! The session core only talks to the [`GameRepository`] trait. Two backends
//! are provided:
//! - [`MemoryRepository`] - process-local maps (tests, ephemeral servers)
//! - [`SqliteRepository`] - SQLite through sqlx

mod error;
mod memory;
mod sqlite;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;
pub use traits::GameRepository;
