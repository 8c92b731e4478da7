//! Session registry.
//!
//! The in-memory, authoritative record of every live game session: existence,
//! capacity, membership and lifecycle state. Persistence is delegated to a
//! [`GameRepository`](crate::repository::GameRepository); the registry never
//! waits on it while holding a session lock.

mod invite;
mod models;
mod registry;

pub use boldmove_protocol::SessionState;
pub use invite::{INVITE_CODE_LEN, generate_invite_code, normalize_invite_code};
pub use models::{JoinOutcome, Membership, RoundOutcome, Session, SessionSnapshot, Transition};
pub use registry::{CodeGenerator, RegistryConfig, SessionRegistry};
