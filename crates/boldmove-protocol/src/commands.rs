//! Client -> server live commands.

use serde::{Deserialize, Serialize};

/// Messages a client may send over its live connection.
///
/// The live channel is push-only for game state; clients only answer
/// keepalives. Anything else is accepted and ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveCommand {
    /// Pong response to ping.
    Pong,

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pong() {
        let cmd: LiveCommand = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(cmd, LiveCommand::Pong);
    }

    #[test]
    fn test_parse_unknown_command() {
        let cmd: LiveCommand = serde_json::from_str(r#"{"type":"chat","text":"hi"}"#).unwrap();
        assert_eq!(cmd, LiveCommand::Unknown);
    }
}
