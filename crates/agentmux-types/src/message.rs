//! Wire records: producer messages, completed agent turns, readiness state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of input accepted from a producer.
///
/// Created when a channel reader parses one complete input line; destroyed
/// after successful injection into the agent's pane. Messages from the same
/// channel keep their arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Short channel identifier, inferred from the pipe filename or
    /// overridden by a JSON payload.
    pub channel: String,
    /// Message text. Expected single-line, at most 4 KiB.
    pub content: String,
    /// Producer timestamp, Unix seconds.
    pub ts: i64,
    /// Opaque key-value metadata forwarded from the producer payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Map<String, Value>>,
}

impl Message {
    /// Construct a plain-text message with no metadata.
    pub fn text(channel: impl Into<String>, content: impl Into<String>, ts: i64) -> Self {
        Self {
            channel: channel.into(),
            content: content.into(),
            ts,
            meta: None,
        }
    }
}

/// One completed agent reply, as delivered by the turn-completion hook.
///
/// The `turn` blocks are forwarded verbatim from the agent transcript;
/// the daemon never interprets them beyond serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Completion timestamp, Unix seconds.
    pub ts: i64,
    /// Agent-assigned session identifier (opaque).
    pub session: String,
    /// Ordered sequence of typed content blocks.
    pub turn: Vec<Value>,
}

/// Agent readiness as derived by the readiness detector.
///
/// Only the detector writes this state; everyone else reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Stdout has been silent past the configured window and no
    /// confirmation prompt is visible.
    Ready,
    /// Stdout is still active (the agent is generating).
    Busy,
    /// A confirmation prompt is visible in the pane.
    Confirm,
}

impl ReadyState {
    /// Lowercase label used in log events.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyState::Ready => "ready",
            ReadyState::Busy => "busy",
            ReadyState::Confirm => "confirm",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_meta_is_optional_on_the_wire() {
        let msg: Message =
            serde_json::from_str(r#"{"channel":"a","content":"hi","ts":5}"#).unwrap();
        assert_eq!(msg, Message::text("a", "hi", 5));

        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("meta"), "absent meta should not serialize");
    }

    #[test]
    fn turn_blocks_survive_verbatim() {
        let raw = r#"{"ts":1,"session":"s1","turn":[{"type":"text","text":"hi"},{"type":"tool_use","name":"Bash","input":{"command":"ls"}}]}"#;
        let turn: Turn = serde_json::from_str(raw).unwrap();
        assert_eq!(turn.turn.len(), 2);
        assert_eq!(turn.turn[1]["input"]["command"], "ls");
    }

    #[test]
    fn ready_state_labels() {
        assert_eq!(ReadyState::Ready.as_str(), "ready");
        assert_eq!(ReadyState::Busy.as_str(), "busy");
        assert_eq!(ReadyState::Confirm.as_str(), "confirm");
    }
}
