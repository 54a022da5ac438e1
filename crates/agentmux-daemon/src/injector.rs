//! Keystroke injection of queued messages.
//!
//! A drained batch is formatted one message per line as
//! `[HH:MM channel] content` (local time), sent as a single literal
//! `send_text`, and submitted with exactly one Enter. The injection
//! decision itself lives in the daemon event loop; this module owns the
//! formatting and the send contract.

use chrono::{Local, TimeZone};
use tracing::info;

use agentmux_types::{Message, MuxError};

use crate::tmux::TerminalPane;

/// Why an injection evaluation declined to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Stdout is still active; the agent is generating.
    Busy,
    /// A confirmation prompt is waiting for a human.
    Confirm,
    /// A human used the terminal within the idle threshold.
    TerminalActive,
}

impl SuppressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressReason::Busy => "busy",
            SuppressReason::Confirm => "confirm",
            SuppressReason::TerminalActive => "terminal_active",
        }
    }
}

/// Render a batch into the injection text the agent will see.
pub fn format_batch(messages: &[Message]) -> String {
    let lines: Vec<String> = messages
        .iter()
        .map(|msg| {
            let stamp = Local
                .timestamp_opt(msg.ts, 0)
                .single()
                .unwrap_or_else(Local::now)
                .format("%H:%M");
            format!("[{stamp} {}] {}", msg.channel, msg.content)
        })
        .collect();
    lines.join("\n")
}

/// Inject a formatted batch: one `send_text` and one `send_enter`.
///
/// The Enter goes out as a separate tmux invocation; folding it into the
/// text would submit the literal word instead of the key.
pub async fn inject_batch(
    pane: &dyn TerminalPane,
    messages: &[Message],
) -> Result<(), MuxError> {
    if messages.is_empty() {
        return Ok(());
    }
    let text = format_batch(messages);
    pane.send_text(&text).await?;
    pane.send_enter().await?;
    info!(message_count = messages.len(), "message_injected");
    Ok(())
}
