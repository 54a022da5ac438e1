//! Terminal session controller.
//!
//! Encapsulates every call to the external `tmux` binary behind the
//! [`TerminalPane`] trait so the rest of the daemon (and the test harness)
//! never shells out directly. The daemon is a *client* of the tmux session:
//! it creates the session on first start but never kills it, which is what
//! lets a daemon restart re-attach to a still-running agent.
//!
//! Input injection uses `send-keys -l` (literal, no key-name lookup) so
//! quoting, backticks, and non-ASCII pass through unchanged, with Enter
//! sent as a separate invocation; combining them would type the word
//! "Enter" into the pane.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use agentmux_types::MuxError;

/// Timeout for a single tmux invocation. A hung tmux (full pane buffer,
/// dead server) must not wedge the daemon's event loop.
const TMUX_TIMEOUT: Duration = Duration::from_secs(10);

/// Abstract pane the daemon writes keystrokes to and observes.
///
/// The daemon holds exactly one implementation at a time and routes all
/// keystroke output through it, making the pane single-writer by
/// construction.
#[async_trait]
pub trait TerminalPane: Send + Sync {
    /// Inject `text` verbatim, without shell or key-name interpretation.
    async fn send_text(&self, text: &str) -> Result<(), MuxError>;

    /// Submit the currently buffered input.
    async fn send_enter(&self) -> Result<(), MuxError>;

    /// The currently visible pane contents.
    async fn capture_pane(&self) -> Result<String, MuxError>;

    /// Duplicate pane stdout into `log_path`. Re-mountable after an agent
    /// restart or a log rotation.
    async fn mount_stdout_tap(&self, log_path: &Path) -> Result<(), MuxError>;

    /// Unix timestamp of the last *human* keystroke in the attached client.
    ///
    /// Keystrokes injected through [`send_text`](Self::send_text) must not
    /// move this value. Returns 0 when unavailable (no client attached).
    async fn client_activity_ts(&self) -> Result<i64, MuxError>;

    /// Best-effort pid of the agent process running in the pane.
    async fn agent_child_pid(&self, program: &str) -> Result<Option<i32>, MuxError>;

    /// `send_text` followed by `send_enter`: one injected logical message.
    async fn send_line(&self, text: &str) -> Result<(), MuxError> {
        self.send_text(text).await?;
        self.send_enter().await
    }
}

/// Check whether tmux is available on the system.
pub async fn tmux_available() -> bool {
    Command::new("tmux")
        .arg("-V")
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// A pane inside a daemon-named tmux session.
pub struct TmuxPane {
    session: String,
}

impl TmuxPane {
    /// Handle for the pane of `session`. No tmux call happens here; use
    /// [`ensure_session`](Self::ensure_session) to create or attach.
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
        }
    }

    /// Attach to the session if it exists, otherwise create it detached
    /// and type `launch_command` into its single pane. Returns whether the
    /// session was newly created. Idempotent.
    ///
    /// Callers must have the control socket listening before this runs:
    /// a fresh launch starts an agent whose hooks post back immediately.
    pub async fn ensure_session(&self, launch_command: &str) -> Result<bool, MuxError> {
        if self.session_exists().await {
            info!(session = self.session, "attaching to existing tmux session");
            return Ok(false);
        }

        info!(session = self.session, "creating tmux session");
        run_tmux(&[
            "new-session", "-d", "-s", &self.session, "-x", "200", "-y", "50",
        ])
        .await?;

        // Type the launch command into the fresh shell.
        self.send_line(launch_command).await?;
        Ok(true)
    }

    /// The tmux session name (attachable via `tmux attach-session -t <name>`).
    pub fn session_name(&self) -> &str {
        &self.session
    }

    /// Check if the tmux session still exists.
    pub async fn session_exists(&self) -> bool {
        Command::new("tmux")
            .args(["has-session", "-t", &self.session])
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Shell pid of the pane, from `#{pane_pid}`.
    async fn pane_pid(&self) -> Result<Option<i32>, MuxError> {
        let out = run_tmux(&[
            "display-message", "-p", "-t", &self.session, "#{pane_pid}",
        ])
        .await?;
        Ok(out.trim().parse().ok())
    }
}

#[async_trait]
impl TerminalPane for TmuxPane {
    async fn send_text(&self, text: &str) -> Result<(), MuxError> {
        run_tmux(&["send-keys", "-t", &self.session, "-l", text]).await?;
        Ok(())
    }

    async fn send_enter(&self) -> Result<(), MuxError> {
        run_tmux(&["send-keys", "-t", &self.session, "Enter"]).await?;
        Ok(())
    }

    async fn capture_pane(&self) -> Result<String, MuxError> {
        run_tmux(&["capture-pane", "-p", "-t", &self.session]).await
    }

    async fn mount_stdout_tap(&self, log_path: &Path) -> Result<(), MuxError> {
        let sink = format!("cat >> '{}'", log_path.display());
        run_tmux(&["pipe-pane", "-O", "-t", &self.session, &sink]).await?;
        debug!(session = self.session, log = %log_path.display(), "stdout tap mounted");
        Ok(())
    }

    async fn client_activity_ts(&self) -> Result<i64, MuxError> {
        // #{client_activity} tracks real client keyboard events only;
        // send-keys does not update it.
        let out = run_tmux(&[
            "display-message", "-p", "-t", &self.session, "#{client_activity}",
        ])
        .await?;
        Ok(out.trim().parse().unwrap_or(0))
    }

    async fn agent_child_pid(&self, program: &str) -> Result<Option<i32>, MuxError> {
        let Some(pane_pid) = self.pane_pid().await? else {
            return Ok(None);
        };

        let output = tokio::time::timeout(
            Duration::from_secs(2),
            Command::new("pgrep")
                .args(["-P", &pane_pid.to_string(), program])
                .output(),
        )
        .await
        .map_err(|_| MuxError::Tmux("pgrep timed out".into()))?
        .map_err(|e| MuxError::Tmux(format!("pgrep: {e}")))?;

        if !output.status.success() {
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.split_whitespace().next().and_then(|s| s.parse().ok()))
    }
}

/// Run one tmux command with a timeout, returning its stdout.
async fn run_tmux(args: &[&str]) -> Result<String, MuxError> {
    let verb = args.first().copied().unwrap_or("");
    let result = tokio::time::timeout(
        TMUX_TIMEOUT,
        Command::new("tmux").args(args).output(),
    )
    .await
    .map_err(|_| {
        MuxError::Tmux(format!(
            "tmux {verb} timed out after {}s",
            TMUX_TIMEOUT.as_secs()
        ))
    })?
    .map_err(|e| MuxError::Tmux(format!("tmux {verb}: {e}")))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(MuxError::Tmux(format!(
            "tmux {verb} exited with {}: {}",
            result.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&result.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tmux_availability_check() {
        // Just verify the probe runs without panicking.
        let _ = tmux_available().await;
    }

    #[tokio::test]
    async fn missing_session_commands_fail_cleanly() {
        if !tmux_available().await {
            return;
        }
        let pane = TmuxPane::new("agentmux-test-no-such-session");
        assert!(!pane.session_exists().await);
        assert!(pane.send_enter().await.is_err());
    }
}
