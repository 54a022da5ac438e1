//! Agent process lifecycle supervision.
//!
//! Polls the pane for agent liveness and restarts the agent with capped
//! exponential backoff on crash. The restart counter grows monotonically
//! and is never reset: after a long stable period the next crash still
//! restarts at the dampened interval, which keeps a 24/7 daemon from
//! entering restart storms.
//!
//! Crash detection is two-level: the agent child pid (best-effort,
//! recovered from the pane) and a pane-snapshot fallback when no pid can
//! be found.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use agentmux_types::Config;

use crate::daemon::DaemonEvent;
use crate::tmux::TerminalPane;

/// Window after launch or restart during which liveness checks are
/// skipped; the agent takes several seconds to come up.
const STARTUP_GRACE: Duration = Duration::from_secs(10);

/// Backoff before restart attempt `restart_count`: `min(initial * 2^n, cap)`.
pub fn backoff_delay(initial: u64, cap: u64, restart_count: u32) -> u64 {
    let factor = 2u64.saturating_pow(restart_count);
    initial.saturating_mul(factor).min(cap)
}

/// Snapshot fallback for liveness: does the pane still look like the agent?
///
/// The agent's prompt carries the ready marker; a bare shell prompt on the
/// last non-blank line means the agent exited back to the shell. Anything
/// ambiguous reads as dead, which at worst triggers a dampened restart.
pub fn pane_shows_agent(capture: &str, ready_marker: &str) -> bool {
    let Some(last) = capture.lines().rev().find(|l| !l.trim().is_empty()) else {
        return false;
    };
    !ready_marker.is_empty() && last.contains(ready_marker)
}

/// Launch command typed into a fresh pane: control socket env plus the
/// configured agent command.
pub fn launch_command(config: &Config, control_sock: &Path) -> String {
    format!(
        "AGENTMUX_CONTROL_SOCK={} {}",
        control_sock.display(),
        config.agent_command
    )
}

/// Restart command: the launch command plus the resume flag so the agent
/// continues its previous conversation.
pub fn restart_command(config: &Config, control_sock: &Path) -> String {
    format!(
        "{} {}",
        launch_command(config, control_sock),
        config.resume_flag
    )
}

/// Supervises the agent in the pane.
pub struct LifecycleSupervisor;

impl LifecycleSupervisor {
    pub fn spawn(
        pane: std::sync::Arc<dyn TerminalPane>,
        config: Config,
        control_sock: PathBuf,
        events: UnboundedSender<DaemonEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        Self::spawn_with_grace(pane, config, control_sock, events, shutdown, STARTUP_GRACE)
    }

    /// Like [`spawn`](Self::spawn) with an explicit startup grace window.
    pub fn spawn_with_grace(
        pane: std::sync::Arc<dyn TerminalPane>,
        config: Config,
        control_sock: PathBuf,
        events: UnboundedSender<DaemonEvent>,
        shutdown: watch::Receiver<bool>,
        grace: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(run(pane, config, control_sock, events, shutdown, grace))
    }
}

async fn run(
    pane: std::sync::Arc<dyn TerminalPane>,
    config: Config,
    control_sock: PathBuf,
    events: UnboundedSender<DaemonEvent>,
    mut shutdown: watch::Receiver<bool>,
    grace: Duration,
) {
    let poll = Duration::from_secs(config.poll_interval.max(1));
    let mut restart_count: u32 = 0;
    let mut last_pid: i32 = 0;

    if wait_or_shutdown(grace, &mut shutdown).await {
        return;
    }

    loop {
        if wait_or_shutdown(poll, &mut shutdown).await {
            return;
        }

        match probe(&*pane, &config).await {
            Probe::Alive(pid) => {
                if pid != 0 {
                    last_pid = pid;
                }
                continue;
            }
            Probe::Dead => {}
        }

        warn!(pid = last_pid, "process_crash");

        let backoff = backoff_delay(config.backoff_initial, config.backoff_cap, restart_count);
        restart_count += 1;
        info!(
            restart_count,
            backoff_seconds = backoff,
            "agent died, restarting after backoff"
        );
        if wait_or_shutdown(Duration::from_secs(backoff), &mut shutdown).await {
            return;
        }

        let cmd = restart_command(&config, &control_sock);
        if let Err(e) = pane.send_line(&cmd).await {
            error!(error = %e, "agent restart failed");
            continue;
        }

        info!(restart_count, backoff_seconds = backoff, "process_restart");
        let _ = events.send(DaemonEvent::AgentRestarted {
            restart_count,
            backoff_seconds: backoff,
        });

        if wait_or_shutdown(grace, &mut shutdown).await {
            return;
        }
    }
}

enum Probe {
    Alive(i32),
    Dead,
}

async fn probe(pane: &dyn TerminalPane, config: &Config) -> Probe {
    match pane.agent_child_pid(config.agent_program()).await {
        Ok(Some(pid)) => return Probe::Alive(pid),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "agent pid probe failed"),
    }

    match pane.capture_pane().await {
        Ok(capture) if pane_shows_agent(&capture, &config.ready_marker) => Probe::Alive(0),
        Ok(_) => Probe::Dead,
        Err(e) => {
            warn!(error = %e, "pane capture failed during liveness check");
            Probe::Dead
        }
    }
}

/// Sleep for `duration`, returning true if shutdown fired first.
async fn wait_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.wait_for(|&stop| stop) => true,
    }
}
