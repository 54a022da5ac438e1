//! `agentmux start` -- run the daemon.
//!
//! Startup order follows the hook contract: the control socket must be
//! listening before the agent launches, because a freshly started agent
//! fires its session-start hook immediately.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use agentmux_daemon::lifecycle;
use agentmux_daemon::tmux::{tmux_available, TerminalPane, TmuxPane};
use agentmux_daemon::Daemon;
use agentmux_types::Config;

pub fn run(dir: Option<PathBuf>) -> anyhow::Result<()> {
    let project_root = match dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let config = Config::load(&project_root)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_daemon(config))
}

async fn run_daemon(config: Config) -> anyhow::Result<()> {
    if !tmux_available().await {
        anyhow::bail!("tmux binary not found on PATH");
    }

    let pane = Arc::new(TmuxPane::new(config.tmux_session()));
    let mut daemon = Daemon::new(config.clone(), Arc::clone(&pane) as Arc<dyn TerminalPane>);

    daemon.start_io().await?;

    let launch = lifecycle::launch_command(&config, &daemon.paths().control_sock());
    let created = pane.ensure_session(&launch).await?;
    info!(
        session = pane.session_name(),
        created, "agent session ready"
    );

    daemon.start_agent_tasks().await?;
    daemon.run().await?;
    Ok(())
}
