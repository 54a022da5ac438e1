mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// agentmux -- multiplexer daemon for an interactive terminal AI agent.
#[derive(Parser, Debug)]
#[command(name = "agentmux", version, about)]
struct Cli {
    /// Increase logging verbosity (RUST_LOG=debug)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the daemon for a project directory
    Start {
        /// Project directory (defaults to the current directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Handle an agent hook invocation (payload on stdin); registered by
    /// `start` in the agent's settings
    Hook,

    /// Remove the hook entries `start` installed into the agent settings
    UninstallHooks,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Start { dir } => commands::start::run(dir),
        Commands::Hook => commands::hook::run(),
        Commands::UninstallHooks => commands::hook::uninstall(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_start_with_dir() {
        let cli = Cli::parse_from(["agentmux", "start", "--dir", "/srv/project"]);
        match cli.command {
            Commands::Start { dir } => assert_eq!(dir.unwrap(), PathBuf::from("/srv/project")),
            other => panic!("expected Start, got {other:?}"),
        }
    }

    #[test]
    fn parses_hook_subcommand() {
        let cli = Cli::parse_from(["agentmux", "hook"]);
        assert!(matches!(cli.command, Commands::Hook));
    }
}
