//! Daemon configuration loaded from `agentmux.toml`.
//!
//! Every field has a default, so the file is optional. The loader merges
//! whatever sections are present over the defaults; unknown keys are
//! rejected so typos surface at startup instead of silently falling back.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::MuxError;

/// Top-level daemon configuration.
///
/// Flattened from the sectioned TOML file; see the section structs below
/// for the on-disk shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Project name; names the tmux session (`agentmux-<name>`).
    pub project_name: String,
    /// Directory the runtime artifacts (pipes, sockets, logs) live in.
    pub runtime_dir: PathBuf,
    /// Rotate the stdout tap log once it grows past this size.
    pub stdout_log_max_bytes: u64,
    /// Seconds the human terminal must be quiet before injection.
    pub idle_threshold: u64,
    /// Seconds of stdout silence that mean the agent is ready.
    pub silence_timeout: u64,
    /// Lifecycle supervisor poll period, seconds.
    pub poll_interval: u64,
    /// First restart backoff, seconds.
    pub backoff_initial: u64,
    /// Restart backoff ceiling, seconds.
    pub backoff_cap: u64,
    /// Command line that launches the agent inside the pane.
    pub agent_command: String,
    /// Flag appended to `agent_command` on supervisor restarts so the
    /// agent resumes its previous conversation.
    pub resume_flag: String,
    /// Advisory ready-prompt marker looked for in pane snapshots.
    pub ready_marker: String,
    /// Phrases that mark a confirmation prompt in pane snapshots.
    pub confirm_markers: Vec<String>,
    /// Directory the daemon was started from; used to resolve relative paths.
    pub project_root: PathBuf,
}

impl Config {
    /// Load configuration for `project_root`, reading `agentmux.toml` there
    /// if it exists.
    pub fn load(project_root: &Path) -> Result<Self, MuxError> {
        let toml_path = project_root.join("agentmux.toml");
        let raw = if toml_path.exists() {
            let content = std::fs::read_to_string(&toml_path)
                .map_err(|e| MuxError::Config(format!("read {}: {e}", toml_path.display())))?;
            RawConfig::from_toml(&content)?
        } else {
            RawConfig::default()
        };
        Ok(Self::from_raw(raw, project_root))
    }

    /// Parse configuration from a TOML string (for tests and embedding).
    pub fn from_toml(content: &str, project_root: &Path) -> Result<Self, MuxError> {
        Ok(Self::from_raw(RawConfig::from_toml(content)?, project_root))
    }

    fn from_raw(raw: RawConfig, project_root: &Path) -> Self {
        let project_name = raw.project.name.unwrap_or_else(|| {
            project_root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "agentmux".to_string())
        });
        Self {
            project_name,
            runtime_dir: raw.runtime.dir,
            stdout_log_max_bytes: raw.runtime.stdout_log_max_bytes,
            idle_threshold: raw.timing.idle_threshold,
            silence_timeout: raw.timing.silence_timeout,
            poll_interval: raw.timing.poll_interval,
            backoff_initial: raw.recovery.backoff_initial,
            backoff_cap: raw.recovery.backoff_cap,
            agent_command: raw.agent.command,
            resume_flag: raw.agent.resume_flag,
            ready_marker: raw.agent.ready_marker,
            confirm_markers: raw.agent.confirm_markers,
            project_root: project_root.to_path_buf(),
        }
    }

    /// Name of the tmux session this daemon owns.
    pub fn tmux_session(&self) -> String {
        format!("agentmux-{}", self.project_name)
    }

    /// Program name of the agent binary (first token of the launch command).
    ///
    /// Used by the lifecycle supervisor to find the agent child process.
    pub fn agent_program(&self) -> &str {
        let first = self.agent_command.split_whitespace().next().unwrap_or("");
        first.rsplit('/').next().unwrap_or(first)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw(RawConfig::default(), Path::new("."))
    }
}

/// On-disk shape of `agentmux.toml`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    project: ProjectSection,
    #[serde(default)]
    runtime: RuntimeSection,
    #[serde(default)]
    timing: TimingSection,
    #[serde(default)]
    recovery: RecoverySection,
    #[serde(default)]
    agent: AgentSection,
}

impl RawConfig {
    fn from_toml(content: &str) -> Result<Self, MuxError> {
        toml::from_str(content).map_err(|e| MuxError::Config(e.to_string()))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectSection {
    name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuntimeSection {
    #[serde(default = "default_runtime_dir")]
    dir: PathBuf,
    #[serde(default = "default_stdout_log_max_bytes")]
    stdout_log_max_bytes: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            dir: default_runtime_dir(),
            stdout_log_max_bytes: default_stdout_log_max_bytes(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimingSection {
    #[serde(default = "default_idle_threshold")]
    idle_threshold: u64,
    #[serde(default = "default_silence_timeout")]
    silence_timeout: u64,
    #[serde(default = "default_poll_interval")]
    poll_interval: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            idle_threshold: default_idle_threshold(),
            silence_timeout: default_silence_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecoverySection {
    #[serde(default = "default_backoff_initial")]
    backoff_initial: u64,
    #[serde(default = "default_backoff_cap")]
    backoff_cap: u64,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            backoff_initial: default_backoff_initial(),
            backoff_cap: default_backoff_cap(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct AgentSection {
    #[serde(default = "default_agent_command")]
    command: String,
    #[serde(default = "default_resume_flag")]
    resume_flag: String,
    #[serde(default = "default_ready_marker")]
    ready_marker: String,
    #[serde(default = "default_confirm_markers")]
    confirm_markers: Vec<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            resume_flag: default_resume_flag(),
            ready_marker: default_ready_marker(),
            confirm_markers: default_confirm_markers(),
        }
    }
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from("/tmp/agentmux")
}

fn default_stdout_log_max_bytes() -> u64 {
    1_048_576
}

fn default_idle_threshold() -> u64 {
    30
}

fn default_silence_timeout() -> u64 {
    3
}

fn default_poll_interval() -> u64 {
    2
}

fn default_backoff_initial() -> u64 {
    1
}

fn default_backoff_cap() -> u64 {
    60
}

fn default_agent_command() -> String {
    "claude --dangerously-skip-permissions".to_string()
}

fn default_resume_flag() -> String {
    "--continue".to_string()
}

fn default_ready_marker() -> String {
    "\u{276f}".to_string()
}

fn default_confirm_markers() -> Vec<String> {
    ["Yes", "No", "allow", "y/n", "Allow", "yes/no"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = Config::from_toml("", Path::new("/home/user/myproject")).unwrap();
        assert_eq!(cfg.project_name, "myproject");
        assert_eq!(cfg.runtime_dir, PathBuf::from("/tmp/agentmux"));
        assert_eq!(cfg.idle_threshold, 30);
        assert_eq!(cfg.silence_timeout, 3);
        assert_eq!(cfg.poll_interval, 2);
        assert_eq!(cfg.backoff_initial, 1);
        assert_eq!(cfg.backoff_cap, 60);
        assert_eq!(cfg.resume_flag, "--continue");
        assert_eq!(cfg.ready_marker, "\u{276f}");
        assert!(cfg.confirm_markers.contains(&"y/n".to_string()));
    }

    #[test]
    fn partial_toml_merges_over_defaults() {
        let toml = r#"
            [project]
            name = "butler"

            [timing]
            silence_timeout = 5

            [recovery]
            backoff_cap = 120
        "#;
        let cfg = Config::from_toml(toml, Path::new("/srv/butler")).unwrap();
        assert_eq!(cfg.project_name, "butler");
        assert_eq!(cfg.silence_timeout, 5);
        assert_eq!(cfg.backoff_cap, 120);
        // Untouched sections keep defaults.
        assert_eq!(cfg.idle_threshold, 30);
        assert_eq!(cfg.backoff_initial, 1);
    }

    #[test]
    fn session_name_derives_from_project() {
        let cfg = Config::from_toml("[project]\nname = \"x\"", Path::new("/tmp")).unwrap();
        assert_eq!(cfg.tmux_session(), "agentmux-x");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_toml("[timing]\nsilence = 3", Path::new("/tmp")).unwrap_err();
        assert!(matches!(err, MuxError::Config(_)));
    }

    #[test]
    fn agent_program_is_command_basename() {
        let mut cfg = Config::default();
        cfg.agent_command = "/usr/local/bin/claude --dangerously-skip-permissions".into();
        assert_eq!(cfg.agent_program(), "claude");

        cfg.agent_command = "codex exec".into();
        assert_eq!(cfg.agent_program(), "codex");
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.runtime_dir, PathBuf::from("/tmp/agentmux"));
    }

    #[test]
    fn load_reads_file_when_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("agentmux.toml"),
            "[runtime]\ndir = \"/var/run/agentmux\"\n",
        )
        .unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.runtime_dir, PathBuf::from("/var/run/agentmux"));
    }
}
