//! Runtime directory layout.
//!
//! One configured directory holds every channel artifact: the default input
//! pipe `in`, producer-created `in.<name>` / `out.<name>` pipes, the two
//! local stream sockets, and the stdout tap log. This module names all of
//! those paths and prepares the directory at startup. The daemon only ever
//! creates `in`, the sockets, and the log; named pipes belong to producers.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;

use agentmux_types::MuxError;

/// Filename of the default input pipe.
pub const DEFAULT_IN: &str = "in";
/// Filename of the hook-to-daemon control socket.
pub const CONTROL_SOCK: &str = "control.sock";
/// Filename of the broadcast socket.
pub const OUTPUT_SOCK: &str = "output.sock";
/// Filename of the stdout tap log written by `tmux pipe-pane`.
pub const STDOUT_LOG: &str = "stdout.log";

/// Path map over the runtime directory.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    root: PathBuf,
}

impl RuntimePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The default input pipe, `<root>/in`.
    pub fn default_in(&self) -> PathBuf {
        self.root.join(DEFAULT_IN)
    }

    /// The hook control socket, `<root>/control.sock`.
    pub fn control_sock(&self) -> PathBuf {
        self.root.join(CONTROL_SOCK)
    }

    /// The broadcast socket, `<root>/output.sock`.
    pub fn output_sock(&self) -> PathBuf {
        self.root.join(OUTPUT_SOCK)
    }

    /// The stdout tap log, `<root>/stdout.log`.
    pub fn stdout_log(&self) -> PathBuf {
        self.root.join(STDOUT_LOG)
    }

    /// A named output pipe, `<root>/out.<channel>`.
    pub fn out_channel(&self, channel: &str) -> PathBuf {
        self.root.join(format!("out.{channel}"))
    }

    /// The hook failure log written by the hook runtime.
    pub fn hook_errors_log(&self) -> PathBuf {
        self.root.join("hook_errors.log")
    }

    /// Prepare the runtime directory for a daemon start.
    ///
    /// Creates the directory with owner-only permissions, creates the
    /// default `in` pipe if missing, and removes stale socket files from a
    /// previous run. Producer-owned `in.<name>` / `out.<name>` pipes are
    /// left alone.
    pub fn ensure(&self) -> Result<(), MuxError> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| MuxError::Config(format!("create {}: {e}", self.root.display())))?;
        std::fs::set_permissions(&self.root, std::fs::Permissions::from_mode(0o700))
            .map_err(|e| MuxError::Config(format!("chmod {}: {e}", self.root.display())))?;

        let fifo = self.default_in();
        if !fifo.exists() {
            nix::unistd::mkfifo(&fifo, Mode::from_bits_truncate(0o600))
                .map_err(|e| MuxError::Channel(format!("mkfifo {}: {e}", fifo.display())))?;
        }

        for sock in [self.control_sock(), self.output_sock()] {
            match std::fs::remove_file(&sock) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(MuxError::Config(format!(
                        "remove stale {}: {e}",
                        sock.display()
                    )))
                }
            }
        }
        Ok(())
    }

    /// Remove the endpoint files this daemon created. Called on shutdown;
    /// producer pipes and the tap log survive for the next run.
    pub fn cleanup(&self) {
        for path in [self.control_sock(), self.output_sock()] {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// True when `name` is an input pipe name (`in` or `in.<channel>`).
pub fn is_input_name(name: &str) -> bool {
    name == DEFAULT_IN || name.starts_with("in.")
}

/// True when `name` is an output pipe name (`out.<channel>`).
pub fn is_output_name(name: &str) -> bool {
    name.starts_with("out.")
}

/// Derive a channel name from a pipe filename (`in.telegram` -> `telegram`,
/// `in` -> `default`).
pub fn channel_from_name(name: &str) -> String {
    match name.strip_prefix("in.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => "default".to_string(),
    }
}
