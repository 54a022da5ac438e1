//! Outbound channel routing.
//!
//! The daemon may write routed agent outputs to producer-created
//! `out.<name>` pipes. It never creates those pipes; a missing pipe or a
//! pipe nobody is reading surfaces as a structured error to the caller
//! (typically an external tool server relaying for the agent) and the
//! daemon carries on.

use std::os::fd::{AsFd, FromRawFd, OwnedFd};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use tracing::{info, warn};

use agentmux_types::MuxError;

use crate::paths::RuntimePaths;

/// Writes routed outputs into `out.<channel>` pipes.
pub struct OutRouter {
    paths: RuntimePaths,
}

impl OutRouter {
    pub fn new(paths: RuntimePaths) -> Self {
        Self { paths }
    }

    /// Deliver one message line to `out.<channel>`.
    ///
    /// The open is non-blocking, so a pipe with no reader fails fast
    /// instead of wedging the daemon.
    pub fn route(&self, channel: &str, message: &str) -> Result<(), MuxError> {
        let fifo = self.paths.out_channel(channel);
        if !fifo.exists() {
            warn!(channel, "route target does not exist");
            return Err(MuxError::Channel(format!(
                "channel '{channel}' not found (out.{channel} does not exist)"
            )));
        }

        let raw_fd = match nix::fcntl::open(&fifo, OFlag::O_WRONLY | OFlag::O_NONBLOCK, Mode::empty())
        {
            Ok(fd) => fd,
            Err(Errno::ENXIO) => {
                warn!(channel, "route target has no reader");
                return Err(MuxError::Channel(format!(
                    "channel '{channel}' is not being read (no reader on out.{channel})"
                )));
            }
            Err(e) => {
                return Err(MuxError::Channel(format!(
                    "open out.{channel}: {e}"
                )))
            }
        };
        let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };

        let mut payload = message.trim_end_matches('\n').to_string();
        payload.push('\n');
        let bytes = payload.as_bytes();

        let mut written = 0;
        while written < bytes.len() {
            match nix::unistd::write(fd.as_fd(), &bytes[written..]) {
                Ok(n) => written += n,
                Err(Errno::EAGAIN) => {
                    warn!(channel, "route target pipe is full");
                    return Err(MuxError::Channel(format!(
                        "channel '{channel}' is not being read (pipe full)"
                    )));
                }
                Err(e) => {
                    return Err(MuxError::Channel(format!(
                        "write out.{channel}: {e}"
                    )))
                }
            }
        }

        info!(channel, message_len = message.len(), "tool_called");
        Ok(())
    }
}
