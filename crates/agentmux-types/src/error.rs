//! Error types shared across all agentmux crates.

/// Errors that can occur across the agentmux runtime.
///
/// Each variant corresponds to a different subsystem: configuration, the
/// terminal multiplexer, input/output channels, the local socket endpoints,
/// or agent lifecycle supervision.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Config(String),

    /// tmux invocation failure or timeout.
    #[error("tmux error: {0}")]
    Tmux(String),

    /// Input or output channel (named pipe) error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Control or broadcast socket error.
    #[error("control error: {0}")]
    Control(String),

    /// Agent lifecycle supervision error.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            MuxError::Config("missing field".into()).to_string(),
            "configuration error: missing field"
        );
        assert_eq!(
            MuxError::Tmux("send-keys exited with 1".into()).to_string(),
            "tmux error: send-keys exited with 1"
        );
        assert_eq!(
            MuxError::Channel("fifo gone".into()).to_string(),
            "channel error: fifo gone"
        );
        assert_eq!(
            MuxError::Control("bind failed".into()).to_string(),
            "control error: bind failed"
        );
        assert_eq!(
            MuxError::Lifecycle("pane lost".into()).to_string(),
            "lifecycle error: pane lost"
        );
    }
}
