//! Hook control server.
//!
//! A local stream socket the agent-side hook posts to: each hook
//! invocation connects, sends one JSON line, and disconnects. Turn
//! broadcasts and lifecycle events are forwarded into the daemon event
//! loop; `route` requests are answered on the same connection (the only
//! request type with a response). A malformed payload is logged and the
//! connection closed; the server itself never goes down over a bad client.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use agentmux_types::{MuxError, Turn};

use crate::daemon::DaemonEvent;
use crate::router::OutRouter;

/// Per-connection read timeout. Hook invocations are one-shot; a stalled
/// client must not pin a connection task.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest accepted request line (turns can carry sizeable block arrays).
const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// One request on the control socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    /// A completed agent turn from the turn-completion hook.
    Broadcast {
        session: String,
        #[serde(default)]
        turn: Vec<serde_json::Value>,
        #[serde(default)]
        ts: Option<i64>,
    },
    /// A lifecycle hook event (session start/end, permission request).
    Event {
        event: String,
        #[serde(default)]
        session: String,
        #[serde(default)]
        data: serde_json::Value,
    },
    /// Route a message to an `out.<channel>` pipe.
    Route { channel: String, message: String },
}

/// The control endpoint on `control.sock`.
pub struct ControlServer;

impl ControlServer {
    /// Bind the socket and serve until `shutdown`. Binding failures are
    /// startup-fatal for the daemon; per-connection failures are not.
    pub async fn start(
        path: &Path,
        events: UnboundedSender<DaemonEvent>,
        router: Arc<OutRouter>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, MuxError> {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(MuxError::Control(format!(
                    "remove stale {}: {e}",
                    path.display()
                )))
            }
        }

        let listener = UnixListener::bind(path)
            .map_err(|e| MuxError::Control(format!("bind {}: {e}", path.display())))?;
        info!(path = %path.display(), "control socket listening");

        let sock_path = path.to_path_buf();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _addr)) => {
                                let events = events.clone();
                                let router = Arc::clone(&router);
                                tokio::spawn(async move {
                                    handle_connection(stream, events, router).await;
                                });
                            }
                            Err(e) => warn!(error = %e, "control socket accept error"),
                        }
                    }
                    _ = shutdown.wait_for(|&stop| stop) => {
                        debug!("control socket shutting down");
                        break;
                    }
                }
            }
            let _ = std::fs::remove_file(&sock_path);
        });
        Ok(handle)
    }
}

/// Handle one short-lived hook connection: one request, maybe one response.
async fn handle_connection(
    stream: UnixStream,
    events: UnboundedSender<DaemonEvent>,
    router: Arc<OutRouter>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let line = match tokio::time::timeout(READ_TIMEOUT, lines.next_line()).await {
        Ok(Ok(Some(line))) => line,
        Ok(Ok(None)) => return,
        Ok(Err(e)) => {
            debug!(error = %e, "control connection read failed");
            return;
        }
        Err(_) => {
            warn!("control connection timed out");
            return;
        }
    };

    if line.len() > MAX_REQUEST_BYTES {
        warn!(len = line.len(), "oversized control request dropped");
        return;
    }

    let request: ControlRequest = match serde_json::from_str(&line) {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "malformed control payload");
            return;
        }
    };

    match request {
        ControlRequest::Broadcast { session, turn, ts } => {
            let turn = Turn {
                ts: ts.unwrap_or_else(|| chrono::Utc::now().timestamp()),
                session,
                turn,
            };
            let _ = events.send(DaemonEvent::HookBroadcast(turn));
        }
        ControlRequest::Event { event, session, data: _ } => {
            let _ = events.send(DaemonEvent::HookEvent { event, session });
        }
        ControlRequest::Route { channel, message } => {
            let response = match router.route(&channel, &message) {
                Ok(()) => serde_json::json!({"ok": true}),
                Err(e) => serde_json::json!({"ok": false, "error": e.to_string()}),
            };
            let mut out = response.to_string();
            out.push('\n');
            if let Err(e) = writer.write_all(out.as_bytes()).await {
                debug!(error = %e, "route response write failed");
            }
            let _ = writer.flush().await;
        }
    }
}
