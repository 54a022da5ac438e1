//! Output broadcaster.
//!
//! A local stream socket that fans each completed [`Turn`] out to every
//! connected subscriber as one JSON line. Subscribers get no replay and no
//! backfill; a write failure closes only the failing subscriber. With zero
//! subscribers a turn is still logged by the caller and then dropped.

use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixListener;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use agentmux_types::MuxError;

/// Fan-out endpoint on `output.sock`.
#[derive(Clone)]
pub struct OutputBroadcaster {
    writers: Arc<Mutex<Vec<OwnedWriteHalf>>>,
}

impl OutputBroadcaster {
    /// Bind the socket and start accepting subscribers until `shutdown`.
    pub async fn start(
        path: &Path,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<Self, MuxError> {
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
        info!(path = %path.display(), "output socket listening");

        let writers: Arc<Mutex<Vec<OwnedWriteHalf>>> = Arc::new(Mutex::new(Vec::new()));
        let accept_writers = Arc::clone(&writers);
        let sock_path = path.to_path_buf();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _addr)) => {
                                // Subscribers never send; keep only the write half.
                                let (_read, write) = stream.into_split();
                                let mut writers = accept_writers.lock().await;
                                writers.push(write);
                                debug!(count = writers.len(), "subscriber connected");
                            }
                            Err(e) => warn!(error = %e, "output socket accept error"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("output socket shutting down");
                            break;
                        }
                    }
                }
            }
            accept_writers.lock().await.clear();
            let _ = std::fs::remove_file(&sock_path);
        });

        Ok(Self { writers })
    }

    /// Send one JSON line to every subscriber. Subscribers whose write
    /// fails are dropped. Returns the number of subscribers that received
    /// the payload.
    pub async fn broadcast(&self, payload: &serde_json::Value) -> usize {
        let mut data = payload.to_string();
        data.push('\n');
        let bytes = data.as_bytes();

        let mut writers = self.writers.lock().await;
        let mut alive = Vec::with_capacity(writers.len());
        let mut delivered = 0;
        for mut writer in writers.drain(..) {
            match writer.write_all(bytes).await {
                Ok(()) => {
                    delivered += 1;
                    alive.push(writer);
                }
                Err(e) => {
                    debug!(error = %e, "dropping dead subscriber");
                }
            }
        }
        *writers = alive;
        delivered
    }

    pub async fn subscriber_count(&self) -> usize {
        self.writers.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::UnixStream;

    async fn connect_subscriber(path: &Path) -> BufReader<UnixStream> {
        BufReader::new(UnixStream::connect(path).await.unwrap())
    }

    async fn read_line(reader: &mut BufReader<UnixStream>) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        line
    }

    #[tokio::test]
    async fn fan_out_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("output.sock");
        let (_stop_tx, stop_rx) = watch::channel(false);
        let broadcaster = OutputBroadcaster::start(&sock, stop_rx).await.unwrap();

        let mut a = connect_subscriber(&sock).await;
        let mut b = connect_subscriber(&sock).await;
        let mut c = connect_subscriber(&sock).await;

        // Wait until all three registrations land.
        for _ in 0..50 {
            if broadcaster.subscriber_count().await == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let payload = serde_json::json!({"ts": 1, "session": "s", "turn": [{"type": "text", "text": "hi"}]});
        assert_eq!(broadcaster.broadcast(&payload).await, 3);

        let la = read_line(&mut a).await;
        let lb = read_line(&mut b).await;
        let lc = read_line(&mut c).await;
        assert_eq!(la, lb);
        assert_eq!(lb, lc);
        assert!(la.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(la.trim()).unwrap();
        assert_eq!(parsed["session"], "s");
    }

    #[tokio::test]
    async fn dead_subscriber_is_dropped_others_survive() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("output.sock");
        let (_stop_tx, stop_rx) = watch::channel(false);
        let broadcaster = OutputBroadcaster::start(&sock, stop_rx).await.unwrap();

        let mut keep = connect_subscriber(&sock).await;
        let drop_me = connect_subscriber(&sock).await;
        for _ in 0..50 {
            if broadcaster.subscriber_count().await == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(drop_me);
        // Give the peer close time to propagate.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let payload = serde_json::json!({"ts": 2, "session": "s", "turn": []});
        // First broadcast may still count the half-closed peer; the second
        // one must not.
        broadcaster.broadcast(&payload).await;
        broadcaster.broadcast(&payload).await;
        assert_eq!(broadcaster.subscriber_count().await, 1);

        let line = read_line(&mut keep).await;
        assert!(line.contains("\"session\""));
    }

    #[tokio::test]
    async fn no_subscribers_returns_zero() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("output.sock");
        let (_stop_tx, stop_rx) = watch::channel(false);
        let broadcaster = OutputBroadcaster::start(&sock, stop_rx).await.unwrap();

        let payload = serde_json::json!({"ts": 3, "session": "s", "turn": []});
        assert_eq!(broadcaster.broadcast(&payload).await, 0);
    }

    #[tokio::test]
    async fn shutdown_unlinks_socket() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("output.sock");
        let (stop_tx, stop_rx) = watch::channel(false);
        let _broadcaster = OutputBroadcaster::start(&sock, stop_rx).await.unwrap();
        assert!(sock.exists());

        stop_tx.send(true).unwrap();
        for _ in 0..50 {
            if !sock.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("socket file should be unlinked on shutdown");
    }
}
