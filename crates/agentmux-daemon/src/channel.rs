//! Input channel readers.
//!
//! Each registered input pipe gets a reader that opens the FIFO
//! `O_RDWR | O_NONBLOCK` and reads raw bytes under readiness notification.
//! `O_RDWR` keeps a writer reference alive inside the daemon so the pipe
//! never reports EOF when external producers close; `os-level read` (never
//! a buffered line reader) avoids deadlocking against producers that write
//! more than the pipe buffer.
//!
//! Bytes accumulate in a per-channel buffer and one [`Message`] is emitted
//! per newline. A malformed line is logged and skipped; the reader stays
//! registered.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};

use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use agentmux_types::{Message, MuxError};

use crate::paths::channel_from_name;

/// Longest accepted input line. Writes at or below the pipe buffer size are
/// atomic on the OS side; anything longer may interleave between producers
/// and is treated as corrupt.
pub const MAX_LINE_BYTES: usize = 4096;

/// Cap on the per-channel accumulation buffer; a producer that streams
/// bytes without ever sending a newline gets its buffer dropped.
const MAX_BUFFER_BYTES: usize = 64 * 1024;

/// Parse one input line into a [`Message`].
///
/// If the first non-whitespace character is `{`, the line must be a JSON
/// object: `content` is required, `channel` falls back to the
/// filename-derived name, `ts` falls back to `now`, `meta` is optional.
/// A line that is not valid JSON (or does not start with `{`) is taken
/// whole as `content`.
pub fn parse_line(line: &str, fallback_channel: &str, now: i64) -> Result<Message, String> {
    if line.len() > MAX_LINE_BYTES {
        return Err(format!(
            "line of {} bytes exceeds the {} byte limit",
            line.len(),
            MAX_LINE_BYTES
        ));
    }

    let trimmed = line.trim();
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            let content = value
                .get("content")
                .and_then(|v| v.as_str())
                .ok_or_else(|| "json line is missing \"content\"".to_string())?
                .to_string();
            let channel = value
                .get("channel")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .unwrap_or(fallback_channel)
                .to_string();
            let ts = value.get("ts").and_then(|v| v.as_i64()).unwrap_or(now);
            let meta = value.get("meta").and_then(|v| v.as_object()).cloned();
            return Ok(Message {
                channel,
                content,
                ts,
                meta,
            });
        }
        // Not valid JSON after all; fall through to the raw-text path.
    }

    Ok(Message::text(fallback_channel, trimmed, now))
}

/// A reader task attached to one input pipe.
struct FifoReader {
    handle: JoinHandle<()>,
}

impl FifoReader {
    fn start(path: &Path, tx: UnboundedSender<Message>) -> Result<Self, MuxError> {
        let raw_fd = nix::fcntl::open(path, OFlag::O_RDWR | OFlag::O_NONBLOCK, Mode::empty())
            .map_err(|e| MuxError::Channel(format!("open {}: {e}", path.display())))?;
        let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };
        let afd = AsyncFd::new(fd)
            .map_err(|e| MuxError::Channel(format!("register {}: {e}", path.display())))?;

        let channel = channel_from_name(
            &path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        let path = path.to_path_buf();
        let handle = tokio::spawn(async move {
            read_loop(afd, path, channel, tx).await;
        });
        Ok(Self { handle })
    }

    fn stop(self) {
        self.handle.abort();
    }
}

async fn read_loop(
    afd: AsyncFd<OwnedFd>,
    path: PathBuf,
    channel: String,
    tx: UnboundedSender<Message>,
) {
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let mut guard = match afd.readable().await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "fifo poll failed");
                return;
            }
        };

        match nix::unistd::read(afd.get_ref().as_raw_fd(), &mut chunk) {
            Ok(0) => {
                // No writers left. The O_RDWR open makes this unusual, but
                // either way the reader stays registered.
                guard.clear_ready();
            }
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                drain_lines(&mut pending, &path, &channel, &tx);
                if pending.len() > MAX_BUFFER_BYTES {
                    warn!(
                        path = %path.display(),
                        buffered = pending.len(),
                        "dropping unterminated input buffer"
                    );
                    pending.clear();
                }
            }
            Err(nix::errno::Errno::EAGAIN) => {
                guard.clear_ready();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "fifo read failed");
                return;
            }
        }
    }
}

/// Split completed lines out of `pending` and emit a message per line.
fn drain_lines(
    pending: &mut Vec<u8>,
    path: &Path,
    channel: &str,
    tx: &UnboundedSender<Message>,
) {
    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
        let line_bytes: Vec<u8> = pending.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]);
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line, channel, chrono::Utc::now().timestamp()) {
            Ok(msg) => {
                let _ = tx.send(msg);
            }
            Err(reason) => {
                warn!(path = %path.display(), reason, "discarding malformed input line");
            }
        }
    }
}

/// The set of active input channel readers.
///
/// Owns every reader handle; the directory watcher drives `add`/`remove`.
pub struct ChannelSet {
    readers: HashMap<PathBuf, FifoReader>,
    tx: UnboundedSender<Message>,
}

impl ChannelSet {
    pub fn new(tx: UnboundedSender<Message>) -> Self {
        Self {
            readers: HashMap::new(),
            tx,
        }
    }

    /// Register a reader for `path`. Returns `Ok(false)` if one is already
    /// registered (startup scan and live events can overlap).
    pub fn add(&mut self, path: &Path) -> Result<bool, MuxError> {
        if self.readers.contains_key(path) {
            return Ok(false);
        }
        let is_fifo = nix::sys::stat::stat(path)
            .map(|s| nix::sys::stat::SFlag::from_bits_truncate(s.st_mode)
                .contains(nix::sys::stat::SFlag::S_IFIFO))
            .unwrap_or(false);
        if !is_fifo {
            return Err(MuxError::Channel(format!(
                "{} is not a named pipe",
                path.display()
            )));
        }
        let reader = FifoReader::start(path, self.tx.clone())?;
        self.readers.insert(path.to_path_buf(), reader);
        Ok(true)
    }

    /// Deregister and close the reader for `path`, if any.
    pub fn remove(&mut self, path: &Path) -> bool {
        match self.readers.remove(path) {
            Some(reader) => {
                reader.stop();
                true
            }
            None => false,
        }
    }

    /// Paths with an active reader.
    pub fn registered(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.readers.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    /// Close every reader. Used on shutdown.
    pub fn stop_all(&mut self) {
        for (path, reader) in self.readers.drain() {
            debug!(path = %path.display(), "closing input channel");
            reader.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn mkfifo(path: &Path) {
        nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o600)).unwrap();
    }

    async fn recv_msg(
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<Message>,
    ) -> Option<Message> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[test]
    fn parse_raw_text_line() {
        let msg = parse_line("hello world", "telegram", 100).unwrap();
        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.content, "hello world");
        assert_eq!(msg.ts, 100);
        assert!(msg.meta.is_none());
    }

    #[test]
    fn parse_json_line_with_all_fields() {
        let line = r#"{"channel":"sms","content":"ping","ts":42,"meta":{"from":"alice"}}"#;
        let msg = parse_line(line, "default", 100).unwrap();
        assert_eq!(msg.channel, "sms");
        assert_eq!(msg.content, "ping");
        assert_eq!(msg.ts, 42);
        assert_eq!(msg.meta.unwrap()["from"], "alice");
    }

    #[test]
    fn parse_json_defaults_channel_and_ts() {
        let msg = parse_line(r#"{"content":"hi"}"#, "slack", 7).unwrap();
        assert_eq!(msg.channel, "slack");
        assert_eq!(msg.ts, 7);
    }

    #[test]
    fn parse_json_missing_content_is_an_error() {
        let err = parse_line(r#"{"channel":"a","ts":1}"#, "default", 0).unwrap_err();
        assert!(err.contains("content"), "{err}");
    }

    #[test]
    fn parse_invalid_json_falls_back_to_raw_text() {
        let msg = parse_line(r#"{not json at all"#, "default", 9).unwrap();
        assert_eq!(msg.content, "{not json at all");
        assert_eq!(msg.channel, "default");
    }

    #[test]
    fn parse_rejects_oversized_line() {
        let long = "a".repeat(MAX_LINE_BYTES + 1);
        assert!(parse_line(&long, "default", 0).is_err());

        let exactly = "a".repeat(MAX_LINE_BYTES - 1);
        assert!(parse_line(&exactly, "default", 0).is_ok());
    }

    #[tokio::test]
    async fn reads_lines_from_named_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("in.alerts");
        mkfifo(&fifo);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut channels = ChannelSet::new(tx);
        assert!(channels.add(&fifo).unwrap());
        assert!(!channels.add(&fifo).unwrap(), "second add is a no-op");

        let mut writer = std::fs::OpenOptions::new().write(true).open(&fifo).unwrap();
        writer.write_all(b"first\nsecond\n").unwrap();

        let m1 = recv_msg(&mut rx).await.unwrap();
        assert_eq!(m1.channel, "alerts");
        assert_eq!(m1.content, "first");
        let m2 = recv_msg(&mut rx).await.unwrap();
        assert_eq!(m2.content, "second");
    }

    #[tokio::test]
    async fn writer_close_does_not_tear_down_reader() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("in");
        mkfifo(&fifo);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut channels = ChannelSet::new(tx);
        channels.add(&fifo).unwrap();

        {
            let mut writer = std::fs::OpenOptions::new().write(true).open(&fifo).unwrap();
            writer.write_all(b"before close\n").unwrap();
        } // writer dropped: no external writers remain

        assert_eq!(recv_msg(&mut rx).await.unwrap().content, "before close");

        let mut writer = std::fs::OpenOptions::new().write(true).open(&fifo).unwrap();
        writer.write_all(b"after reopen\n").unwrap();
        assert_eq!(recv_msg(&mut rx).await.unwrap().content, "after reopen");
    }

    #[tokio::test]
    async fn malformed_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("in");
        mkfifo(&fifo);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut channels = ChannelSet::new(tx);
        channels.add(&fifo).unwrap();

        let mut writer = std::fs::OpenOptions::new().write(true).open(&fifo).unwrap();
        writer
            .write_all(b"{\"channel\":\"a\"}\ngood line\n")
            .unwrap();

        let msg = recv_msg(&mut rx).await.unwrap();
        assert_eq!(msg.content, "good line", "bad line skipped, reader alive");
    }

    #[tokio::test]
    async fn boundary_line_is_one_message() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("in");
        mkfifo(&fifo);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut channels = ChannelSet::new(tx);
        channels.add(&fifo).unwrap();

        // 4 KiB minus one byte of payload plus the newline.
        let payload = "x".repeat(MAX_LINE_BYTES - 1);
        let mut writer = std::fs::OpenOptions::new().write(true).open(&fifo).unwrap();
        writer
            .write_all(format!("{payload}\n").as_bytes())
            .unwrap();

        let msg = recv_msg(&mut rx).await.unwrap();
        assert_eq!(msg.content.len(), MAX_LINE_BYTES - 1);
    }

    #[tokio::test]
    async fn remove_closes_reader() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("in.x");
        mkfifo(&fifo);

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut channels = ChannelSet::new(tx);
        channels.add(&fifo).unwrap();
        assert_eq!(channels.len(), 1);

        assert!(channels.remove(&fifo));
        assert!(channels.is_empty());
        assert!(!channels.remove(&fifo), "double remove is a no-op");
    }
}
