//! Mock terminal pane.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use agentmux_daemon::tmux::TerminalPane;
use agentmux_types::MuxError;

/// One recorded keystroke operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentKeys {
    /// Literal text injected via `send_text`.
    Text(String),
    /// A submitted Enter.
    Enter,
}

#[derive(Debug)]
struct MockPaneInner {
    sent: Vec<SentKeys>,
    /// Scripted snapshots, consumed one per `capture_pane` call.
    captures: VecDeque<String>,
    /// Served once the scripted snapshots run out.
    default_capture: String,
    client_activity: i64,
    agent_pid: Option<i32>,
    mounted_taps: Vec<PathBuf>,
    fail_sends: bool,
}

/// A recording pane for tests. Clone-able; clones share state.
#[derive(Debug, Clone)]
pub struct MockPane {
    inner: Arc<Mutex<MockPaneInner>>,
}

impl MockPane {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockPaneInner {
                sent: Vec::new(),
                captures: VecDeque::new(),
                default_capture: String::new(),
                client_activity: 0,
                agent_pid: Some(4242),
                mounted_taps: Vec::new(),
                fail_sends: false,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockPaneInner> {
        self.inner.lock().expect("mock pane lock poisoned")
    }

    /// Queue one snapshot to be served by the next `capture_pane` call.
    pub fn push_capture(&self, capture: impl Into<String>) {
        self.lock().captures.push_back(capture.into());
    }

    /// Set the snapshot served when no queued one remains.
    pub fn set_default_capture(&self, capture: impl Into<String>) {
        self.lock().default_capture = capture.into();
    }

    /// Set the `#{client_activity}` timestamp the pane reports.
    pub fn set_client_activity(&self, ts: i64) {
        self.lock().client_activity = ts;
    }

    /// Set the agent pid the pane reports (None = agent gone).
    pub fn set_agent_pid(&self, pid: Option<i32>) {
        self.lock().agent_pid = pid;
    }

    /// Make subsequent send operations fail (for requeue tests).
    pub fn set_fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    /// Every recorded operation, in order.
    pub fn sent(&self) -> Vec<SentKeys> {
        self.lock().sent.clone()
    }

    /// Only the injected text payloads, in order.
    pub fn sent_text(&self) -> Vec<String> {
        self.lock()
            .sent
            .iter()
            .filter_map(|k| match k {
                SentKeys::Text(t) => Some(t.clone()),
                SentKeys::Enter => None,
            })
            .collect()
    }

    /// Number of Enters submitted.
    pub fn enter_count(&self) -> usize {
        self.lock()
            .sent
            .iter()
            .filter(|k| **k == SentKeys::Enter)
            .count()
    }

    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }

    /// Paths the stdout tap was mounted to, in order.
    pub fn mounted_taps(&self) -> Vec<PathBuf> {
        self.lock().mounted_taps.clone()
    }
}

impl Default for MockPane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TerminalPane for MockPane {
    async fn send_text(&self, text: &str) -> Result<(), MuxError> {
        let mut inner = self.lock();
        if inner.fail_sends {
            return Err(MuxError::Tmux("mock send failure".into()));
        }
        inner.sent.push(SentKeys::Text(text.to_string()));
        Ok(())
    }

    async fn send_enter(&self) -> Result<(), MuxError> {
        let mut inner = self.lock();
        if inner.fail_sends {
            return Err(MuxError::Tmux("mock send failure".into()));
        }
        inner.sent.push(SentKeys::Enter);
        Ok(())
    }

    async fn capture_pane(&self) -> Result<String, MuxError> {
        let mut inner = self.lock();
        Ok(inner
            .captures
            .pop_front()
            .unwrap_or_else(|| inner.default_capture.clone()))
    }

    async fn mount_stdout_tap(&self, log_path: &Path) -> Result<(), MuxError> {
        self.lock().mounted_taps.push(log_path.to_path_buf());
        Ok(())
    }

    async fn client_activity_ts(&self) -> Result<i64, MuxError> {
        Ok(self.lock().client_activity)
    }

    async fn agent_child_pid(&self, _program: &str) -> Result<Option<i32>, MuxError> {
        Ok(self.lock().agent_pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_text_and_enter_in_order() {
        let pane = MockPane::new();
        pane.send_text("hello").await.unwrap();
        pane.send_enter().await.unwrap();

        assert_eq!(
            pane.sent(),
            vec![SentKeys::Text("hello".into()), SentKeys::Enter]
        );
        assert_eq!(pane.sent_text(), vec!["hello"]);
        assert_eq!(pane.enter_count(), 1);
    }

    #[tokio::test]
    async fn scripted_captures_then_default() {
        let pane = MockPane::new();
        pane.set_default_capture("fallback");
        pane.push_capture("first");

        assert_eq!(pane.capture_pane().await.unwrap(), "first");
        assert_eq!(pane.capture_pane().await.unwrap(), "fallback");
        assert_eq!(pane.capture_pane().await.unwrap(), "fallback");
    }

    #[tokio::test]
    async fn failing_sends_return_errors() {
        let pane = MockPane::new();
        pane.set_fail_sends(true);
        assert!(pane.send_text("x").await.is_err());
        assert!(pane.send_enter().await.is_err());
        assert!(pane.sent().is_empty());
    }
}
