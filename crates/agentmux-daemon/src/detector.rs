//! Readiness detection.
//!
//! During generation the agent repaints its terminal UI several times per
//! second, so stdout silence is the primary readiness signal: `tmux
//! pipe-pane` appends pane output to a log file and [`StdoutMonitor`]
//! watches the file's mtime. The configured ready-prompt glyph is only
//! advisory (it is wrapped in escape sequences and does not match reliably
//! at the byte level); confirmation prompts are matched as plain phrases in
//! a pane snapshot.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use agentmux_types::ReadyState;

/// What a pane snapshot shows, before fusing with the silence signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneStatus {
    /// A confirmation-prompt phrase is visible.
    Confirm,
    /// The ready-prompt glyph is on the last non-blank line.
    Prompt,
    /// Neither marker.
    Plain,
}

/// True when any configured confirmation phrase appears in the snapshot.
pub fn contains_confirm_marker(capture: &str, markers: &[String]) -> bool {
    markers.iter().any(|m| !m.is_empty() && capture.contains(m.as_str()))
}

/// True when the last non-blank snapshot line carries the ready glyph.
pub fn prompt_glyph_present(capture: &str, ready_marker: &str) -> bool {
    if ready_marker.is_empty() {
        return false;
    }
    capture
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.contains(ready_marker))
        .unwrap_or(false)
}

/// Classify a pane snapshot. Confirmation phrases win over the glyph.
pub fn classify_pane(capture: &str, ready_marker: &str, confirm_markers: &[String]) -> PaneStatus {
    if contains_confirm_marker(capture, confirm_markers) {
        PaneStatus::Confirm
    } else if prompt_glyph_present(capture, ready_marker) {
        PaneStatus::Prompt
    } else {
        PaneStatus::Plain
    }
}

/// Fuse the silence signal with a snapshot into the three-valued state.
///
/// `ready` never requires the glyph; `confirm` requires silence so a
/// confirmation phrase scrolling by mid-generation reads as `busy` until
/// output settles.
pub fn fuse(silent: bool, status: PaneStatus) -> ReadyState {
    if !silent {
        ReadyState::Busy
    } else if status == PaneStatus::Confirm {
        ReadyState::Confirm
    } else {
        ReadyState::Ready
    }
}

/// Single-writer silence clock over the stdout tap.
///
/// The monitor task is the only writer; everyone else reads. The fired
/// latch makes the busy-to-ready transition a one-shot edge until output
/// resumes or [`reset`](Self::reset) re-arms it after a completed turn.
#[derive(Debug)]
pub struct SilenceTracker {
    timeout: Duration,
    last_activity_ms: AtomicI64,
    fired: AtomicBool,
}

impl SilenceTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_activity_ms: AtomicI64::new(now_ms()),
            fired: AtomicBool::new(false),
        }
    }

    /// Record stdout activity: restarts the silence clock and re-arms the edge.
    pub fn note_activity(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
        self.fired.store(false, Ordering::Relaxed);
    }

    /// Re-arm after a completed turn so the next silence window fires again.
    pub fn reset(&self) {
        self.note_activity();
    }

    /// Time since the last observed stdout activity.
    pub fn elapsed(&self) -> Duration {
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        Duration::from_millis((now_ms() - last).max(0) as u64)
    }

    /// True once the silence window has fully elapsed.
    pub fn is_silent(&self) -> bool {
        self.elapsed() >= self.timeout
    }

    /// Fire the one-shot ready edge; true only for the first caller after
    /// each activity period.
    fn try_fire(&self) -> bool {
        self.is_silent()
            && self
                .fired
                .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Events emitted by the stdout monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    /// Stdout has been silent for the configured window.
    SilenceReady,
    /// The tap log was truncated; the pipe-pane tap must be re-mounted.
    TapRotated,
}

/// Watches the stdout tap log and drives the [`SilenceTracker`].
///
/// Polls the log's mtime; any change counts as agent output. When the log
/// grows past `max_bytes` it is truncated in place, which invalidates the
/// `cat >>` tap, so a [`MonitorEvent::TapRotated`] asks the session
/// controller to re-mount it.
pub struct StdoutMonitor;

impl StdoutMonitor {
    pub fn spawn(
        log_path: PathBuf,
        tracker: Arc<SilenceTracker>,
        max_bytes: u64,
        events: UnboundedSender<MonitorEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let poll = poll_interval(tracker.timeout());
        tokio::spawn(async move {
            let mut last_mtime: Option<std::time::SystemTime> = None;
            let mut ticker = tokio::time::interval(poll);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.wait_for(|&stop| stop) => {
                        debug!("stdout monitor stopping");
                        return;
                    }
                }

                let meta = match tokio::fs::metadata(&log_path).await {
                    Ok(meta) => meta,
                    Err(_) => {
                        // Tap not mounted yet; the silence clock keeps
                        // running from the last known activity.
                        if tracker.try_fire() {
                            let _ = events.send(MonitorEvent::SilenceReady);
                        }
                        continue;
                    }
                };

                if meta.len() > max_bytes {
                    if let Err(e) = tokio::fs::write(&log_path, b"").await {
                        warn!(error = %e, "stdout log truncation failed");
                    } else {
                        debug!(bytes = meta.len(), "stdout log rotated");
                        tracker.note_activity();
                        let _ = events.send(MonitorEvent::TapRotated);
                    }
                    last_mtime = None;
                    continue;
                }

                let mtime = meta.modified().ok();
                if mtime != last_mtime {
                    last_mtime = mtime;
                    tracker.note_activity();
                } else if tracker.try_fire() {
                    let _ = events.send(MonitorEvent::SilenceReady);
                }
            }
        })
    }
}

fn poll_interval(timeout: Duration) -> Duration {
    (timeout / 3).clamp(Duration::from_millis(10), Duration::from_millis(300))
}
