//! Terminal activity monitor.
//!
//! Tracks the last *human* keystroke in the wrapped pane so injection can
//! hold off while someone is typing. The timestamp comes from tmux's
//! `#{client_activity}` (refreshed on demand), which is not moved by
//! `send-keys`, keeping the injection path invisible to this monitor.
//!
//! Single-writer, multi-reader: only this type stores the timestamp.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::tmux::TerminalPane;

/// Holds `last_human_keystroke_ts` (Unix seconds; 0 = never observed).
#[derive(Debug, Default)]
pub struct ActivityMonitor {
    last_ts: AtomicI64,
}

impl ActivityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the keystroke timestamp the pane reports. The multiplexer's
    /// value is authoritative; 0 means no client is attached.
    pub fn observe(&self, ts: i64) {
        if ts < 0 {
            return;
        }
        self.last_ts.store(ts, Ordering::Relaxed);
    }

    /// Pull the latest client-activity timestamp from the pane (best effort;
    /// an unreachable pane leaves the previous value in place).
    pub async fn refresh(&self, pane: &dyn TerminalPane) {
        if let Ok(ts) = pane.client_activity_ts().await {
            self.observe(ts);
        }
    }

    /// Unix seconds of the last observed human keystroke, 0 if none.
    pub fn last_keystroke_ts(&self) -> i64 {
        self.last_ts.load(Ordering::Relaxed)
    }

    /// True when the terminal has been idle for at least `threshold_secs`.
    pub fn is_idle(&self, threshold_secs: u64, now: i64) -> bool {
        let last = self.last_keystroke_ts();
        if last == 0 {
            return true;
        }
        now - last >= threshold_secs as i64
    }
}
