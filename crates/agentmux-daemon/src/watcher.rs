//! Runtime-directory watcher for channel registration.
//!
//! Watches the runtime directory (non-recursively) with `notify` and turns
//! filesystem events into input-channel register/deregister events. On
//! start it synthesizes a create event for every input pipe already
//! present, so a daemon restart converges to the current filesystem state
//! through the same code path as live events.
//!
//! `out.*` artifacts are observed for logging only; unknown names are
//! ignored.

use std::path::{Path, PathBuf};

use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use agentmux_types::MuxError;

use crate::paths::{is_input_name, is_output_name};

/// A channel registration event emitted by the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// An input pipe appeared (or already existed at startup).
    InputAdded(PathBuf),
    /// An input pipe was removed.
    InputRemoved(PathBuf),
}

/// Watches the runtime directory and forwards [`WatchEvent`]s.
///
/// Dropping the watcher stops event delivery.
pub struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
}

impl DirectoryWatcher {
    /// Start watching `dir`, sending events on `tx`.
    ///
    /// The live watch is established before the startup scan so no creation
    /// can slip between the two; duplicate registrations are harmless
    /// because the channel manager ignores already-registered paths.
    pub fn start(dir: &Path, tx: UnboundedSender<WatchEvent>) -> Result<Self, MuxError> {
        let event_tx = tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for ev in map_notify_event(&event) {
                        let _ = event_tx.send(ev);
                    }
                }
                Err(e) => warn!(error = %e, "directory watch error"),
            },
            Config::default(),
        )
        .map_err(|e| MuxError::Channel(format!("create watcher: {e}")))?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| MuxError::Channel(format!("watch {}: {e}", dir.display())))?;

        // Startup convergence: replay everything already on disk.
        let entries = std::fs::read_dir(dir)
            .map_err(|e| MuxError::Channel(format!("read_dir {}: {e}", dir.display())))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if is_input_name(&name) {
                let _ = tx.send(WatchEvent::InputAdded(entry.path()));
            }
        }

        debug!(path = %dir.display(), "directory watcher started");
        Ok(Self { _watcher: watcher })
    }
}

/// Map one `notify` event to zero or more [`WatchEvent`]s.
fn map_notify_event(event: &notify::Event) -> Vec<WatchEvent> {
    let mut out = Vec::new();
    for path in &event.paths {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        match &event.kind {
            EventKind::Create(_) => {
                if is_input_name(&name) {
                    out.push(WatchEvent::InputAdded(path.clone()));
                } else if is_output_name(&name) {
                    debug!(path = %path.display(), "output channel artifact appeared");
                }
            }
            EventKind::Remove(_) => {
                if is_input_name(&name) {
                    out.push(WatchEvent::InputRemoved(path.clone()));
                } else if is_output_name(&name) {
                    debug!(path = %path.display(), "output channel artifact removed");
                }
            }
            _ => {}
        }
    }
    out
}
