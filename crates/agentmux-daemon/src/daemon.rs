//! Daemon orchestrator.
//!
//! Owns the shared state (message queue, silence tracker, activity
//! monitor, confirm flag) and runs a single event loop over
//! [`DaemonEvent`]s produced by the subsystem tasks: directory watcher,
//! channel readers, control server, stdout monitor, and lifecycle
//! supervisor. Handling is serialized by the loop, so no drain can start
//! while a previous injection is still in flight.
//!
//! Startup order matters: the control socket is listening before the
//! agent is launched, because the agent's hooks call back into it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use agentmux_types::{Config, Message, MuxError, Turn};

use crate::activity::ActivityMonitor;
use crate::broadcast::OutputBroadcaster;
use crate::channel::ChannelSet;
use crate::control::ControlServer;
use crate::detector::{classify_pane, MonitorEvent, PaneStatus, SilenceTracker, StdoutMonitor};
use crate::hooks;
use crate::injector::{inject_batch, SuppressReason};
use crate::lifecycle::LifecycleSupervisor;
use crate::paths::RuntimePaths;
use crate::queue::MessageQueue;
use crate::router::OutRouter;
use crate::tmux::TerminalPane;
use crate::watcher::{DirectoryWatcher, WatchEvent};

/// Everything that can wake the daemon event loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// An input pipe appeared in the runtime directory.
    InputAdded(PathBuf),
    /// An input pipe was removed.
    InputRemoved(PathBuf),
    /// A channel reader parsed one complete message.
    MessageReceived(Message),
    /// The turn-completion hook delivered a finished turn.
    HookBroadcast(Turn),
    /// A lifecycle hook event arrived on the control socket.
    HookEvent { event: String, session: String },
    /// Stdout has been silent past the configured window.
    SilenceReady,
    /// The stdout tap log was rotated; the tap must be re-mounted.
    TapRotated,
    /// The lifecycle supervisor relaunched the agent.
    AgentRestarted { restart_count: u32, backoff_seconds: u64 },
    /// A deferred injection retry timer fired.
    InjectRetry,
}

/// What prompted an injection evaluation. Determines how readiness is
/// established and which `ready_detected` method is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InjectTrigger {
    /// A completed turn implies the agent is back at its prompt.
    TurnCompleted,
    /// The stdout silence edge fired.
    SilenceEdge,
    /// A message was enqueued while no edge is pending.
    QueueActivity,
    /// The deferred retry after a terminal-activity suppression.
    Retry,
}

/// The multiplexer daemon.
pub struct Daemon {
    config: Config,
    paths: RuntimePaths,
    pane: Arc<dyn TerminalPane>,
    queue: Arc<MessageQueue>,
    silence: Arc<SilenceTracker>,
    activity: ActivityMonitor,
    channels: ChannelSet,
    broadcaster: Option<OutputBroadcaster>,
    events_tx: UnboundedSender<DaemonEvent>,
    events_rx: Option<UnboundedReceiver<DaemonEvent>>,
    shutdown_tx: watch::Sender<bool>,
    confirm_pending: bool,
    current_session: Option<String>,
    retry_scheduled: Arc<AtomicBool>,
    hook_settings_path: Option<PathBuf>,
    pending_messages: Option<UnboundedReceiver<Message>>,
    tasks: Vec<JoinHandle<()>>,
    _watcher: Option<DirectoryWatcher>,
}

impl Daemon {
    /// Construct a daemon around an existing pane handle. No I/O happens
    /// until [`start_io`](Self::start_io).
    pub fn new(config: Config, pane: Arc<dyn TerminalPane>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();

        Self {
            paths: RuntimePaths::new(&config.runtime_dir),
            silence: Arc::new(SilenceTracker::new(Duration::from_secs(
                config.silence_timeout,
            ))),
            config,
            pane,
            queue: Arc::new(MessageQueue::new()),
            activity: ActivityMonitor::new(),
            channels: ChannelSet::new(msg_tx),
            broadcaster: None,
            events_tx,
            events_rx: Some(events_rx),
            shutdown_tx,
            confirm_pending: false,
            current_session: None,
            retry_scheduled: Arc::new(AtomicBool::new(false)),
            hook_settings_path: hooks::default_settings_path(),
            pending_messages: Some(msg_rx),
            tasks: Vec::new(),
            _watcher: None,
        }
    }

    /// Override (or disable with `None`) the agent settings file the hook
    /// installer writes to.
    pub fn set_hook_settings_path(&mut self, path: Option<PathBuf>) {
        self.hook_settings_path = path;
    }

    pub fn paths(&self) -> &RuntimePaths {
        &self.paths
    }

    pub fn queue(&self) -> Arc<MessageQueue> {
        Arc::clone(&self.queue)
    }

    pub fn silence(&self) -> Arc<SilenceTracker> {
        Arc::clone(&self.silence)
    }

    pub fn events_sender(&self) -> UnboundedSender<DaemonEvent> {
        self.events_tx.clone()
    }

    pub fn registered_channels(&self) -> Vec<PathBuf> {
        self.channels.registered()
    }

    pub fn confirm_pending(&self) -> bool {
        self.confirm_pending
    }

    /// Agent session id learned from the most recent hook traffic.
    pub fn current_session(&self) -> Option<&str> {
        self.current_session.as_deref()
    }

    /// Prepare the runtime directory, install the agent hooks, and bring
    /// up the socket endpoints, directory watcher, and channel readers.
    ///
    /// Endpoint bind failures are fatal; a failed hook install is logged
    /// and the daemon carries on (the agent may already be configured).
    pub async fn start_io(&mut self) -> Result<(), MuxError> {
        self.paths.ensure()?;

        if let Some(msg_rx) = self.pending_messages.take() {
            self.forward_messages(msg_rx);
        }

        if let Some(settings) = self.hook_settings_path.clone() {
            match hooks::install(&settings, hooks::HOOK_COMMAND) {
                Ok(()) => info!(path = %settings.display(), "agent hooks installed"),
                Err(e) => warn!(error = %e, "hook install failed"),
            }
        }

        self.broadcaster = Some(
            OutputBroadcaster::start(&self.paths.output_sock(), self.shutdown_tx.subscribe())
                .await?,
        );

        let router = Arc::new(OutRouter::new(self.paths.clone()));
        let control_task = ControlServer::start(
            &self.paths.control_sock(),
            self.events_tx.clone(),
            router,
            self.shutdown_tx.subscribe(),
        )
        .await?;
        self.tasks.push(control_task);

        let (watch_tx, watch_rx) = mpsc::unbounded_channel();
        self._watcher = Some(DirectoryWatcher::start(self.paths.root(), watch_tx)?);
        self.forward_watch_events(watch_rx);

        Ok(())
    }

    /// Mount the stdout tap and start the detector and lifecycle tasks.
    /// Call after the agent session exists (created or attached).
    pub async fn start_agent_tasks(&mut self) -> Result<(), MuxError> {
        let log = self.paths.stdout_log();
        self.pane.mount_stdout_tap(&log).await?;

        let (mon_tx, mon_rx) = mpsc::unbounded_channel();
        let monitor = StdoutMonitor::spawn(
            log,
            Arc::clone(&self.silence),
            self.config.stdout_log_max_bytes,
            mon_tx,
            self.shutdown_tx.subscribe(),
        );
        self.tasks.push(monitor);
        self.forward_monitor_events(mon_rx);

        let supervisor = LifecycleSupervisor::spawn(
            Arc::clone(&self.pane),
            self.config.clone(),
            self.paths.control_sock(),
            self.events_tx.clone(),
            self.shutdown_tx.subscribe(),
        );
        self.tasks.push(supervisor);

        // On re-attach, derive the current state from a fresh snapshot.
        if let Ok(capture) = self.pane.capture_pane().await {
            match classify_pane(&capture, &self.config.ready_marker, &self.config.confirm_markers)
            {
                PaneStatus::Confirm => {
                    self.confirm_pending = true;
                    info!("confirmation prompt detected on attach");
                }
                PaneStatus::Prompt => {
                    info!(method = "snapshot", glyph = true, "ready_detected");
                }
                PaneStatus::Plain => {}
            }
        }
        Ok(())
    }

    /// Run the event loop until SIGTERM/SIGINT, then shut down.
    pub async fn run(&mut self) -> Result<(), MuxError> {
        let mut events = self
            .events_rx
            .take()
            .ok_or_else(|| MuxError::Control("daemon event loop already running".into()))?;

        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .map_err(|e| MuxError::Control(format!("signal handler: {e}")))?;
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .map_err(|e| MuxError::Control(format!("signal handler: {e}")))?;

        info!(session = self.config.tmux_session(), "daemon started");

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    }
                }
                _ = sigterm.recv() => break,
                _ = sigint.recv() => break,
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Receive and dispatch one pending event. [`run`](Self::run) is the
    /// production loop; this is for embedders and tests that drive the
    /// daemon step by step.
    pub async fn pump_event(&mut self) -> bool {
        let Some(events) = self.events_rx.as_mut() else {
            return false;
        };
        match events.recv().await {
            Some(event) => {
                self.handle_event(event).await;
                true
            }
            None => false,
        }
    }

    /// Graceful shutdown: subsystem tasks drain, sockets are unlinked, the
    /// tmux session and the agent inside it are left running.
    pub async fn stop(&mut self) {
        info!("daemon stopping");
        let _ = self.shutdown_tx.send(true);
        self.channels.stop_all();

        // Let the socket tasks observe the signal and unlink their files.
        tokio::time::sleep(Duration::from_millis(200)).await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.paths.cleanup();
        info!("daemon stopped");
    }

    /// Dispatch one event. Exposed so integration tests can drive the
    /// daemon without the socket stack.
    pub async fn handle_event(&mut self, event: DaemonEvent) {
        match event {
            DaemonEvent::InputAdded(path) => match self.channels.add(&path) {
                Ok(true) => info!(path = %path.display(), "channel_register"),
                Ok(false) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "channel registration failed"),
            },
            DaemonEvent::InputRemoved(path) => {
                if self.channels.remove(&path) {
                    info!(path = %path.display(), "channel_deregister");
                }
            }
            DaemonEvent::MessageReceived(msg) => {
                info!(
                    channel = msg.channel,
                    content_len = msg.content.len(),
                    "message_received"
                );
                self.queue.push(msg);
                self.maybe_inject(InjectTrigger::QueueActivity).await;
            }
            DaemonEvent::HookBroadcast(turn) => {
                debug!(session = turn.session, "turn received from hook");
                self.current_session = Some(turn.session.clone());
                if self.confirm_pending {
                    self.confirm_pending = false;
                    debug!("confirmation prompt resolved by completed turn");
                }
                self.broadcast_turn(&turn).await;
                self.silence.reset();
                self.maybe_inject(InjectTrigger::TurnCompleted).await;
            }
            DaemonEvent::HookEvent { event, session } => {
                info!(hook_event = event, session, "hook event received");
                match event.as_str() {
                    "SessionStart" => self.current_session = Some(session),
                    "PermissionRequest" => {
                        if !self.confirm_pending {
                            self.confirm_pending = true;
                            self.broadcast_permission_alert().await;
                        }
                    }
                    "SessionEnd" => info!("agent session ended"),
                    _ => {}
                }
            }
            DaemonEvent::SilenceReady => {
                info!(method = "silence", "ready_detected");
                self.maybe_inject(InjectTrigger::SilenceEdge).await;
            }
            DaemonEvent::TapRotated => {
                if let Err(e) = self.pane.mount_stdout_tap(&self.paths.stdout_log()).await {
                    warn!(error = %e, "tap re-mount after rotation failed");
                }
            }
            DaemonEvent::AgentRestarted {
                restart_count,
                backoff_seconds,
            } => {
                debug!(restart_count, backoff_seconds, "agent restarted");
                self.confirm_pending = false;
                self.silence.reset();
                if let Err(e) = self.pane.mount_stdout_tap(&self.paths.stdout_log()).await {
                    warn!(error = %e, "tap re-mount after restart failed");
                }
            }
            DaemonEvent::InjectRetry => {
                self.maybe_inject(InjectTrigger::Retry).await;
            }
        }
    }

    /// Evaluate the injection window and drain the queue if it is open.
    ///
    /// The window is open when readiness resolves to ready and the last
    /// human keystroke is at least `idle_threshold` old. A closed window
    /// leaves the queue untouched and emits one `suppressed` event.
    async fn maybe_inject(&mut self, trigger: InjectTrigger) {
        if self.queue.is_empty() {
            return;
        }

        // Terminal activity first: a human mid-typing beats any readiness.
        self.activity.refresh(&*self.pane).await;
        let now = chrono::Utc::now().timestamp();
        if !self.activity.is_idle(self.config.idle_threshold, now) {
            info!(
                reason = SuppressReason::TerminalActive.as_str(),
                "suppressed"
            );
            self.schedule_retry();
            return;
        }

        let capture = match self.pane.capture_pane().await {
            Ok(capture) => capture,
            Err(e) => {
                warn!(error = %e, "pane capture failed, injection deferred");
                return;
            }
        };
        let status = classify_pane(
            &capture,
            &self.config.ready_marker,
            &self.config.confirm_markers,
        );

        if status == PaneStatus::Confirm {
            if !self.confirm_pending {
                self.confirm_pending = true;
                self.broadcast_permission_alert().await;
            }
            info!(reason = SuppressReason::Confirm.as_str(), "suppressed");
            return;
        }
        if self.confirm_pending {
            // The prompt is no longer visible: the human answered it
            // without a turn-completion hook firing.
            self.confirm_pending = false;
            debug!("confirmation prompt cleared via pane snapshot");
        }

        let method = match trigger {
            InjectTrigger::TurnCompleted => Some("skipped"),
            InjectTrigger::SilenceEdge => None, // already reported on the edge
            InjectTrigger::QueueActivity | InjectTrigger::Retry => {
                if self.silence.is_silent() {
                    Some("silence")
                } else if status == PaneStatus::Prompt {
                    Some("snapshot")
                } else {
                    info!(reason = SuppressReason::Busy.as_str(), "suppressed");
                    return;
                }
            }
        };
        if let Some(method) = method {
            info!(method, glyph = status == PaneStatus::Prompt, "ready_detected");
        }

        let batch = self.queue.drain();
        if batch.is_empty() {
            return;
        }
        if let Err(e) = inject_batch(&*self.pane, &batch).await {
            error!(error = %e, count = batch.len(), "injection failed, batch requeued");
            self.queue.requeue_front(batch);
        }
    }

    /// After a terminal-activity suppression, try again once the idle
    /// threshold has had time to pass. At most one retry is outstanding.
    fn schedule_retry(&self) {
        if self.retry_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let tx = self.events_tx.clone();
        let flag = Arc::clone(&self.retry_scheduled);
        let delay = Duration::from_secs(self.config.idle_threshold + 1);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            flag.store(false, Ordering::SeqCst);
            let _ = tx.send(DaemonEvent::InjectRetry);
        });
    }

    async fn broadcast_turn(&self, turn: &Turn) {
        let payload = serde_json::json!({
            "ts": turn.ts,
            "session": turn.session,
            "turn": turn.turn,
        });
        let count = match &self.broadcaster {
            Some(broadcaster) => broadcaster.broadcast(&payload).await,
            None => 0,
        };
        info!(subscriber_count = count, "broadcast_sent");
    }

    /// Tell subscribers a confirmation prompt is waiting for a human.
    async fn broadcast_permission_alert(&self) {
        let payload = serde_json::json!({
            "type": "permission_request",
            "ts": chrono::Utc::now().timestamp(),
            "session": self.current_session.clone().unwrap_or_default(),
        });
        if let Some(broadcaster) = &self.broadcaster {
            let count = broadcaster.broadcast(&payload).await;
            info!(subscriber_count = count, "permission alert broadcast");
        }
    }

    /// Bridge parsed messages from the channel readers into the event loop.
    fn forward_messages(&mut self, mut rx: UnboundedReceiver<Message>) {
        let tx = self.events_tx.clone();
        let task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if tx.send(DaemonEvent::MessageReceived(msg)).is_err() {
                    return;
                }
            }
        });
        self.tasks.push(task);
    }

    fn forward_watch_events(&mut self, mut rx: UnboundedReceiver<WatchEvent>) {
        let tx = self.events_tx.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let mapped = match event {
                    WatchEvent::InputAdded(path) => DaemonEvent::InputAdded(path),
                    WatchEvent::InputRemoved(path) => DaemonEvent::InputRemoved(path),
                };
                if tx.send(mapped).is_err() {
                    return;
                }
            }
        });
        self.tasks.push(task);
    }

    fn forward_monitor_events(&mut self, mut rx: UnboundedReceiver<MonitorEvent>) {
        let tx = self.events_tx.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let mapped = match event {
                    MonitorEvent::SilenceReady => DaemonEvent::SilenceReady,
                    MonitorEvent::TapRotated => DaemonEvent::TapRotated,
                };
                if tx.send(mapped).is_err() {
                    return;
                }
            }
        });
        self.tasks.push(task);
    }
}
