//! Injection end-to-end scenarios over a mock pane.
//!
//! The daemon is driven through its event dispatch directly, so these
//! tests exercise the real queue, suppression, formatting, and requeue
//! paths without tmux or sockets.

use std::sync::Arc;

use agentmux_daemon::{Daemon, DaemonEvent, TerminalPane};
use agentmux_harness::{MockPane, RuntimeFixture, SentKeys};
use agentmux_types::{Config, Message, Turn};

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A daemon over a mock pane with the silence window collapsed to zero,
/// so readiness resolves immediately unless a test makes the pane busy.
fn ready_daemon(fixture: &RuntimeFixture, pane: &MockPane) -> Daemon {
    let mut config = fixture.config();
    config.silence_timeout = 0;
    daemon_with(config, pane)
}

fn daemon_with(config: Config, pane: &MockPane) -> Daemon {
    let mut daemon = Daemon::new(config, Arc::new(pane.clone()) as Arc<dyn TerminalPane>);
    daemon.set_hook_settings_path(None);
    daemon
}

fn message(channel: &str, content: &str) -> DaemonEvent {
    DaemonEvent::MessageReceived(Message::text(channel, content, now()))
}

#[tokio::test]
async fn single_message_is_injected_with_one_enter() {
    let fixture = RuntimeFixture::new();
    let pane = MockPane::new();
    let mut daemon = ready_daemon(&fixture, &pane);

    daemon.handle_event(message("default", "hello world")).await;

    let sent = pane.sent();
    assert_eq!(sent.len(), 2, "one text, one enter: {sent:?}");
    match &sent[0] {
        SentKeys::Text(text) => {
            assert!(text.starts_with('['), "{text}");
            assert!(text.ends_with("default] hello world"), "{text}");
        }
        other => panic!("expected text first, got {other:?}"),
    }
    assert_eq!(sent[1], SentKeys::Enter);
    assert!(daemon.queue().is_empty());
}

#[tokio::test]
async fn messages_queued_while_busy_inject_as_one_batch_on_ready() {
    let fixture = RuntimeFixture::new();
    let pane = MockPane::new();
    // Default silence window (3 s) with fresh activity: busy.
    let mut daemon = daemon_with(fixture.config(), &pane);
    daemon.silence().note_activity();

    daemon.handle_event(message("a", "first")).await;
    daemon.handle_event(message("b", "second")).await;
    daemon.handle_event(message("a", "third")).await;

    assert!(pane.sent().is_empty(), "busy state must suppress");
    assert_eq!(daemon.queue().len(), 3);

    // The busy -> ready edge.
    daemon.handle_event(DaemonEvent::SilenceReady).await;

    assert_eq!(pane.enter_count(), 1, "one Enter per drained batch");
    let text = pane.sent_text().join("");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("a] first"));
    assert!(lines[1].ends_with("b] second"));
    assert!(lines[2].ends_with("a] third"));
    assert!(daemon.queue().is_empty());
}

#[tokio::test]
async fn human_activity_suppresses_until_idle() {
    let fixture = RuntimeFixture::new();
    let pane = MockPane::new();
    let mut config = fixture.config();
    config.silence_timeout = 0;
    config.idle_threshold = 30;
    let mut daemon = daemon_with(config, &pane);

    // A keystroke right now.
    pane.set_client_activity(now());
    daemon.handle_event(message("default", "wait for me")).await;

    assert!(pane.sent().is_empty(), "terminal_active must suppress");
    assert_eq!(daemon.queue().len(), 1, "queue survives suppression");

    // The keystroke ages past the idle threshold; the next ready edge
    // (here the deferred retry path) injects.
    pane.set_client_activity(now() - 31);
    daemon.handle_event(DaemonEvent::InjectRetry).await;

    assert_eq!(pane.enter_count(), 1);
    assert!(daemon.queue().is_empty());
}

#[tokio::test]
async fn confirmation_prompt_suppresses_and_clears() {
    let fixture = RuntimeFixture::new();
    let pane = MockPane::new();
    let mut daemon = ready_daemon(&fixture, &pane);

    pane.set_default_capture("Do you want to run this command?\n  Yes / No\n");
    daemon.handle_event(message("default", "queued behind prompt")).await;

    assert!(pane.sent().is_empty(), "confirm state must suppress");
    assert_eq!(daemon.queue().len(), 1);
    assert!(daemon.confirm_pending());

    // The human answers; the prompt disappears from the pane.
    pane.set_default_capture("\u{276f} ");
    daemon.handle_event(DaemonEvent::SilenceReady).await;

    assert!(!daemon.confirm_pending());
    assert_eq!(pane.enter_count(), 1);
    assert!(daemon.queue().is_empty());
}

#[tokio::test]
async fn completed_turn_triggers_injection_without_waiting_for_silence() {
    let fixture = RuntimeFixture::new();
    let pane = MockPane::new();
    let mut daemon = daemon_with(fixture.config(), &pane);
    daemon.silence().note_activity();

    daemon.handle_event(message("default", "queued mid-turn")).await;
    assert!(pane.sent().is_empty());

    let turn = Turn {
        ts: now(),
        session: "sess-1".into(),
        turn: vec![serde_json::json!({"type": "text", "text": "done"})],
    };
    daemon.handle_event(DaemonEvent::HookBroadcast(turn)).await;

    assert_eq!(pane.enter_count(), 1, "turn completion opens the window");
    assert!(daemon.queue().is_empty());
}

#[tokio::test]
async fn failed_injection_requeues_in_order() {
    let fixture = RuntimeFixture::new();
    let pane = MockPane::new();
    let mut daemon = ready_daemon(&fixture, &pane);

    pane.set_fail_sends(true);
    daemon.handle_event(message("a", "one")).await;
    daemon.handle_event(message("a", "two")).await;
    assert_eq!(daemon.queue().len(), 2, "failed batch goes back in order");

    pane.set_fail_sends(false);
    daemon.handle_event(DaemonEvent::SilenceReady).await;

    assert_eq!(pane.enter_count(), 1);
    let text = pane.sent_text().join("");
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines[0].ends_with("a] one"));
    assert!(lines[1].ends_with("a] two"));
    assert!(daemon.queue().is_empty());
}

#[tokio::test]
async fn restart_event_resets_state_and_remounts_tap() {
    let fixture = RuntimeFixture::new();
    let pane = MockPane::new();
    let mut daemon = ready_daemon(&fixture, &pane);

    pane.set_default_capture("Allow this? y/n");
    daemon.handle_event(message("default", "pending")).await;
    assert!(daemon.confirm_pending());

    pane.set_default_capture("");
    daemon
        .handle_event(DaemonEvent::AgentRestarted {
            restart_count: 1,
            backoff_seconds: 1,
        })
        .await;

    assert!(!daemon.confirm_pending(), "restart clears the confirm flag");
    assert_eq!(
        pane.mounted_taps(),
        vec![daemon.paths().stdout_log()],
        "stdout tap re-mounted on the new pane"
    );
}
