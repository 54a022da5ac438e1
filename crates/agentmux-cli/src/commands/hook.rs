//! `agentmux hook` -- the agent-side hook runtime.
//!
//! The wrapped agent invokes this for each registered hook event, passing
//! the event payload as JSON on stdin. For the turn-completion event the
//! last assistant turn is extracted from the transcript and posted to the
//! daemon's control socket as a broadcast; other events are forwarded as
//! lifecycle events.
//!
//! The hook must never block or fail the agent: delivery problems are
//! appended to `hook_errors.log` in the runtime directory and the process
//! still exits 0.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agentmux_daemon::paths::RuntimePaths;
use agentmux_daemon::{hooks, transcript};
use agentmux_types::Config;

/// Environment variable carrying the control socket path; set by the
/// daemon in the agent's launch command.
pub const CONTROL_SOCK_ENV: &str = "AGENTMUX_CONTROL_SOCK";

/// The hook error log self-truncates past this size.
const ERROR_LOG_MAX_BYTES: u64 = 100_000;

pub fn run() -> anyhow::Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .take(10 * 1024 * 1024)
        .read_to_string(&mut input)?;
    let payload: serde_json::Value =
        serde_json::from_str(&input).unwrap_or(serde_json::Value::Null);

    let event = payload["hook_event_name"].as_str().unwrap_or("");
    if event.is_empty() {
        return Ok(());
    }
    let session = payload["session_id"].as_str().unwrap_or("");
    let cwd = payload["cwd"]
        .as_str()
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let control_sock = resolve_control_sock(&cwd);

    let request = match event {
        "Stop" => {
            let turn = payload["transcript_path"]
                .as_str()
                .and_then(|p| transcript::last_assistant_turn(Path::new(p)))
                .unwrap_or_else(|| fallback_turn(&payload));
            serde_json::json!({
                "type": "broadcast",
                "session": session,
                "turn": turn,
                "ts": chrono::Utc::now().timestamp(),
            })
        }
        _ => serde_json::json!({
            "type": "event",
            "event": event,
            "session": session,
        }),
    };

    if let Err(e) = send_to_control(&control_sock, &request) {
        // The daemon may simply not be running; never fail the agent.
        log_delivery_error(&control_sock, event, &e);
        eprintln!("agentmux hook: {e}");
    }
    Ok(())
}

/// `agentmux uninstall-hooks` -- strip our entries from the agent settings.
pub fn uninstall() -> anyhow::Result<()> {
    let Some(settings) = hooks::default_settings_path() else {
        anyhow::bail!("cannot resolve the agent settings path (HOME unset)");
    };
    hooks::remove(&settings, hooks::HOOK_COMMAND)?;
    println!("agentmux hooks removed from {}", settings.display());
    Ok(())
}

/// Resolve the control socket: explicit env override, then the project's
/// `agentmux.toml`, then the default runtime directory.
fn resolve_control_sock(cwd: &Path) -> PathBuf {
    if let Some(path) = std::env::var_os(CONTROL_SOCK_ENV) {
        return PathBuf::from(path);
    }
    let runtime_dir = Config::load(cwd)
        .map(|config| config.runtime_dir)
        .unwrap_or_else(|_| Config::default().runtime_dir);
    RuntimePaths::new(runtime_dir).control_sock()
}

/// Fallback turn when the transcript cannot be read: one text block from
/// the payload's last assistant message.
fn fallback_turn(payload: &serde_json::Value) -> Vec<serde_json::Value> {
    let text = payload["last_assistant_message"].as_str().unwrap_or("");
    vec![serde_json::json!({"type": "text", "text": text})]
}

fn send_to_control(sock: &Path, request: &serde_json::Value) -> std::io::Result<()> {
    let stream = UnixStream::connect(sock)?;
    stream.set_write_timeout(Some(Duration::from_secs(2)))?;
    let mut line = request.to_string();
    line.push('\n');
    (&stream).write_all(line.as_bytes())
}

/// Append a delivery failure to `hook_errors.log` (best effort, JSONL,
/// self-truncating). This function must never panic or propagate.
fn log_delivery_error(sock: &Path, event: &str, error: &std::io::Error) {
    let Some(runtime_dir) = sock.parent() else {
        return;
    };
    let log_path = runtime_dir.join("hook_errors.log");
    let entry = serde_json::json!({
        "ts": chrono::Utc::now().timestamp(),
        "event": event,
        "error": error.to_string(),
        "sock": sock.display().to_string(),
    });
    let mut line = entry.to_string();
    line.push('\n');

    let oversized = std::fs::metadata(&log_path)
        .map(|m| m.len() > ERROR_LOG_MAX_BYTES)
        .unwrap_or(false);
    let result = if oversized {
        std::fs::write(&log_path, &line)
    } else {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .and_then(|mut f| f.write_all(line.as_bytes()))
    };
    let _ = result;
}
