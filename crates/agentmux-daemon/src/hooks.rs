//! Agent hook installation.
//!
//! On startup the daemon registers a command hook (`agentmux hook`) in the
//! agent's settings file for the lifecycle events it needs: session start
//! (to learn the session id and transcript location), turn completion (the
//! broadcast trigger), session end, and permission requests. Per-tool-call
//! events are deliberately not registered; they would fire for agent
//! instances outside this daemon's control.
//!
//! Installation is idempotent and preserves every foreign key and hook in
//! the settings file.

use std::path::{Path, PathBuf};

use agentmux_types::MuxError;

/// The hook events the daemon binds to.
pub const HOOK_EVENTS: &[&str] = &["SessionStart", "Stop", "SessionEnd", "PermissionRequest"];

/// The command registered for each event.
pub const HOOK_COMMAND: &str = "agentmux hook";

/// Default settings file of the wrapped agent.
pub fn default_settings_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".claude")
            .join("settings.json")
    })
}

/// The matcher-group wrapper the agent expects per event:
/// `{"hooks": [{"type": "command", "command": <cmd>}]}`.
fn hook_wrapper(command: &str) -> serde_json::Value {
    serde_json::json!({
        "hooks": [
            {"type": "command", "command": command}
        ]
    })
}

/// True if `wrapper` is an agentmux entry for `command` (either the nested
/// wrapper format or a legacy flat handler).
fn is_our_wrapper(wrapper: &serde_json::Value, command: &str) -> bool {
    if let Some(inner) = wrapper.get("hooks").and_then(|v| v.as_array()) {
        return inner.iter().any(|h| {
            h.get("command")
                .and_then(|v| v.as_str())
                .is_some_and(|c| c == command)
        });
    }
    wrapper
        .get("command")
        .and_then(|v| v.as_str())
        .is_some_and(|c| c == command)
}

fn read_settings(path: &Path) -> serde_json::Value {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_else(|| serde_json::json!({}))
}

fn write_settings(path: &Path, settings: &serde_json::Value) -> Result<(), MuxError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| MuxError::Config(format!("create {}: {e}", parent.display())))?;
    }
    let mut output = serde_json::to_string_pretty(settings)
        .map_err(|e| MuxError::Config(format!("serialize settings: {e}")))?;
    output.push('\n');
    std::fs::write(path, output)
        .map_err(|e| MuxError::Config(format!("write {}: {e}", path.display())))
}

/// Install the hook entries into `settings_path` (idempotent).
///
/// Stale entries for the same command are replaced, everything else in the
/// file is preserved.
pub fn install(settings_path: &Path, command: &str) -> Result<(), MuxError> {
    let mut settings = read_settings(settings_path);
    let obj = settings
        .as_object_mut()
        .ok_or_else(|| MuxError::Config("settings file is not a JSON object".into()))?;

    let hooks = obj.entry("hooks").or_insert(serde_json::json!({}));
    let hooks_obj = hooks
        .as_object_mut()
        .ok_or_else(|| MuxError::Config("\"hooks\" is not a JSON object".into()))?;

    for event in HOOK_EVENTS {
        let entry = hooks_obj.entry(*event).or_insert(serde_json::json!([]));
        let array = entry
            .as_array_mut()
            .ok_or_else(|| MuxError::Config(format!("hooks.{event} is not an array")))?;
        array.retain(|wrapper| !is_our_wrapper(wrapper, command));
        array.push(hook_wrapper(command));
    }

    write_settings(settings_path, &settings)
}

/// Remove the hook entries from `settings_path`, dropping event lists and
/// the `hooks` object itself when they become empty.
pub fn remove(settings_path: &Path, command: &str) -> Result<(), MuxError> {
    let mut settings = read_settings(settings_path);
    let Some(obj) = settings.as_object_mut() else {
        return Ok(());
    };
    let Some(hooks_obj) = obj.get_mut("hooks").and_then(|h| h.as_object_mut()) else {
        return Ok(());
    };

    for event in HOOK_EVENTS {
        if let Some(array) = hooks_obj.get_mut(*event).and_then(|v| v.as_array_mut()) {
            array.retain(|wrapper| !is_our_wrapper(wrapper, command));
            if array.is_empty() {
                hooks_obj.remove(*event);
            }
        }
    }
    if hooks_obj.is_empty() {
        obj.remove("hooks");
    }

    write_settings(settings_path, &settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_at(dir: &Path) -> PathBuf {
        dir.join("settings.json")
    }

    fn load(path: &Path) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn install_creates_file_with_all_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = settings_at(dir.path());
        install(&path, HOOK_COMMAND).unwrap();

        let settings = load(&path);
        for event in HOOK_EVENTS {
            let arr = settings["hooks"][event].as_array().unwrap();
            assert_eq!(arr.len(), 1, "{event} should have one entry");
            assert_eq!(arr[0]["hooks"][0]["command"], HOOK_COMMAND);
        }
        // Per-tool-call events must not be registered.
        assert!(settings["hooks"].get("PreToolUse").is_none());
        assert!(settings["hooks"].get("PostToolUse").is_none());
    }

    #[test]
    fn install_twice_leaves_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = settings_at(dir.path());
        install(&path, HOOK_COMMAND).unwrap();
        install(&path, HOOK_COMMAND).unwrap();

        let settings = load(&path);
        for event in HOOK_EVENTS {
            assert_eq!(
                settings["hooks"][event].as_array().unwrap().len(),
                1,
                "{event} should not duplicate"
            );
        }
    }

    #[test]
    fn install_preserves_foreign_keys_and_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let path = settings_at(dir.path());
        std::fs::write(
            &path,
            serde_json::to_string_pretty(&serde_json::json!({
                "model": "opus",
                "hooks": {
                    "Stop": [
                        {"hooks": [{"type": "command", "command": "notify-send done"}]}
                    ]
                }
            }))
            .unwrap(),
        )
        .unwrap();

        install(&path, HOOK_COMMAND).unwrap();

        let settings = load(&path);
        assert_eq!(settings["model"], "opus");
        let stop = settings["hooks"]["Stop"].as_array().unwrap();
        assert_eq!(stop.len(), 2, "foreign Stop hook plus ours");
        assert_eq!(stop[0]["hooks"][0]["command"], "notify-send done");
    }

    #[test]
    fn remove_restores_prior_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = settings_at(dir.path());
        std::fs::write(&path, "{\"model\": \"opus\"}\n").unwrap();

        install(&path, HOOK_COMMAND).unwrap();
        remove(&path, HOOK_COMMAND).unwrap();

        let settings = load(&path);
        assert_eq!(settings["model"], "opus");
        assert!(settings.get("hooks").is_none(), "hooks object removed when empty");
    }

    #[test]
    fn remove_keeps_foreign_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let path = settings_at(dir.path());
        std::fs::write(
            &path,
            serde_json::to_string(&serde_json::json!({
                "hooks": {
                    "Stop": [{"hooks": [{"type": "command", "command": "other"}]}]
                }
            }))
            .unwrap(),
        )
        .unwrap();

        install(&path, HOOK_COMMAND).unwrap();
        remove(&path, HOOK_COMMAND).unwrap();

        let settings = load(&path);
        let stop = settings["hooks"]["Stop"].as_array().unwrap();
        assert_eq!(stop.len(), 1);
        assert_eq!(stop[0]["hooks"][0]["command"], "other");
    }

    #[test]
    fn stale_wrapper_detection_handles_flat_format() {
        let nested = serde_json::json!({
            "hooks": [{"type": "command", "command": "agentmux hook"}]
        });
        assert!(is_our_wrapper(&nested, "agentmux hook"));

        let flat = serde_json::json!({"type": "command", "command": "agentmux hook"});
        assert!(is_our_wrapper(&flat, "agentmux hook"));

        let other = serde_json::json!({
            "hooks": [{"type": "command", "command": "echo hi"}]
        });
        assert!(!is_our_wrapper(&other, "agentmux hook"));
    }
}
