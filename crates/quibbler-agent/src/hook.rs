//! `quibbler hook forward` and `quibbler hook notify`.
//!
//! Both run inside the coding agent's hook pipeline: they read the hook JSON
//! from stdin, log only to the log file, and communicate through exit codes.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use quibbler_core::paths;
use serde_json::{Value, json};
use tracing::{debug, info};

/// Default hook server base URL.
pub const DEFAULT_MONITOR_BASE: &str = "http://127.0.0.1:8081";
/// Env var overriding the hook server base URL.
pub const MONITOR_BASE_ENV: &str = "QUIBBLER_MONITOR_BASE";
/// When `"1"`, `hook forward` exits without sending anything.
pub const SKIP_FORWARD_ENV: &str = "CLAUDE_MONITOR_SKIP_FORWARD";

const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);
const FEEDBACK_BANNER: &str = "QUIBBLER FEEDBACK";
const RULE: &str = "================================================================================";

/// Everything except RFC 3986 unreserved characters.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Which agent sent the hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Platform {
    /// Claude Code: `session_id`, feedback on stderr.
    Claude,
    /// Cursor: `conversation_id`, feedback as a `followup_message`.
    Cursor,
}

impl Platform {
    /// Session identifier carried by this platform's hook payload.
    pub fn session_id(self, hook: &Value) -> Option<&str> {
        let field = match self {
            Self::Claude => "session_id",
            Self::Cursor => "conversation_id",
        };
        hook.get(field).and_then(Value::as_str).filter(|id| !id.is_empty())
    }
}

/// `<base>/hook/<percent-encoded session id>`
pub fn forward_url(base: &str, session_id: &str) -> String {
    format!(
        "{}/hook/{}",
        base.trim_end_matches('/'),
        utf8_percent_encode(session_id, PATH_SEGMENT)
    )
}

/// Request body for `POST /hook/{session_id}`.
pub fn envelope(hook: Value, cwd: &Path) -> Value {
    let event = hook
        .get("hook_event_name")
        .and_then(Value::as_str)
        .unwrap_or("UnknownEvent")
        .to_owned();
    let received_at = hook
        .get("timestamp")
        .or_else(|| hook.get("time"))
        .cloned()
        .unwrap_or(Value::Null);
    json!({
        "event": event,
        "receivedAt": received_at,
        "payload": hook,
        "source_path": cwd,
    })
}

/// Post one hook event to the server at `base`.
pub async fn forward(platform: Platform, raw: &str, cwd: &Path, base: &str) -> Result<()> {
    if raw.trim().is_empty() {
        bail!("empty stdin, nothing to forward");
    }
    let hook: Value = serde_json::from_str(raw).context("Invalid hook JSON on stdin")?;
    let Some(session_id) = platform.session_id(&hook).map(str::to_owned) else {
        bail!("no session id in hook payload for platform {platform:?}");
    };

    let url = forward_url(base, &session_id);
    let body = envelope(hook, cwd);
    info!(event = %body["event"], %url, "forwarding hook event");

    let client = reqwest::Client::builder()
        .timeout(FORWARD_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;
    let response = client
        .post(&url)
        .json(&body)
        .send()
        .await
        .with_context(|| format!("Failed to reach {url}"))?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        bail!("server rejected hook event ({status}): {text}");
    }
    debug!(%status, "hook event forwarded");
    Ok(())
}

/// Result of `hook notify`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notified {
    /// Feedback was shown and the file removed (exit 2).
    Shown,
    /// No pending feedback (exit 0).
    Nothing,
}

/// Show and consume pending feedback for the hook's session.
pub fn notify(
    platform: Platform,
    raw: &str,
    cwd: &Path,
    stdout: &mut impl Write,
    stderr: &mut impl Write,
) -> Result<Notified> {
    if raw.trim().is_empty() {
        return Ok(Notified::Nothing);
    }
    let hook: Value = serde_json::from_str(raw).context("Invalid hook JSON on stdin")?;
    let Some(session_id) = platform.session_id(&hook) else {
        return Ok(Notified::Nothing);
    };

    let path = paths::feedback_path(cwd, session_id);
    let feedback = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Notified::Nothing),
        Err(error) => {
            return Err(error).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    match platform {
        Platform::Claude => {
            writeln!(stderr, "{RULE}\n{FEEDBACK_BANNER}\n{RULE}\n{feedback}\n{RULE}")?;
        }
        Platform::Cursor => {
            let message = json!({ "followup_message": format!("{FEEDBACK_BANNER}\n\n{feedback}") });
            writeln!(stdout, "{message}")?;
        }
    }
    std::fs::remove_file(&path)
        .with_context(|| format!("Failed to remove {}", path.display()))?;
    info!(path = %path.display(), "feedback shown");
    Ok(Notified::Shown)
}
