//! `/health` endpoint.

use std::time::Instant;

use quibbler_runtime::SessionSnapshot;
use serde::Serialize;

/// Characters of a session id shown before the ellipsis.
const SESSION_ID_PREFIX_CHARS: usize = 8;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"healthy"` while the server is running.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Number of live sessions.
    pub active_sessions: usize,
    /// One entry per live session, sorted by key.
    pub sessions: Vec<SessionHealth>,
}

/// Per-session counters.
#[derive(Debug, Clone, Serialize)]
pub struct SessionHealth {
    /// Truncated context key.
    pub session_id: String,
    /// Completed reviews.
    pub reviews: u64,
    /// Stored turns.
    pub messages: usize,
    /// Whether a rolling summary exists.
    pub has_summary: bool,
}

/// Build a health response from registry snapshots.
pub fn health_check(start_time: Instant, sessions: &[SessionSnapshot]) -> HealthResponse {
    HealthResponse {
        status: "healthy",
        uptime_secs: start_time.elapsed().as_secs(),
        active_sessions: sessions.len(),
        sessions: sessions
            .iter()
            .map(|snapshot| SessionHealth {
                session_id: truncate_id(&snapshot.context_key),
                reviews: snapshot.stats.review_count,
                messages: snapshot.stats.turn_count,
                has_summary: snapshot.stats.has_summary,
            })
            .collect(),
    }
}

fn truncate_id(key: &str) -> String {
    let prefix: String = key.chars().take(SESSION_ID_PREFIX_CHARS).collect();
    format!("{prefix}...")
}
