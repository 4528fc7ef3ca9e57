//! Persistence layer.
//!
//! Saves and loads daily usage counters to JSON files so the quota
//! survives restarts: one session for the CLI, and a token-keyed map for
//! the API server. The unlock flag is never written.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::license::SessionContext;

/// Default CLI session file path.
pub const DEFAULT_SESSION_FILE: &str = "stockscan_session.json";

/// Default API session file path.
pub const DEFAULT_API_SESSIONS_FILE: &str = "stockscan_api_sessions.json";

/// API sessions keyed by the token handed out on unlock.
pub type SessionMap = HashMap<String, SessionContext>;

/// Save the session to a JSON file.
pub fn save_session(session: &SessionContext, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_SESSION_FILE);
    let json = serde_json::to_string_pretty(session).context("Failed to serialise session")?;

    std::fs::write(path, &json).with_context(|| format!("Failed to write session to {path}"))?;

    debug!(path, uses_today = session.uses_today, "Session saved");
    Ok(())
}

/// Load the session from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_session(path: Option<&str>) -> Result<Option<SessionContext>> {
    let path = path.unwrap_or(DEFAULT_SESSION_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved session found, starting locked");
        return Ok(None);
    }

    let json =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read session from {path}"))?;

    let session: SessionContext = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse session from {path}"))?;

    info!(
        path,
        uses_today = session.uses_today,
        day = %session.day_stamp,
        "Session loaded from disk"
    );

    Ok(Some(session))
}

/// Load the saved session, or start a fresh locked one.
///
/// The configured daily limit always wins over the stored one, and the
/// counter is rolled over if the stored day is stale.
pub fn load_or_new(path: Option<&str>, max_uses_per_day: u32) -> Result<SessionContext> {
    let mut session = load_session(path)?.unwrap_or_else(|| SessionContext::new(max_uses_per_day));
    session.max_uses_per_day = max_uses_per_day;
    session.roll_day_now();
    Ok(session)
}

/// Save every API session to a JSON file.
pub fn save_sessions(sessions: &SessionMap, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_API_SESSIONS_FILE);
    let json = serde_json::to_string_pretty(sessions).context("Failed to serialise sessions")?;

    std::fs::write(path, &json).with_context(|| format!("Failed to write sessions to {path}"))?;

    debug!(path, sessions = sessions.len(), "API sessions saved");
    Ok(())
}

/// Load API sessions, applying the configured limit and rolling stale days.
/// A missing file is an empty map. Every restored token starts locked.
pub fn load_sessions(path: Option<&str>, max_uses_per_day: u32) -> Result<SessionMap> {
    let path = path.unwrap_or(DEFAULT_API_SESSIONS_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved API sessions found");
        return Ok(SessionMap::new());
    }

    let json =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read sessions from {path}"))?;
    let mut sessions: SessionMap = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse sessions from {path}"))?;

    for session in sessions.values_mut() {
        session.max_uses_per_day = max_uses_per_day;
        session.roll_day_now();
    }

    info!(path, sessions = sessions.len(), "API sessions loaded from disk");
    Ok(sessions)
}

/// Delete the session file (logout or reset).
pub fn delete_session(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_SESSION_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path).with_context(|| format!("Failed to delete session file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
