//! HTTP API route handlers.
//!
//! All endpoints return JSON except the CSV export. State is shared via
//! `Arc<DashboardState>`. Each client unlocks its own session through
//! `POST /api/license` and presents the returned token in the
//! `x-session-token` header; quotas are counted per token.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::engine::{normalize_symbols, ScanOrchestrator, ScanReport, ScanRequest};
use crate::export;
use crate::license::{self, LicenseVerdict, LicenseVerifier, SessionContext};
use crate::scoring::ScoringStrategy;
use crate::storage::{self, SessionMap};
use crate::types::{AnalysisMode, ScanError, Timeframe};

/// Header carrying the token issued by `POST /api/license`.
pub const SESSION_HEADER: &str = "x-session-token";

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Values used when a request leaves a field out.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanDefaults {
    pub timeframe: Timeframe,
    pub mode: AnalysisMode,
    pub strategy: ScoringStrategy,
}

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub orchestrator: ScanOrchestrator,
    pub verifier: Arc<dyn LicenseVerifier>,
    /// One session per issued token.
    pub sessions: RwLock<SessionMap>,
    /// Daily limit given to every new session.
    pub max_uses_per_day: u32,
    pub defaults: ScanDefaults,
    /// Where sessions are persisted after each change. `None` keeps them in memory.
    pub session_file: Option<String>,
    persist_lock: Mutex<()>,
}

impl DashboardState {
    pub fn new(
        orchestrator: ScanOrchestrator,
        verifier: Arc<dyn LicenseVerifier>,
        max_uses_per_day: u32,
        defaults: ScanDefaults,
    ) -> Self {
        Self {
            orchestrator,
            verifier,
            sessions: RwLock::new(SessionMap::new()),
            max_uses_per_day,
            defaults,
            session_file: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Start from previously saved sessions. They are all locked until
    /// their client verifies again.
    pub fn with_sessions(mut self, sessions: SessionMap) -> Self {
        self.sessions = RwLock::new(sessions);
        self
    }

    pub fn with_session_file(mut self, path: impl Into<String>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    /// Authorise the session behind `token`, or open a new one when the
    /// token is absent or unknown. Returns the token and a copy of the session.
    async fn authorize(&self, token: Option<&str>, dev_mode: bool) -> (String, SessionContext) {
        let mut sessions = self.sessions.write().await;
        let token = match token {
            Some(t) if sessions.contains_key(t) => t.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let session = sessions
            .entry(token.clone())
            .or_insert_with(|| SessionContext::new(self.max_uses_per_day));
        session.roll_day_now();
        session.authorize(dev_mode);
        (token, session.clone())
    }

    /// Write all sessions to disk on the blocking pool. No session lock is
    /// held during the write.
    async fn persist(&self) {
        let Some(path) = self.session_file.clone() else {
            return;
        };
        // Writers take turns so the newest snapshot lands last.
        let _turn = self.persist_lock.lock().await;
        let snapshot = self.sessions.read().await.clone();

        match tokio::task::spawn_blocking(move || storage::save_sessions(&snapshot, Some(&path))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to persist sessions"),
            Err(e) => warn!(error = %e, "Session persistence task failed"),
        }
    }
}

pub type AppState = Arc<DashboardState>;

fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub authorized: bool,
    pub dev_mode: bool,
    pub uses_today: u32,
    /// 0 means unlimited.
    pub max_uses_per_day: u32,
    pub remaining: Option<u32>,
    pub day: NaiveDate,
}

impl From<&SessionContext> for SessionResponse {
    fn from(s: &SessionContext) -> Self {
        Self {
            authorized: s.authorized,
            dev_mode: s.dev_mode,
            uses_today: s.uses_today,
            max_uses_per_day: s.max_uses_per_day,
            remaining: s.remaining(),
            day: s.day_stamp,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LicenseRequest {
    pub license_key: String,
}

#[derive(Debug, Serialize)]
pub struct LicenseResponse {
    /// Send back in the `x-session-token` header.
    pub token: String,
    pub verdict: LicenseVerdict,
    pub session: SessionResponse,
}

/// Symbols as either `"AAPL, TSLA"` or `["AAPL", "TSLA"]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SymbolsInput {
    List(Vec<String>),
    Text(String),
}

impl SymbolsInput {
    fn normalized(&self) -> Vec<String> {
        match self {
            SymbolsInput::List(items) => crate::engine::scanner::normalize_symbol_list(items),
            SymbolsInput::Text(raw) => normalize_symbols(raw),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanBody {
    pub symbols: SymbolsInput,
    pub timeframe: Option<Timeframe>,
    pub mode: Option<AnalysisMode>,
    pub scoring: Option<ScoringStrategy>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Handler error mapped onto an HTTP status.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Scan(ScanError),
}

impl From<ScanError> for ApiError {
    fn from(e: ScanError) -> Self {
        ApiError::Scan(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Scan(e) => {
                let status = match &e {
                    ScanError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                    ScanError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                    ScanError::Config(_) | ScanError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/session
///
/// Without a known token this describes a fresh, locked session.
pub async fn get_session(State(state): State<AppState>, headers: HeaderMap) -> Json<SessionResponse> {
    let mut rolled = false;
    let current = match session_token(&headers) {
        Some(token) => {
            let mut sessions = state.sessions.write().await;
            sessions.get_mut(token).map(|session| {
                rolled = session.roll_day_now();
                session.clone()
            })
        }
        None => None,
    };
    if rolled {
        state.persist().await;
    }

    let session = current.unwrap_or_else(|| SessionContext::new(state.max_uses_per_day));
    Json(SessionResponse::from(&session))
}

/// POST /api/license
///
/// The key is verified before any session lock is taken.
pub async fn post_license(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LicenseRequest>,
) -> Result<Json<LicenseResponse>, ApiError> {
    let key = SecretString::new(body.license_key);
    let verdict = license::check(state.verifier.as_ref(), &key).await?;

    let (token, session) = state.authorize(session_token(&headers), verdict.dev_mode).await;
    state.persist().await;
    info!(dev_mode = verdict.dev_mode, uses_today = session.uses_today, "Session unlocked");

    Ok(Json(LicenseResponse {
        token,
        verdict,
        session: SessionResponse::from(&session),
    }))
}

/// Gate, reserve one use and run the scan.
///
/// The use is recorded while the lock is held so concurrent requests cannot
/// overrun the quota. The scan itself runs on a snapshot taken before the
/// reservation.
async fn run_scan(
    state: &DashboardState,
    token: Option<&str>,
    request: ScanRequest,
) -> Result<ScanReport, ApiError> {
    if request.symbols.is_empty() {
        return Err(ApiError::BadRequest("Please enter at least one ticker.".into()));
    }
    let token = token.ok_or_else(|| {
        ScanError::Unauthorized("Enter your license key to continue.".to_string())
    })?;

    let snapshot = {
        let mut sessions = state.sessions.write().await;
        let session = sessions.get_mut(token).ok_or_else(|| {
            ScanError::Unauthorized("Unknown session, enter your license key again.".to_string())
        })?;
        session.roll_day_now();
        session.ensure_may_proceed()?;
        let snapshot = session.clone();
        session.record_use();
        info!(
            uses_today = session.uses_today,
            limit = session.max_uses_per_day,
            "Scan use recorded"
        );
        snapshot
    };
    state.persist().await;

    Ok(state.orchestrator.scan(&request, &snapshot).await?)
}

fn build_request(body: &ScanBody, defaults: &ScanDefaults, scoring: Option<ScoringStrategy>) -> ScanRequest {
    ScanRequest {
        symbols: body.symbols.normalized(),
        timeframe: body.timeframe.unwrap_or(defaults.timeframe),
        mode: body.mode.unwrap_or(defaults.mode),
        scoring,
    }
}

/// POST /api/scan
pub async fn post_scan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ScanBody>,
) -> Result<Json<ScanReport>, ApiError> {
    let request = build_request(&body, &state.defaults, body.scoring);
    Ok(Json(run_scan(&state, session_token(&headers), request).await?))
}

/// POST /api/scan/export
pub async fn post_scan_export(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ScanBody>,
) -> Result<Response, ApiError> {
    let strategy = body.scoring.unwrap_or(state.defaults.strategy);
    let request = build_request(&body, &state.defaults, Some(strategy));
    let report = run_scan(&state, session_token(&headers), request).await?;

    let table = report
        .ranking
        .ok_or_else(|| ApiError::Scan(ScanError::Export("scan produced no ranking".into())))?;
    let csv = export::to_delimited(&table, ',');

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"stockscan.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
