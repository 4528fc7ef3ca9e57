//! Batch scan orchestrator.
//!
//! Turns a list of symbols into per-symbol metric rows and, when asked, a
//! ranked table. Each symbol is fetched and computed independently: a
//! provider outage or an unknown ticker produces a marked row, never a
//! failed batch. Fetches run through a bounded stream with a courtesy delay
//! so the data provider is not hammered, and the whole batch is capped by
//! a deadline after which unfinished symbols are reported as timed out.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::data::PriceDataProvider;
use crate::license::SessionContext;
use crate::metrics::{self, MetricsConfig};
use crate::scoring::{default_momentum_lookbacks, CompositeWeights, ScoringEngine, ScoringStrategy};
use crate::types::{
    AnalysisMode, MetricResult, PriceSeries, RankedTable, ScanError, SeriesMeta, Timeframe,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Runtime knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct ScannerSettings {
    /// Maximum symbols fetched at once.
    pub max_concurrency: usize,
    /// Pause before each provider request.
    pub request_delay: Duration,
    /// Overall batch deadline.
    pub scan_timeout: Duration,
    pub metrics: MetricsConfig,
    pub weights: CompositeWeights,
    /// Lookback names scoring reads momentum from, in preference order.
    pub momentum_lookbacks: Vec<String>,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            request_delay: Duration::from_millis(250),
            scan_timeout: Duration::from_secs(60),
            metrics: MetricsConfig::default(),
            weights: CompositeWeights::default(),
            momentum_lookbacks: default_momentum_lookbacks(),
        }
    }
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

/// Split free-form input on commas and whitespace, uppercase, and dedupe
/// keeping first-seen order.
pub fn normalize_symbols(raw: &str) -> Vec<String> {
    normalize_symbol_list(&[raw])
}

/// Same as `normalize_symbols`, over several input strings.
pub fn normalize_symbol_list<S: AsRef<str>>(items: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        for token in item
            .as_ref()
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            let symbol = token.to_uppercase();
            if !out.contains(&symbol) {
                out.push(symbol);
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Request / report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub mode: AnalysisMode,
    /// Build a ranked table with this strategy.
    pub scoring: Option<ScoringStrategy>,
}

impl ScanRequest {
    pub fn new<S: AsRef<str>>(symbols: &[S], timeframe: Timeframe, mode: AnalysisMode) -> Self {
        Self {
            symbols: normalize_symbol_list(symbols),
            timeframe,
            mode,
            scoring: None,
        }
    }

    pub fn with_scoring(mut self, strategy: ScoringStrategy) -> Self {
        self.scoring = Some(strategy);
        self
    }
}

/// Outcome of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum RowStatus {
    Ok,
    /// Provider returned no bars.
    NoData,
    /// Transport / parse failure talking to the provider.
    ProviderError(String),
    /// Batch deadline passed before this symbol finished.
    TimedOut,
}

impl RowStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, RowStatus::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolReport {
    pub symbol: String,
    pub status: RowStatus,
    pub currency: Option<String>,
    /// Bars the metrics were computed from.
    pub bars: usize,
    pub metrics: MetricResult,
}

impl SymbolReport {
    fn failed(symbol: &str, status: RowStatus, template: &MetricResult) -> Self {
        Self {
            symbol: symbol.to_string(),
            status,
            currency: None,
            bars: 0,
            metrics: template.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub generated_at: DateTime<Utc>,
    pub timeframe: Timeframe,
    pub mode: AnalysisMode,
    pub scoring: Option<ScoringStrategy>,
    /// One row per requested symbol, in request order.
    pub rows: Vec<SymbolReport>,
    pub ranking: Option<RankedTable>,
}

impl ScanReport {
    pub fn row(&self, symbol: &str) -> Option<&SymbolReport> {
        self.rows.iter().find(|r| r.symbol == symbol)
    }

    pub fn ok_count(&self) -> usize {
        self.rows.iter().filter(|r| r.status.is_ok()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.rows.len() - self.ok_count()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Stateless fetch → compute → collect pipeline.
pub struct ScanOrchestrator {
    provider: Arc<dyn PriceDataProvider>,
    settings: ScannerSettings,
}

impl ScanOrchestrator {
    pub fn new(provider: Arc<dyn PriceDataProvider>, settings: ScannerSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &ScannerSettings {
        &self.settings
    }

    /// Run one batch.
    ///
    /// The session is only read: the call is refused up front when it is
    /// locked or over quota. Recording the use is the caller's job.
    pub async fn scan(
        &self,
        request: &ScanRequest,
        session: &SessionContext,
    ) -> Result<ScanReport, ScanError> {
        session.ensure_may_proceed()?;

        let symbols = normalize_symbol_list(&request.symbols);
        info!(
            symbols = symbols.len(),
            timeframe = %request.timeframe,
            mode = %request.mode,
            scoring = ?request.scoring,
            "Starting scan"
        );

        let deadline = tokio::time::Instant::now() + self.settings.scan_timeout;
        let mut slots: Vec<Option<SymbolReport>> = vec![None; symbols.len()];

        {
            let mut pending = stream::iter(symbols.clone().into_iter().enumerate())
                .map(|(idx, symbol): (usize, String)| async move {
                    (idx, self.scan_symbol(&symbol, request).await)
                })
                .buffer_unordered(self.settings.max_concurrency.max(1));

            loop {
                match tokio::time::timeout_at(deadline, pending.next()).await {
                    Ok(Some((idx, report))) => slots[idx] = Some(report),
                    Ok(None) => break,
                    Err(_) => {
                        let finished = slots.iter().filter(|s| s.is_some()).count();
                        warn!(
                            finished,
                            total = symbols.len(),
                            timeout_secs = self.settings.scan_timeout.as_secs_f64(),
                            "Scan deadline reached, returning partial results"
                        );
                        break;
                    }
                }
            }
        }

        let template = self.unavailable_template(request);
        let rows: Vec<SymbolReport> = symbols
            .iter()
            .zip(slots)
            .map(|(symbol, slot)| {
                slot.unwrap_or_else(|| SymbolReport::failed(symbol, RowStatus::TimedOut, &template))
            })
            .collect();

        let ranking = request.scoring.map(|strategy| {
            ScoringEngine::new(strategy, self.settings.weights)
                .with_momentum_lookbacks(&self.settings.momentum_lookbacks)
                .rank(rows.iter().map(|r| (r.symbol.clone(), r.metrics.clone())))
        });

        let report = ScanReport {
            generated_at: Utc::now(),
            timeframe: request.timeframe,
            mode: request.mode,
            scoring: request.scoring,
            rows,
            ranking,
        };

        info!(
            ok = report.ok_count(),
            failed = report.failed_count(),
            "Scan complete"
        );

        Ok(report)
    }

    /// Fetch and compute a single symbol. Never fails.
    async fn scan_symbol(&self, symbol: &str, request: &ScanRequest) -> SymbolReport {
        if !self.settings.request_delay.is_zero() {
            tokio::time::sleep(self.settings.request_delay).await;
        }

        let fetched = match self.provider.fetch(symbol, request.timeframe).await {
            Ok(f) => f,
            Err(e) => {
                let message = format!("{e:#}");
                warn!(symbol, error = %message, "Fetch failed, continuing without");
                return SymbolReport::failed(
                    symbol,
                    RowStatus::ProviderError(message),
                    &self.unavailable_template(request),
                );
            }
        };

        if fetched.series.is_empty() {
            debug!(symbol, "No data returned");
            return SymbolReport::failed(
                symbol,
                RowStatus::NoData,
                &self.unavailable_template(request),
            );
        }

        let metrics = self.compute(&fetched.series, &fetched.meta, request);
        debug!(symbol, bars = fetched.series.len(), fields = metrics.len(), "Symbol computed");

        SymbolReport {
            symbol: symbol.to_string(),
            status: RowStatus::Ok,
            currency: fetched.meta.currency,
            bars: fetched.series.len(),
            metrics,
        }
    }

    fn compute(&self, series: &PriceSeries, meta: &SeriesMeta, request: &ScanRequest) -> MetricResult {
        let mut out = metrics::compute(request.mode, series, meta, &self.settings.metrics);
        if request.scoring.is_some() {
            out.merge_missing(&metrics::scoring_inputs(series, meta, &self.settings.metrics));
        }
        out
    }

    /// Keys a failed row carries, all unavailable.
    fn unavailable_template(&self, request: &ScanRequest) -> MetricResult {
        let empty = PriceSeries::empty("");
        self.compute(&empty, &SeriesMeta::default(), request)
            .to_unavailable()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FetchedSeries, MockPriceDataProvider};
    use crate::types::MetricValue;
    use anyhow::Result;
    use async_trait::async_trait;

    const EXAMPLE: [f64; 7] = [100.0, 102.0, 101.0, 105.0, 103.0, 99.0, 97.0];

    fn settings() -> ScannerSettings {
        ScannerSettings {
            request_delay: Duration::ZERO,
            scan_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn unlocked() -> SessionContext {
        let mut s = SessionContext::new(10);
        s.authorize(false);
        s
    }

    fn rising(symbol: &str, step: f64) -> FetchedSeries {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + step * i as f64 + (i % 3) as f64).collect();
        FetchedSeries {
            series: PriceSeries::from_closes(symbol, &closes),
            meta: SeriesMeta {
                currency: Some("USD".into()),
                ..Default::default()
            },
        }
    }

    fn orchestrator(mock: MockPriceDataProvider) -> ScanOrchestrator {
        ScanOrchestrator::new(Arc::new(mock), settings())
    }

    #[test]
    fn test_normalize_symbols() {
        assert_eq!(
            normalize_symbols("aapl, tsla,AAPL ,,nvda"),
            vec!["AAPL", "TSLA", "NVDA"]
        );
        assert_eq!(normalize_symbols("  msft\tgoog  "), vec!["MSFT", "GOOG"]);
        assert!(normalize_symbols(" , ,").is_empty());
    }

    #[test]
    fn test_request_dedupes() {
        let req = ScanRequest::new(&["aapl", "AAPL", "tsla"], Timeframe::OneYear, AnalysisMode::Momentum);
        assert_eq!(req.symbols, vec!["AAPL", "TSLA"]);
    }

    #[tokio::test]
    async fn test_example_momentum_row() {
        let mut mock = MockPriceDataProvider::new();
        mock.expect_fetch().returning(|s, _| {
            Ok(FetchedSeries {
                series: PriceSeries::from_closes(s, &EXAMPLE),
                meta: SeriesMeta::default(),
            })
        });

        let req = ScanRequest::new(&["ex"], Timeframe::OneYear, AnalysisMode::Momentum);
        let report = orchestrator(mock).scan(&req, &unlocked()).await.unwrap();

        let row = report.row("EX").unwrap();
        assert_eq!(row.status, RowStatus::Ok);
        assert_eq!(row.bars, 7);
        assert_eq!(row.metrics.value("last_price"), Some(97.0));
        assert!((row.metrics.value("1w_change_pct").unwrap() + 4.90).abs() < 0.01);
        assert_eq!(row.metrics.get("1m_change_pct"), Some(MetricValue::Unavailable));
        assert!(report.ranking.is_none());
    }

    #[tokio::test]
    async fn test_no_data_symbol_keeps_row_and_ranks_last() {
        let mut mock = MockPriceDataProvider::new();
        mock.expect_fetch().returning(|s, _| match s {
            "AAA" => Ok(FetchedSeries::empty(s)),
            "BBB" => Ok(rising(s, 1.0)),
            _ => Ok(rising(s, -1.0)),
        });

        let req = ScanRequest::new(&["AAA", "BBB", "CCC"], Timeframe::OneYear, AnalysisMode::Momentum)
            .with_scoring(ScoringStrategy::Composite);
        let report = orchestrator(mock).scan(&req, &unlocked()).await.unwrap();

        assert_eq!(report.rows.len(), 3);
        let no_data = report.row("AAA").unwrap();
        assert_eq!(no_data.status, RowStatus::NoData);
        assert!(no_data.metrics.all_unavailable());
        assert!(no_data.metrics.contains("1w_change_pct"));

        let ranking = report.ranking.unwrap();
        assert_eq!(ranking.len(), 3);
        assert_eq!(ranking.rows.last().unwrap().symbol, "AAA");
        assert_eq!(ranking.rows.last().unwrap().score, MetricValue::Unavailable);
        assert_eq!(ranking.rows[0].symbol, "BBB");
    }

    #[tokio::test]
    async fn test_provider_error_does_not_abort_batch() {
        let mut mock = MockPriceDataProvider::new();
        mock.expect_fetch().returning(|s, _| {
            if s == "DOWN" {
                Err(anyhow::anyhow!("503 Service Unavailable"))
            } else {
                Ok(rising(s, 0.5))
            }
        });

        let req = ScanRequest::new(&["UP", "DOWN"], Timeframe::OneYear, AnalysisMode::Volatility);
        let report = orchestrator(mock).scan(&req, &unlocked()).await.unwrap();

        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.ok_count(), 1);
        match &report.row("DOWN").unwrap().status {
            RowStatus::ProviderError(msg) => assert!(msg.contains("503")),
            other => panic!("unexpected status {other:?}"),
        }
        assert!(report.row("UP").unwrap().metrics.value("daily_volatility").is_some());
    }

    #[tokio::test]
    async fn test_rows_keep_request_order() {
        let mut mock = MockPriceDataProvider::new();
        mock.expect_fetch().returning(|s, _| Ok(rising(s, 1.0)));

        let symbols = ["ZZ", "AA", "MM", "BB", "YY", "CC"];
        let req = ScanRequest::new(&symbols, Timeframe::OneYear, AnalysisMode::MovingAverages);
        let report = orchestrator(mock).scan(&req, &unlocked()).await.unwrap();

        let got: Vec<&str> = report.rows.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(got, symbols);
        assert!(report.rows[0].metrics.contains("SMA_20"));
        assert!(!report.rows[0].metrics.contains("SMA_50"));
        assert_eq!(report.rows[0].currency.as_deref(), Some("USD"));
    }

    #[tokio::test]
    async fn test_locked_session_is_refused_before_fetch() {
        let mut mock = MockPriceDataProvider::new();
        mock.expect_fetch().times(0);

        let req = ScanRequest::new(&["AAPL"], Timeframe::OneYear, AnalysisMode::Momentum);
        let err = orchestrator(mock)
            .scan(&req, &SessionContext::new(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_exhausted_quota_is_refused() {
        let mut mock = MockPriceDataProvider::new();
        mock.expect_fetch().times(0);

        let mut session = SessionContext::new(1);
        session.authorize(false);
        session.record_use();

        let req = ScanRequest::new(&["AAPL"], Timeframe::OneYear, AnalysisMode::Momentum);
        let err = orchestrator(mock).scan(&req, &session).await.unwrap_err();
        assert!(matches!(err, ScanError::QuotaExceeded { used: 1, limit: 1 }));
    }

    #[tokio::test]
    async fn test_scoring_adds_inputs_to_fundamentals_mode() {
        let mut mock = MockPriceDataProvider::new();
        mock.expect_fetch().returning(|s, _| {
            let mut f = rising(s, 1.0);
            f.meta.year_high = Some(140.0);
            f.meta.last_price = Some(131.0);
            Ok(f)
        });

        let req = ScanRequest::new(&["NVDA"], Timeframe::OneYear, AnalysisMode::Fundamentals)
            .with_scoring(ScoringStrategy::Breakout);
        let report = orchestrator(mock).scan(&req, &unlocked()).await.unwrap();

        let row = &report.rows[0];
        // Fundamentals come first and keep the provider's last price.
        assert_eq!(row.metrics.keys().next(), Some("last_price"));
        assert_eq!(row.metrics.value("last_price"), Some(131.0));
        assert!(row.metrics.contains("1m_change_pct"));
        let ranking = report.ranking.unwrap();
        assert!(ranking.rows[0].score.is_available());
    }

    struct SlowProvider;

    #[async_trait]
    impl PriceDataProvider for SlowProvider {
        async fn fetch(&self, symbol: &str, _timeframe: Timeframe) -> Result<FetchedSeries> {
            if symbol == "SLOW" {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(FetchedSeries {
                series: PriceSeries::from_closes(symbol, &EXAMPLE),
                meta: SeriesMeta::default(),
            })
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_deadline_returns_partial_results() {
        let orchestrator = ScanOrchestrator::new(
            Arc::new(SlowProvider),
            ScannerSettings {
                scan_timeout: Duration::from_millis(200),
                ..settings()
            },
        );

        let req = ScanRequest::new(&["FAST", "SLOW", "QUICK"], Timeframe::OneYear, AnalysisMode::Momentum)
            .with_scoring(ScoringStrategy::Composite);
        let report = orchestrator.scan(&req, &unlocked()).await.unwrap();

        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.row("FAST").unwrap().status, RowStatus::Ok);
        assert_eq!(report.row("QUICK").unwrap().status, RowStatus::Ok);
        let slow = report.row("SLOW").unwrap();
        assert_eq!(slow.status, RowStatus::TimedOut);
        assert!(slow.metrics.all_unavailable());
        assert_eq!(report.ranking.unwrap().rows.last().unwrap().symbol, "SLOW");
    }

    #[tokio::test]
    async fn test_renamed_lookback_still_ranks() {
        let mut mock = MockPriceDataProvider::new();
        mock.expect_fetch().returning(|s, _| match s {
            "UP" => Ok(rising(s, 1.0)),
            _ => Ok(rising(s, -1.0)),
        });

        let settings = ScannerSettings {
            metrics: MetricsConfig {
                lookbacks: vec![metrics::Lookback::new("2w", 10)],
                ..Default::default()
            },
            momentum_lookbacks: vec!["2w".to_string()],
            ..settings()
        };
        let orchestrator = ScanOrchestrator::new(Arc::new(mock), settings);

        let req = ScanRequest::new(&["DOWN", "UP"], Timeframe::OneYear, AnalysisMode::Momentum)
            .with_scoring(ScoringStrategy::Composite);
        let report = orchestrator.scan(&req, &unlocked()).await.unwrap();

        let ranking = report.ranking.unwrap();
        assert_eq!(ranking.symbols(), vec!["UP", "DOWN"]);
        assert!(ranking.rows.iter().all(|r| r.score.is_available()));
    }

    #[tokio::test]
    async fn test_scan_runs_on_spawned_task() {
        let mut mock = MockPriceDataProvider::new();
        mock.expect_fetch().returning(|s, _| Ok(rising(s, 1.0)));
        let orchestrator = Arc::new(orchestrator(mock));

        let handle = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                let req = ScanRequest::new(&["AAPL", "MSFT"], Timeframe::OneYear, AnalysisMode::Momentum);
                orchestrator.scan(&req, &unlocked()).await
            }
        });

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.ok_count(), 2);
    }

    #[test]
    fn test_row_status_json() {
        let json = serde_json::to_string(&RowStatus::ProviderError("boom".into())).unwrap();
        assert_eq!(json, r#"{"kind":"provider_error","message":"boom"}"#);
        let json = serde_json::to_string(&RowStatus::NoData).unwrap();
        assert_eq!(json, r#"{"kind":"no_data"}"#);
    }
}
