//! End-to-end tests of the scan pipeline against a deterministic provider:
//! license unlock, quota, scanning, ranking, caching, export and session
//! persistence.

mod common;

use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use common::{trending, MockDataProvider};
use stockscan::data::cache::CachedProvider;
use stockscan::engine::{RowStatus, ScanOrchestrator, ScanRequest, ScannerSettings};
use stockscan::export;
use stockscan::license::gumroad::{GumroadSettings, GumroadVerifier};
use stockscan::license::{self, SessionContext};
use stockscan::scoring::ScoringStrategy;
use stockscan::storage;
use stockscan::types::{AnalysisMode, MetricValue, ScanError, SeriesMeta, Timeframe};

fn settings() -> ScannerSettings {
    ScannerSettings {
        request_delay: Duration::ZERO,
        ..Default::default()
    }
}

fn watchlist() -> MockDataProvider {
    MockDataProvider::new()
        .with_series("UPUP", trending(60, 100.0, 1.0))
        .with_series("DOWN", trending(60, 200.0, -1.0))
        .with_meta(
            "NEAR",
            trending(60, 100.0, 0.2),
            SeriesMeta {
                last_price: Some(112.0),
                year_high: Some(115.0),
                year_low: Some(80.0),
                market_cap: Some(2.5e12),
                currency: Some("USD".into()),
            },
        )
}

async fn unlocked_session(limit: u32) -> SessionContext {
    // No product configured: dev-mode verification, no network.
    let verifier = GumroadVerifier::new(GumroadSettings::default()).unwrap();
    let mut session = SessionContext::new(limit);
    assert_ok!(license::unlock(&mut session, &verifier, &SecretString::new("ANY-KEY".into())).await);
    session
}

#[tokio::test]
async fn test_batch_with_unknown_symbol_ranks_it_last() {
    let orchestrator = ScanOrchestrator::new(Arc::new(watchlist()), settings());
    let session = unlocked_session(10).await;

    let request = ScanRequest::new(&["upup", "nope", "down"], Timeframe::OneYear, AnalysisMode::Momentum)
        .with_scoring(ScoringStrategy::Composite);
    let report = orchestrator.scan(&request, &session).await.unwrap();

    assert_eq!(report.rows.len(), 3);
    assert_eq!(report.row("NOPE").unwrap().status, RowStatus::NoData);

    let ranking = report.ranking.unwrap();
    assert_eq!(ranking.symbols(), vec!["UPUP", "DOWN", "NOPE"]);
    assert_eq!(ranking.rows[2].score, MetricValue::Unavailable);
    assert!(ranking.rows[0].score.value().unwrap() > ranking.rows[1].score.value().unwrap());
}

#[tokio::test]
async fn test_breakout_rewards_proximity_to_high() {
    let orchestrator = ScanOrchestrator::new(Arc::new(watchlist()), settings());
    let session = unlocked_session(10).await;

    let request = ScanRequest::new(&["NEAR"], Timeframe::OneYear, AnalysisMode::Fundamentals)
        .with_scoring(ScoringStrategy::Breakout);
    let report = orchestrator.scan(&request, &session).await.unwrap();

    let row = report.row("NEAR").unwrap();
    assert_eq!(row.currency.as_deref(), Some("USD"));
    assert_eq!(row.metrics.value("market_cap"), Some(2.5e12));

    // 112 is within 10% of 115, so the score carries the bonus on top of
    // the (capped) one-month change.
    let momentum = row.metrics.value("1m_change_pct").unwrap().clamp(-10.0, 10.0);
    let score = report.ranking.unwrap().rows[0].score.value().unwrap();
    assert!((score - (momentum + 2.0)).abs() < 1e-9);
}

#[tokio::test]
async fn test_provider_outage_marks_rows_and_finishes() {
    let provider = watchlist().failing("DOWN");
    let orchestrator = ScanOrchestrator::new(Arc::new(provider), settings());
    let session = unlocked_session(10).await;

    let request = ScanRequest::new(&["UPUP", "DOWN"], Timeframe::SixMonths, AnalysisMode::Volatility);
    let report = orchestrator.scan(&request, &session).await.unwrap();

    assert_eq!(report.ok_count(), 1);
    assert!(matches!(
        report.row("DOWN").unwrap().status,
        RowStatus::ProviderError(_)
    ));
    assert!(report.row("DOWN").unwrap().metrics.all_unavailable());
    assert!(report.ranking.is_none());
}

#[tokio::test]
async fn test_cache_avoids_refetch() {
    let provider = watchlist();
    let cached = CachedProvider::new(provider.clone(), 600);
    let orchestrator = ScanOrchestrator::new(Arc::new(cached), settings());
    let session = unlocked_session(0).await;

    let request = ScanRequest::new(&["UPUP", "DOWN", "NOPE"], Timeframe::OneYear, AnalysisMode::MovingAverages);
    orchestrator.scan(&request, &session).await.unwrap();
    orchestrator.scan(&request, &session).await.unwrap();

    assert_eq!(provider.calls("UPUP"), 1);
    assert_eq!(provider.calls("DOWN"), 1);
    // Empty results are not cached.
    assert_eq!(provider.calls("NOPE"), 2);
}

#[tokio::test]
async fn test_quota_enforced_across_scans() {
    let provider = watchlist();
    let orchestrator = ScanOrchestrator::new(Arc::new(provider.clone()), settings());
    let mut session = unlocked_session(2).await;
    let request = ScanRequest::new(&["UPUP"], Timeframe::OneYear, AnalysisMode::Momentum);

    for _ in 0..2 {
        assert_ok!(orchestrator.scan(&request, &session).await);
        session.record_use();
    }

    let err = assert_err!(orchestrator.scan(&request, &session).await);
    assert!(matches!(err, ScanError::QuotaExceeded { used: 2, limit: 2 }));
    assert_eq!(provider.total_calls(), 2);
}

#[tokio::test]
async fn test_locked_session_never_fetches() {
    let provider = watchlist();
    let orchestrator = ScanOrchestrator::new(Arc::new(provider.clone()), settings());
    let request = ScanRequest::new(&["UPUP"], Timeframe::OneYear, AnalysisMode::Momentum);

    let err = assert_err!(orchestrator.scan(&request, &SessionContext::new(5)).await);
    assert!(matches!(err, ScanError::Unauthorized(_)));
    assert_eq!(provider.total_calls(), 0);
}

#[tokio::test]
async fn test_export_round_trip_preserves_ranking() {
    let orchestrator = ScanOrchestrator::new(Arc::new(watchlist()), settings());
    let session = unlocked_session(10).await;

    let request = ScanRequest::new(&["DOWN", "NEAR", "UPUP", "NOPE"], Timeframe::OneYear, AnalysisMode::Momentum)
        .with_scoring(ScoringStrategy::Composite);
    let table = orchestrator.scan(&request, &session).await.unwrap().ranking.unwrap();

    let mut path = std::env::temp_dir();
    path.push(format!("stockscan_it_export_{}.csv", uuid::Uuid::new_v4()));
    assert_ok!(export::save(&table, &path, ','));

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("symbol,last_price,"));
    let parsed = assert_ok!(export::parse_delimited(&text, ','));
    assert_eq!(parsed.symbols(), table.symbols());
    assert_eq!(parsed.rows[0].score, table.rows[0].score);
    assert_eq!(parsed.rows.last().unwrap().symbol, "NOPE");

    std::fs::remove_file(&path).unwrap();
}

#[tokio::test]
async fn test_usage_survives_restart_but_unlock_does_not() {
    let mut path = std::env::temp_dir();
    path.push(format!("stockscan_it_session_{}.json", uuid::Uuid::new_v4()));
    let path = path.to_string_lossy().to_string();

    let mut session = unlocked_session(3).await;
    session.record_use();
    assert_ok!(storage::save_session(&session, Some(&path)));

    let mut restored = storage::load_or_new(Some(&path), 3).unwrap();
    assert!(!restored.authorized);
    assert_eq!(restored.uses_today, 1);
    assert_eq!(restored.remaining(), Some(2));

    let orchestrator = ScanOrchestrator::new(Arc::new(watchlist()), settings());
    let request = ScanRequest::new(&["UPUP"], Timeframe::OneYear, AnalysisMode::Momentum);
    let err = assert_err!(orchestrator.scan(&request, &restored).await);
    assert!(matches!(err, ScanError::Unauthorized(_)));

    let verifier = GumroadVerifier::new(GumroadSettings::default()).unwrap();
    assert_ok!(license::unlock(&mut restored, &verifier, &SecretString::new("ANY-KEY".into())).await);
    assert_ok!(orchestrator.scan(&request, &restored).await);

    storage::delete_session(Some(&path)).unwrap();
}
