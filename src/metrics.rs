//! Metric calculations over a price series.
//!
//! Every function here is pure and total: missing or insufficient data is
//! reported as `MetricValue::Unavailable`, never as an error, so a batch
//! scan can carry on across symbols with no history.

use serde::{Deserialize, Serialize};

use crate::types::{AnalysisMode, MetricResult, MetricValue, PriceSeries, SeriesMeta};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Trading days used to annualise daily volatility.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// A named momentum lookback, measured in bars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lookback {
    pub name: String,
    pub bars: usize,
}

impl Lookback {
    pub fn new(name: &str, bars: usize) -> Self {
        Self {
            name: name.to_string(),
            bars,
        }
    }

    /// Output key, e.g. `1w_change_pct`.
    pub fn key(&self) -> String {
        change_key(&self.name)
    }
}

/// Output key of the lookback called `name`.
pub fn change_key(name: &str) -> String {
    format!("{name}_change_pct")
}

/// Lookbacks and windows used by the metric functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub lookbacks: Vec<Lookback>,
    pub sma_windows: Vec<usize>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            lookbacks: vec![Lookback::new("1w", 5), Lookback::new("1m", 21)],
            sma_windows: vec![5, 20, 50, 100, 200],
        }
    }
}

// ---------------------------------------------------------------------------
// Momentum
// ---------------------------------------------------------------------------

/// Last price plus percentage change over each lookback.
///
/// For a lookback of `n` bars the reference is the close `n` bars before
/// the last one, so at least `n + 1` bars are needed.
pub fn momentum(series: &PriceSeries, lookbacks: &[Lookback]) -> MetricResult {
    let closes = series.closes();
    let mut out = MetricResult::new();

    out.insert("last_price", MetricValue::from_option(series.last_close()));

    for lb in lookbacks {
        let value = match closes.last() {
            Some(&last) if closes.len() > lb.bars => {
                let reference = closes[closes.len() - 1 - lb.bars];
                if reference == 0.0 {
                    MetricValue::Unavailable
                } else {
                    MetricValue::from_f64((last - reference) / reference * 100.0)
                }
            }
            _ => MetricValue::Unavailable,
        };
        out.insert(lb.key(), value);
    }

    out
}

// ---------------------------------------------------------------------------
// Moving averages
// ---------------------------------------------------------------------------

/// Simple moving average of the last `w` closes for each window.
///
/// Windows longer than the series are omitted, not marked unavailable.
pub fn moving_averages(series: &PriceSeries, windows: &[usize]) -> MetricResult {
    let closes = series.closes();
    let mut out = MetricResult::new();

    for &w in windows {
        if w == 0 || closes.len() < w {
            continue;
        }
        let tail = &closes[closes.len() - w..];
        let mean = tail.iter().sum::<f64>() / w as f64;
        out.insert(format!("SMA_{w}"), MetricValue::from_f64(mean));
    }

    out
}

// ---------------------------------------------------------------------------
// Volatility
// ---------------------------------------------------------------------------

/// Day-over-day simple returns. Returns off a zero close are skipped.
pub fn simple_returns(series: &PriceSeries) -> Vec<f64> {
    series
        .bars()
        .windows(2)
        .filter(|w| w[0].close != 0.0)
        .map(|w| w[1].close / w[0].close - 1.0)
        .filter(|r| r.is_finite())
        .collect()
}

/// Sample standard deviation (n - 1). `None` below two observations.
fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt())
}

/// Daily and annualised volatility of simple returns, as fractions.
pub fn volatility(series: &PriceSeries) -> MetricResult {
    let returns = simple_returns(series);
    let daily = sample_std_dev(&returns);

    let mut out = MetricResult::new();
    out.insert("daily_volatility", MetricValue::from_option(daily));
    out.insert(
        "annualized_volatility",
        MetricValue::from_option(daily.map(|d| d * TRADING_DAYS_PER_YEAR.sqrt())),
    );
    out
}

// ---------------------------------------------------------------------------
// Fundamentals
// ---------------------------------------------------------------------------

/// Provider-supplied fundamentals, unchanged apart from unavailable handling.
pub fn fundamentals_snapshot(meta: &SeriesMeta) -> MetricResult {
    let mut out = MetricResult::new();
    out.insert("last_price", MetricValue::from_option(meta.last_price));
    out.insert("market_cap", MetricValue::from_option(meta.market_cap));
    out.insert("52w_high", MetricValue::from_option(meta.year_high));
    out.insert("52w_low", MetricValue::from_option(meta.year_low));
    out
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Metrics for one analysis mode.
pub fn compute(
    mode: AnalysisMode,
    series: &PriceSeries,
    meta: &SeriesMeta,
    config: &MetricsConfig,
) -> MetricResult {
    match mode {
        AnalysisMode::Momentum => momentum(series, &config.lookbacks),
        AnalysisMode::MovingAverages => moving_averages(series, &config.sma_windows),
        AnalysisMode::Volatility => volatility(series),
        AnalysisMode::Fundamentals => fundamentals_snapshot(meta),
    }
}

/// Everything the scoring strategies read: momentum, volatility and the
/// 52-week range.
pub fn scoring_inputs(
    series: &PriceSeries,
    meta: &SeriesMeta,
    config: &MetricsConfig,
) -> MetricResult {
    let mut out = momentum(series, &config.lookbacks);
    out.merge_missing(&volatility(series));
    out.merge_missing(&fundamentals_snapshot(meta));
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
