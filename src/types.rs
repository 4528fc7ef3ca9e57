//! Shared types for the scanner.
//!
//! These types form the data model used across all modules. Metrics,
//! scoring and the scan orchestrator depend only on this module so that
//! providers and the HTTP layer can be swapped without touching the core.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// Bars & series
// ---------------------------------------------------------------------------

/// One OHLCV observation. Only `close` and `volume` are used by the
/// metrics; open/high/low are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Bar with only the required fields set.
    pub fn new(timestamp: DateTime<Utc>, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open: None,
            high: None,
            low: None,
            close,
            volume,
        }
    }
}

/// Ordered, immutable bar history for one instrument.
///
/// Bars are strictly increasing by timestamp. An empty series is a valid
/// state and means "no data".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSeries {
    symbol: String,
    bars: Vec<Bar>,
}

impl PriceSeries {
    /// Build a series, enforcing the ordering invariant.
    ///
    /// Bars are sorted by timestamp; when two bars share a timestamp the one
    /// appearing later in `bars` wins. Bars with a non-finite close are
    /// dropped.
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> Self {
        let mut bars: Vec<Bar> = bars.into_iter().filter(|b| b.close.is_finite()).collect();
        // Stable sort keeps input order within equal timestamps, so keeping
        // the last of each run keeps the later bar.
        bars.sort_by_key(|b| b.timestamp);
        let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(last) if last.timestamp == bar.timestamp => *last = bar,
                _ => deduped.push(bar),
            }
        }

        Self {
            symbol: symbol.into().trim().to_uppercase(),
            bars: deduped,
        }
    }

    /// A series with no bars.
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self::new(symbol, Vec::new())
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Closing prices in bar order.
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }

    /// Helper to build a daily series from closes (volume fixed at 1000).
    #[cfg(test)]
    pub fn from_closes(symbol: &str, closes: &[f64]) -> Self {
        use chrono::TimeZone;
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 21, 0, 0).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(start + chrono::Duration::days(i as i64), c, 1000.0))
            .collect();
        Self::new(symbol, bars)
    }
}

/// Externally supplied fundamentals, exposed verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesMeta {
    pub last_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub year_high: Option<f64>,
    pub year_low: Option<f64>,
    pub currency: Option<String>,
}

// ---------------------------------------------------------------------------
// Metric values
// ---------------------------------------------------------------------------

/// A computed number, or an explicit marker that it could not be computed.
///
/// `Unavailable` is never the same thing as `Value(0.0)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Value(f64),
    Unavailable,
}

impl MetricValue {
    /// Wrap a float, mapping NaN/infinity to `Unavailable`.
    pub fn from_f64(v: f64) -> Self {
        if v.is_finite() {
            MetricValue::Value(v)
        } else {
            MetricValue::Unavailable
        }
    }

    pub fn from_option(v: Option<f64>) -> Self {
        v.map(Self::from_f64).unwrap_or(MetricValue::Unavailable)
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            MetricValue::Value(v) => Some(*v),
            MetricValue::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, MetricValue::Value(_))
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Value(v) => write!(f, "{v:.2}"),
            MetricValue::Unavailable => write!(f, "n/a"),
        }
    }
}

/// Insertion-ordered mapping from metric name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricResult {
    entries: Vec<(String, MetricValue)>,
}

impl MetricResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Replacing keeps the key's original position.
    pub fn insert(&mut self, name: impl Into<String>, value: MetricValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => *v = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| *v)
    }

    /// Numeric value of `name`, if present and available.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|v| v.value())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, MetricValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when there is no available value at all (including no keys).
    pub fn all_unavailable(&self) -> bool {
        self.entries.iter().all(|(_, v)| !v.is_available())
    }

    /// Append every entry of `other` whose key is not already present.
    pub fn merge_missing(&mut self, other: &MetricResult) {
        for (k, v) in other.iter() {
            if !self.contains(k) {
                self.entries.push((k.to_string(), v));
            }
        }
    }

    /// Same keys, every value replaced with `Unavailable`.
    pub fn to_unavailable(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|(k, _)| (k.clone(), MetricValue::Unavailable))
                .collect(),
        }
    }
}

impl Serialize for MetricResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl FromIterator<(String, MetricValue)> for MetricResult {
    fn from_iter<I: IntoIterator<Item = (String, MetricValue)>>(iter: I) -> Self {
        let mut result = MetricResult::new();
        for (k, v) in iter {
            result.insert(k, v);
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Ranked output
// ---------------------------------------------------------------------------

/// One instrument in a ranked table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRow {
    pub symbol: String,
    pub fields: MetricResult,
    pub score: MetricValue,
}

impl RankedRow {
    /// Score used for ordering. Unavailable sorts last.
    pub fn sort_score(&self) -> f64 {
        self.score.value().unwrap_or(f64::MIN)
    }
}

/// Rows ordered by score descending, ties broken by symbol ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankedTable {
    /// Union of row field names, first-seen order.
    pub columns: Vec<String>,
    pub rows: Vec<RankedRow>,
}

impl RankedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn symbols(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.symbol.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// History window and bar interval requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Timeframe {
    #[serde(rename = "5d")]
    FiveDays,
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[default]
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
}

impl Timeframe {
    pub const ALL: &'static [Timeframe] = &[
        Timeframe::FiveDays,
        Timeframe::OneMonth,
        Timeframe::ThreeMonths,
        Timeframe::SixMonths,
        Timeframe::OneYear,
        Timeframe::TwoYears,
        Timeframe::FiveYears,
    ];

    /// Provider `range` token.
    pub fn period(&self) -> &'static str {
        match self {
            Timeframe::FiveDays => "5d",
            Timeframe::OneMonth => "1mo",
            Timeframe::ThreeMonths => "3mo",
            Timeframe::SixMonths => "6mo",
            Timeframe::OneYear => "1y",
            Timeframe::TwoYears => "2y",
            Timeframe::FiveYears => "5y",
        }
    }

    /// Provider `interval` token.
    pub fn interval(&self) -> &'static str {
        match self {
            Timeframe::FiveDays => "60m",
            Timeframe::FiveYears => "1wk",
            _ => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.period(), self.interval())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_lowercase();
        Timeframe::ALL
            .iter()
            .copied()
            .find(|t| t.period() == token)
            .ok_or_else(|| anyhow::anyhow!("Unknown timeframe: {s}"))
    }
}

/// Which metric family a scan computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    #[default]
    Momentum,
    MovingAverages,
    Volatility,
    Fundamentals,
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisMode::Momentum => write!(f, "momentum"),
            AnalysisMode::MovingAverages => write!(f, "moving_averages"),
            AnalysisMode::Volatility => write!(f, "volatility"),
            AnalysisMode::Fundamentals => write!(f, "fundamentals"),
        }
    }
}

/// Case-insensitive parse with a few short aliases.
impl std::str::FromStr for AnalysisMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "momentum" | "mom" => Ok(AnalysisMode::Momentum),
            "moving_averages" | "ma" | "sma" => Ok(AnalysisMode::MovingAverages),
            "volatility" | "vol" => Ok(AnalysisMode::Volatility),
            "fundamentals" | "fund" => Ok(AnalysisMode::Fundamentals),
            _ => Err(anyhow::anyhow!("Unknown analysis mode: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failures the caller has to branch on. Per-symbol data problems are not
/// errors; they surface as row statuses.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Daily usage limit reached ({used}/{limit})")]
    QuotaExceeded { used: u32, limit: u32 },

    #[error("Export error: {0}")]
    Export(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
