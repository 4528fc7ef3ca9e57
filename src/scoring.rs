//! Scoring strategies and ranking.
//!
//! Reduces a `MetricResult` to one number per instrument and orders a batch
//! of instruments by it. Strategies are selected by name so callers and
//! config can switch between them without code changes.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tracing::debug;

use crate::metrics::change_key;
use crate::types::{MetricResult, MetricValue, RankedRow, RankedTable};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Added to the volatility denominator of trend strength.
pub const TREND_EPSILON: f64 = 1e-6;

/// Breakout bonus when price is near the 52-week high.
pub const BREAKOUT_BONUS: f64 = 2.0;

/// "Near the high" threshold, percent below the 52-week high.
pub const BREAKOUT_PROXIMITY_PCT: f64 = 10.0;

/// Breakout momentum contribution is clamped to ±this.
pub const BREAKOUT_MOMENTUM_CAP: f64 = 10.0;

/// Lookbacks read as momentum, most preferred first.
pub const DEFAULT_MOMENTUM_LOOKBACKS: [&str; 2] = ["1m", "1w"];

pub fn default_momentum_lookbacks() -> Vec<String> {
    DEFAULT_MOMENTUM_LOOKBACKS.iter().map(|s| s.to_string()).collect()
}

/// Weights for the composite momentum/volatility/trend score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeWeights {
    pub momentum: f64,
    pub volatility: f64,
    pub trend: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            momentum: 0.6,
            volatility: 0.2,
            trend: 0.2,
        }
    }
}

/// Named scoring strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScoringStrategy {
    /// Weighted momentum, inverse volatility and trend strength.
    #[default]
    Composite,
    /// Clamped momentum plus a bonus near the 52-week high.
    Breakout,
}

impl fmt::Display for ScoringStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringStrategy::Composite => write!(f, "composite"),
            ScoringStrategy::Breakout => write!(f, "breakout"),
        }
    }
}

impl std::str::FromStr for ScoringStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "composite" | "momentum" => Ok(ScoringStrategy::Composite),
            "breakout" | "breakout_proximity" => Ok(ScoringStrategy::Breakout),
            _ => Err(anyhow::anyhow!("Unknown scoring strategy: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Momentum in percent: the change over the first of `lookbacks` that has
/// a value.
pub fn momentum_pct<S: AsRef<str>>(metrics: &MetricResult, lookbacks: &[S]) -> Option<f64> {
    lookbacks
        .iter()
        .find_map(|name| metrics.value(&change_key(name.as_ref())))
}

/// Annualised volatility in percent.
pub fn volatility_pct(metrics: &MetricResult) -> Option<f64> {
    metrics.value("annualized_volatility").map(|v| v * 100.0)
}

// ---------------------------------------------------------------------------
// Formulas
// ---------------------------------------------------------------------------

/// Momentum divided by volatility.
pub fn trend_strength(momentum_pct: f64, volatility_pct: f64) -> f64 {
    momentum_pct / (volatility_pct + TREND_EPSILON)
}

pub fn composite_score(momentum_pct: f64, volatility_pct: f64, w: &CompositeWeights) -> f64 {
    w.momentum * momentum_pct
        + w.volatility * (100.0 - volatility_pct)
        + w.trend * trend_strength(momentum_pct, volatility_pct)
}

pub fn breakout_score(momentum_pct: f64, price: Option<f64>, year_high: Option<f64>) -> f64 {
    let momentum = momentum_pct.clamp(-BREAKOUT_MOMENTUM_CAP, BREAKOUT_MOMENTUM_CAP);
    let bonus = match (price, year_high) {
        (Some(price), Some(high)) if high > 0.0 => {
            let below_high_pct = (high - price) / high * 100.0;
            if below_high_pct < BREAKOUT_PROXIMITY_PCT {
                BREAKOUT_BONUS
            } else {
                0.0
            }
        }
        _ => 0.0,
    };
    momentum + bonus
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Scores single instruments and ranks batches.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    strategy: ScoringStrategy,
    weights: CompositeWeights,
    momentum_lookbacks: Vec<String>,
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(ScoringStrategy::default(), CompositeWeights::default())
    }
}

impl ScoringEngine {
    pub fn new(strategy: ScoringStrategy, weights: CompositeWeights) -> Self {
        Self {
            strategy,
            weights,
            momentum_lookbacks: default_momentum_lookbacks(),
        }
    }

    /// Read momentum from these lookback names, in preference order.
    pub fn with_momentum_lookbacks<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.momentum_lookbacks = names.iter().map(|n| n.as_ref().to_string()).collect();
        self
    }

    pub fn strategy(&self) -> ScoringStrategy {
        self.strategy
    }

    pub fn weights(&self) -> &CompositeWeights {
        &self.weights
    }

    /// Score one instrument. Unavailable when a required input is missing.
    pub fn score(&self, metrics: &MetricResult) -> MetricValue {
        let Some(momentum) = momentum_pct(metrics, &self.momentum_lookbacks) else {
            return MetricValue::Unavailable;
        };

        let raw = match self.strategy {
            ScoringStrategy::Composite => match volatility_pct(metrics) {
                Some(vol) => composite_score(momentum, vol, &self.weights),
                None => return MetricValue::Unavailable,
            },
            ScoringStrategy::Breakout => breakout_score(
                momentum,
                metrics.value("last_price"),
                metrics.value("52w_high"),
            ),
        };

        MetricValue::from_f64(raw)
    }

    /// Score every instrument and order the result.
    ///
    /// No instrument is dropped: one with nothing computable ranks last
    /// with an unavailable score.
    pub fn rank<I>(&self, instruments: I) -> RankedTable
    where
        I: IntoIterator<Item = (String, MetricResult)>,
    {
        let mut columns: Vec<String> = Vec::new();
        let mut rows: Vec<RankedRow> = Vec::new();

        for (symbol, fields) in instruments {
            for key in fields.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.to_string());
                }
            }
            let score = self.score(&fields);
            debug!(symbol = %symbol, strategy = %self.strategy, score = %score, "Scored");
            rows.push(RankedRow {
                symbol,
                fields,
                score,
            });
        }

        sort_rows(&mut rows);
        RankedTable { columns, rows }
    }
}

/// Score descending, then symbol ascending.
pub fn sort_rows(rows: &mut [RankedRow]) {
    rows.sort_by(rank_order);
}

/// Comparator behind `sort_rows`.
pub fn rank_order(a: &RankedRow, b: &RankedRow) -> Ordering {
    b.sort_score()
        .total_cmp(&a.sort_score())
        .then_with(|| a.symbol.cmp(&b.symbol))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
