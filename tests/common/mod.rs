//! Deterministic in-memory price provider for integration testing.
//!
//! Serves fixed close series per symbol, counts calls, and can be told to
//! fail. No network.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stockscan::data::{FetchedSeries, PriceDataProvider};
use stockscan::types::{Bar, PriceSeries, SeriesMeta, Timeframe};

/// Daily bars starting 2025-01-02, volume fixed.
pub fn daily_series(symbol: &str, closes: &[f64]) -> PriceSeries {
    let start = Utc.with_ymd_and_hms(2025, 1, 2, 21, 0, 0).unwrap();
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar::new(start + Duration::days(i as i64), c, 1_000_000.0))
        .collect();
    PriceSeries::new(symbol, bars)
}

/// A line with slope `step` plus a small alternating wiggle.
pub fn trending(len: usize, start: f64, step: f64) -> Vec<f64> {
    (0..len)
        .map(|i| start + step * i as f64 + if i % 2 == 0 { 0.5 } else { -0.5 })
        .collect()
}

#[derive(Clone, Default)]
pub struct MockDataProvider {
    series: HashMap<String, (Vec<f64>, SeriesMeta)>,
    failing: Vec<String>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, symbol: &str, closes: Vec<f64>) -> Self {
        self.series
            .insert(symbol.to_string(), (closes, SeriesMeta::default()));
        self
    }

    pub fn with_meta(mut self, symbol: &str, closes: Vec<f64>, meta: SeriesMeta) -> Self {
        self.series.insert(symbol.to_string(), (closes, meta));
        self
    }

    /// Every fetch of `symbol` fails with a transport-style error.
    pub fn failing(mut self, symbol: &str) -> Self {
        self.failing.push(symbol.to_string());
        self
    }

    pub fn calls(&self, symbol: &str) -> usize {
        self.calls.lock().unwrap().get(symbol).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl PriceDataProvider for MockDataProvider {
    async fn fetch(&self, symbol: &str, _timeframe: Timeframe) -> Result<FetchedSeries> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(symbol.to_string())
            .or_insert(0) += 1;

        if self.failing.iter().any(|s| s == symbol) {
            return Err(anyhow!("connection refused"));
        }

        Ok(match self.series.get(symbol) {
            Some((closes, meta)) => FetchedSeries {
                series: daily_series(symbol, closes),
                meta: meta.clone(),
            },
            None => FetchedSeries::empty(symbol),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
