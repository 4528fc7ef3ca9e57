//! Yahoo Finance chart API client.
//!
//! API: `https://query1.finance.yahoo.com/v8/finance/chart/{symbol}?range=1y&interval=1d`
//! Auth: none. The endpoint rejects requests without a browser-like
//! user agent, and throttles aggressive clients, so the scanner spaces
//! requests out.
//!
//! Quote arrays are parallel to `timestamp` and may contain `null` for
//! bars without a trade; bars missing a close or a volume are skipped.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{FetchedSeries, PriceDataProvider};
use crate::types::{Bar, PriceSeries, SeriesMeta, Timeframe};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const PROVIDER_NAME: &str = "yahoo";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; stockscan/0.1)";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    #[serde(default)]
    indicators: ChartIndicators,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    currency: Option<String>,
    regular_market_price: Option<f64>,
    fifty_two_week_high: Option<f64>,
    fifty_two_week_low: Option<f64>,
    market_cap: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct YahooChartClient {
    http: Client,
    base_url: String,
}

impl YahooChartClient {
    pub fn new(base_url: Option<&str>, timeout_secs: u64, user_agent: Option<&str>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .build()
            .context("Failed to build HTTP client for Yahoo Finance")?;

        Ok(Self {
            http,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    fn chart_url(&self, symbol: &str, timeframe: Timeframe) -> String {
        format!(
            "{}/v8/finance/chart/{}?range={}&interval={}&includePrePost=false",
            self.base_url,
            urlencoding::encode(symbol),
            timeframe.period(),
            timeframe.interval(),
        )
    }

    /// Convert a chart payload into a series. Missing result → empty series.
    fn to_fetched(symbol: &str, body: ChartBody) -> FetchedSeries {
        if let Some(err) = &body.error {
            debug!(symbol, code = %err.code, description = %err.description, "Chart API returned error");
        }

        let Some(result) = body.result.and_then(|r| r.into_iter().next()) else {
            return FetchedSeries::empty(symbol);
        };

        let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
        let at = |v: &Vec<Option<f64>>, i: usize| v.get(i).copied().flatten();

        let bars: Vec<Bar> = result
            .timestamp
            .iter()
            .enumerate()
            .filter_map(|(i, &ts)| {
                let close = at(&quote.close, i)?;
                let volume = at(&quote.volume, i)?;
                let timestamp = Utc.timestamp_opt(ts, 0).single()?;
                Some(Bar {
                    timestamp,
                    open: at(&quote.open, i),
                    high: at(&quote.high, i),
                    low: at(&quote.low, i),
                    close,
                    volume,
                })
            })
            .collect();

        let meta = SeriesMeta {
            last_price: result.meta.regular_market_price,
            market_cap: result.meta.market_cap,
            year_high: result.meta.fifty_two_week_high,
            year_low: result.meta.fifty_two_week_low,
            currency: result.meta.currency,
        };

        FetchedSeries {
            series: PriceSeries::new(symbol, bars),
            meta,
        }
    }
}

#[async_trait]
impl PriceDataProvider for YahooChartClient {
    async fn fetch(&self, symbol: &str, timeframe: Timeframe) -> Result<FetchedSeries> {
        let url = self.chart_url(symbol, timeframe);
        debug!(url = %url, "Fetching Yahoo chart");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Yahoo chart request failed for {symbol}"))?;

        // Unknown or delisted symbols come back as 404.
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(symbol, "Symbol not found");
            return Ok(FetchedSeries::empty(symbol));
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Yahoo chart API error {status}: {body}");
        }

        let envelope: ChartEnvelope = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse Yahoo chart response for {symbol}"))?;

        let fetched = Self::to_fetched(symbol, envelope.chart);
        debug!(symbol, bars = fetched.series.len(), "Fetched chart");
        Ok(fetched)
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
