//! Price-data providers.
//!
//! Defines the `PriceDataProvider` trait the scanner fetches through, a
//! Yahoo Finance chart client, and a TTL cache that can wrap any provider.

pub mod cache;
pub mod yahoo;

use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::types::{PriceSeries, SeriesMeta, Timeframe};

/// A downloaded series plus whatever fundamentals came with it.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedSeries {
    pub series: PriceSeries,
    pub meta: SeriesMeta,
}

impl FetchedSeries {
    /// Unknown symbol / nothing returned.
    pub fn empty(symbol: &str) -> Self {
        Self {
            series: PriceSeries::empty(symbol),
            meta: SeriesMeta::default(),
        }
    }
}

/// Abstraction over external market-data sources.
///
/// Unknown symbols should come back as an empty series. `Err` is reserved
/// for transport or parse failures; the scanner catches it per symbol.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PriceDataProvider: Send + Sync {
    /// Fetch bars for one symbol over the given timeframe.
    async fn fetch(&self, symbol: &str, timeframe: Timeframe) -> Result<FetchedSeries>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}
