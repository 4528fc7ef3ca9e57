//! TTL cache in front of a price-data provider.
//!
//! Repeated scans over the same watchlist within the TTL reuse the earlier
//! download instead of hitting the provider again. Only successful,
//! non-empty fetches are cached so an outage or unknown symbol is retried
//! next time.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::{FetchedSeries, PriceDataProvider};
use crate::types::Timeframe;

struct CacheEntry {
    fetched: FetchedSeries,
    inserted_at: DateTime<Utc>,
}

/// Wraps a provider with a per-(symbol, timeframe) TTL cache.
pub struct CachedProvider<P> {
    inner: P,
    ttl: Duration,
    entries: RwLock<HashMap<(String, Timeframe), CacheEntry>>,
}

impl<P: PriceDataProvider> CachedProvider<P> {
    pub fn new(inner: P, ttl_secs: u64) -> Self {
        Self {
            inner,
            ttl: Duration::seconds(ttl_secs as i64),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| now - e.inserted_at < self.ttl)
            .count()
    }

    /// Remove expired entries.
    pub async fn evict_expired(&self) {
        let now = Utc::now();
        let ttl = self.ttl;
        self.entries
            .write()
            .await
            .retain(|_, entry| now - entry.inserted_at < ttl);
    }
}

#[async_trait]
impl<P: PriceDataProvider> PriceDataProvider for CachedProvider<P> {
    async fn fetch(&self, symbol: &str, timeframe: Timeframe) -> Result<FetchedSeries> {
        let key = (symbol.to_string(), timeframe);

        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&key) {
                if Utc::now() - entry.inserted_at < self.ttl {
                    debug!(symbol, timeframe = %timeframe, "Series cache hit");
                    return Ok(entry.fetched.clone());
                }
            }
        }

        let fetched = self.inner.fetch(symbol, timeframe).await?;
        if !fetched.series.is_empty() {
            self.entries.write().await.insert(
                key,
                CacheEntry {
                    fetched: fetched.clone(),
                    inserted_at: Utc::now(),
                },
            );
        }
        Ok(fetched)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
