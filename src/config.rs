//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section has defaults, so a missing key (or an empty file) falls back to
//! sensible values. Secrets (license product, access token) are referenced
//! by env-var name in the config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::scanner::ScannerSettings;
use crate::license::gumroad::{GumroadPayload, GumroadSettings, DEFAULT_ENDPOINT};
use crate::metrics::MetricsConfig;
use crate::scoring::{default_momentum_lookbacks, CompositeWeights, ScoringStrategy};
use crate::types::{AnalysisMode, ScanError, Timeframe};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub scanner: ScannerConfig,
    pub metrics: MetricsConfig,
    pub scoring: ScoringConfig,
    pub provider: ProviderConfig,
    pub license: LicenseConfig,
    pub quota: QuotaConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    pub default_timeframe: Timeframe,
    pub default_mode: AnalysisMode,
    pub max_concurrency: usize,
    pub request_delay_ms: u64,
    pub scan_timeout_secs: u64,
    /// 0 disables the series cache.
    pub cache_ttl_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            default_timeframe: Timeframe::OneYear,
            default_mode: AnalysisMode::Momentum,
            max_concurrency: 4,
            request_delay_ms: 250,
            scan_timeout_secs: 60,
            cache_ttl_secs: 900,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScoringConfig {
    pub strategy: ScoringStrategy,
    pub weights: CompositeWeights,
    /// Names from `[metrics] lookbacks` read as momentum, first available wins.
    pub momentum_lookbacks: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            strategy: ScoringStrategy::default(),
            weights: CompositeWeights::default(),
            momentum_lookbacks: default_momentum_lookbacks(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: crate::data::yahoo::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 15,
            user_agent: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LicenseConfig {
    pub payload: GumroadPayload,
    /// Env var holding the product permalink or id.
    pub product_env: String,
    /// Env var holding the optional seller access token.
    pub access_token_env: Option<String>,
    pub increment_uses_count: bool,
    pub allow_dev_mode: bool,
    pub endpoint: String,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            payload: GumroadPayload::ProductPermalink,
            product_env: "GUMROAD_PRODUCT_PERMALINK".to_string(),
            access_token_env: Some("GUMROAD_ACCESS_TOKEN".to_string()),
            increment_uses_count: true,
            allow_dev_mode: true,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QuotaConfig {
    /// 0 means unlimited.
    pub max_uses_per_day: u32,
    pub state_file: String,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_uses_per_day: 50,
            state_file: crate::storage::DEFAULT_SESSION_FILE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub port: u16,
    /// Per-token usage counters of the API server.
    pub session_file: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            session_file: crate::storage::DEFAULT_API_SESSIONS_FILE.to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Reject settings the scanner cannot run with.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.scanner.max_concurrency == 0 {
            return Err(ScanError::Config("scanner.max_concurrency must be at least 1".into()));
        }
        if self.scanner.scan_timeout_secs == 0 {
            return Err(ScanError::Config("scanner.scan_timeout_secs must be at least 1".into()));
        }
        if self.provider.base_url.trim().is_empty() {
            return Err(ScanError::Config("provider.base_url is empty".into()));
        }
        let w = &self.scoring.weights;
        if [w.momentum, w.volatility, w.trend]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(ScanError::Config(
                "scoring.weights must be finite and non-negative".into(),
            ));
        }
        if self.metrics.lookbacks.iter().any(|l| l.bars == 0) {
            return Err(ScanError::Config("metrics.lookbacks bars must be at least 1".into()));
        }
        if self.scoring.momentum_lookbacks.is_empty() {
            return Err(ScanError::Config("scoring.momentum_lookbacks is empty".into()));
        }
        if let Some(name) = self
            .scoring
            .momentum_lookbacks
            .iter()
            .find(|name| !self.metrics.lookbacks.iter().any(|l| &l.name == *name))
        {
            return Err(ScanError::Config(format!(
                "scoring.momentum_lookbacks names '{name}', which is not in metrics.lookbacks"
            )));
        }
        Ok(())
    }

    pub fn scanner_settings(&self) -> ScannerSettings {
        ScannerSettings {
            max_concurrency: self.scanner.max_concurrency,
            request_delay: Duration::from_millis(self.scanner.request_delay_ms),
            scan_timeout: Duration::from_secs(self.scanner.scan_timeout_secs),
            metrics: self.metrics.clone(),
            weights: self.scoring.weights,
            momentum_lookbacks: self.scoring.momentum_lookbacks.clone(),
        }
    }

    /// Gumroad settings with secrets pulled from the environment.
    /// Unset env vars leave the corresponding field empty.
    pub fn gumroad_settings(&self) -> GumroadSettings {
        let product = Self::resolve_env(&self.license.product_env)
            .ok()
            .filter(|p| !p.trim().is_empty());
        let access_token = self
            .license
            .access_token_env
            .as_deref()
            .and_then(|env| Self::resolve_env(env).ok())
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::new);

        GumroadSettings {
            payload: self.license.payload,
            product,
            access_token,
            increment_uses_count: self.license.increment_uses_count,
            allow_dev_mode: self.license.allow_dev_mode,
            endpoint: self.license.endpoint.clone(),
        }
    }
}
