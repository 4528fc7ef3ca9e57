//! Gumroad license verification.
//!
//! API: `POST https://api.gumroad.com/v2/licenses/verify` (form-encoded)
//! Params: `product_permalink` or `product_id`, `license_key`,
//! `increment_uses_count`, optionally `access_token`.
//!
//! Which product identifier the account uses differs between products, so
//! the payload shape is chosen in config rather than fixed here. Unknown
//! keys come back as HTTP 404 with a JSON body, so the body is parsed
//! regardless of status.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{LicenseVerdict, LicenseVerifier};
use crate::types::ScanError;

pub const DEFAULT_ENDPOINT: &str = "https://api.gumroad.com/v2/licenses/verify";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Product identifier field sent with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GumroadPayload {
    #[default]
    ProductPermalink,
    ProductId,
}

impl GumroadPayload {
    pub fn field(&self) -> &'static str {
        match self {
            GumroadPayload::ProductPermalink => "product_permalink",
            GumroadPayload::ProductId => "product_id",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GumroadSettings {
    pub payload: GumroadPayload,
    /// Permalink or product id. `None` means no product is configured.
    pub product: Option<String>,
    pub access_token: Option<SecretString>,
    pub increment_uses_count: bool,
    /// Let every key through when no product is configured.
    pub allow_dev_mode: bool,
    pub endpoint: String,
}

impl Default for GumroadSettings {
    fn default() -> Self {
        Self {
            payload: GumroadPayload::default(),
            product: None,
            access_token: None,
            increment_uses_count: true,
            allow_dev_mode: true,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    purchase: Option<Purchase>,
}

#[derive(Debug, Default, Deserialize)]
struct Purchase {
    #[serde(default)]
    refunded: bool,
    #[serde(default)]
    chargebacked: bool,
    #[serde(default)]
    disputed: bool,
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

pub struct GumroadVerifier {
    http: Client,
    settings: GumroadSettings,
}

impl GumroadVerifier {
    /// Build a verifier. Without a product and with dev mode disabled this
    /// is a configuration error.
    pub fn new(settings: GumroadSettings) -> Result<Self, ScanError> {
        let has_product = settings
            .product
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty());
        if !has_product && !settings.allow_dev_mode {
            return Err(ScanError::Config(format!(
                "Gumroad {} is not configured and dev mode is disabled",
                settings.payload.field()
            )));
        }

        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ScanError::Config(format!("Failed to build Gumroad HTTP client: {e}")))?;

        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &GumroadSettings {
        &self.settings
    }

    fn product(&self) -> Option<&str> {
        self.settings
            .product
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    /// Form fields for one request.
    fn form_params(&self, product: &str, license_key: &SecretString) -> Vec<(&'static str, String)> {
        let mut params = vec![
            (self.settings.payload.field(), product.to_string()),
            ("license_key", license_key.expose_secret().trim().to_string()),
            (
                "increment_uses_count",
                self.settings.increment_uses_count.to_string(),
            ),
        ];
        if let Some(token) = &self.settings.access_token {
            params.push(("access_token", token.expose_secret().clone()));
        }
        params
    }

    fn interpret(resp: VerifyResponse) -> LicenseVerdict {
        if !resp.success {
            let detail = resp.message.unwrap_or_default();
            debug!(message = %detail, "Gumroad rejected key");
            return LicenseVerdict::denied(
                "License not valid for this product. Check you bought the right one.",
            );
        }

        let purchase = resp.purchase.unwrap_or_default();
        if purchase.refunded || purchase.chargebacked || purchase.disputed {
            return LicenseVerdict::denied("This license was refunded or chargebacked.");
        }

        LicenseVerdict::granted("License verified.")
    }
}

#[async_trait]
impl LicenseVerifier for GumroadVerifier {
    async fn verify(&self, license_key: &SecretString) -> Result<LicenseVerdict> {
        let Some(product) = self.product() else {
            return Ok(LicenseVerdict::dev());
        };

        let resp = self
            .http
            .post(&self.settings.endpoint)
            .form(&self.form_params(product, license_key))
            .send()
            .await
            .context("Gumroad verify request failed")?;

        let status = resp.status();
        let body: VerifyResponse = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse Gumroad verify response ({status})"))?;

        Ok(Self::interpret(body))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
