//! License verification and session gating.
//!
//! Every license backend answers the same question: "is this opaque key
//! valid, and if not, why?". `LicenseVerifier` is that narrow interface;
//! `gumroad` implements it with a configurable request payload. The scan
//! core never calls into this module: callers unlock a `SessionContext`
//! here and pass it to the scanner.

pub mod gumroad;
pub mod session;

use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{info, warn};

use crate::types::ScanError;
pub use session::SessionContext;

/// Outcome of a license check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LicenseVerdict {
    pub valid: bool,
    /// Human-readable reason, shown to the user on failure.
    pub reason: String,
    /// True when no product is configured and checks are skipped.
    pub dev_mode: bool,
}

impl LicenseVerdict {
    pub fn granted(reason: impl Into<String>) -> Self {
        Self {
            valid: true,
            reason: reason.into(),
            dev_mode: false,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
            dev_mode: false,
        }
    }

    pub fn dev() -> Self {
        Self {
            valid: true,
            reason: "No product configured, running in dev mode".to_string(),
            dev_mode: true,
        }
    }
}

/// Abstraction over remote license services.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LicenseVerifier: Send + Sync {
    /// Check a key. `Err` means the service could not be reached or
    /// answered with something unparseable.
    async fn verify(&self, license_key: &SecretString) -> Result<LicenseVerdict>;
}

/// Verify `license_key` without touching any session.
///
/// Blank keys are rejected without contacting the service. Transport
/// failures and rejected keys both come back as `Unauthorized`.
pub async fn check(
    verifier: &dyn LicenseVerifier,
    license_key: &SecretString,
) -> Result<LicenseVerdict, ScanError> {
    if license_key.expose_secret().trim().is_empty() {
        return Err(ScanError::Unauthorized(
            "Please enter your license key.".to_string(),
        ));
    }

    let verdict = verifier.verify(license_key).await.map_err(|e| {
        warn!(error = %e, "License verification failed");
        ScanError::Unauthorized(format!("License verification failed: {e}"))
    })?;

    if !verdict.valid {
        warn!(reason = %verdict.reason, "License rejected");
        return Err(ScanError::Unauthorized(verdict.reason));
    }

    info!(dev_mode = verdict.dev_mode, "License verified");
    Ok(verdict)
}

/// `check` the key and authorise `session` on success.
pub async fn unlock(
    session: &mut SessionContext,
    verifier: &dyn LicenseVerifier,
    license_key: &SecretString,
) -> Result<LicenseVerdict, ScanError> {
    let verdict = check(verifier, license_key).await?;
    session.authorize(verdict.dev_mode);
    Ok(verdict)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    #[tokio::test]
    async fn test_unlock_valid_key() {
        let mut verifier = MockLicenseVerifier::new();
        verifier
            .expect_verify()
            .times(1)
            .returning(|_| Ok(LicenseVerdict::granted("ok")));

        let mut session = SessionContext::new(50);
        let verdict = unlock(&mut session, &verifier, &key("ABC-123")).await.unwrap();
        assert!(verdict.valid);
        assert!(session.authorized);
    }

    #[tokio::test]
    async fn test_unlock_blank_key_skips_service() {
        let mut verifier = MockLicenseVerifier::new();
        verifier.expect_verify().times(0);

        let mut session = SessionContext::new(50);
        let err = unlock(&mut session, &verifier, &key("   ")).await.unwrap_err();
        assert!(matches!(err, ScanError::Unauthorized(_)));
        assert!(!session.authorized);
    }

    #[tokio::test]
    async fn test_unlock_denied_keeps_session_locked() {
        let mut verifier = MockLicenseVerifier::new();
        verifier
            .expect_verify()
            .returning(|_| Ok(LicenseVerdict::denied("refunded")));

        let mut session = SessionContext::new(50);
        let err = unlock(&mut session, &verifier, &key("K")).await.unwrap_err();
        assert_eq!(err.to_string(), "Not authorized: refunded");
        assert!(!session.authorized);
    }

    #[tokio::test]
    async fn test_unlock_transport_error_is_denial() {
        let mut verifier = MockLicenseVerifier::new();
        verifier
            .expect_verify()
            .returning(|_| Err(anyhow::anyhow!("connection reset")));

        let mut session = SessionContext::new(50);
        let err = unlock(&mut session, &verifier, &key("K")).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_check_does_not_need_a_session() {
        let mut verifier = MockLicenseVerifier::new();
        verifier
            .expect_verify()
            .times(1)
            .returning(|_| Ok(LicenseVerdict::granted("ok")));
        assert!(check(&verifier, &key("ABC-123")).await.unwrap().valid);

        let mut verifier = MockLicenseVerifier::new();
        verifier.expect_verify().times(0);
        assert!(matches!(
            check(&verifier, &key("")).await,
            Err(ScanError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_unlock_dev_mode_marks_session() {
        let mut verifier = MockLicenseVerifier::new();
        verifier.expect_verify().returning(|_| Ok(LicenseVerdict::dev()));

        let mut session = SessionContext::new(0);
        unlock(&mut session, &verifier, &key("anything")).await.unwrap();
        assert!(session.authorized);
        assert!(session.dev_mode);
    }
}
