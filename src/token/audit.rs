//! Audit logging for signing-key and access-token lifecycle events.
//!
//! Every event is emitted via `tracing::info!` with a JSON payload, so the
//! trail is queryable by any log aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `key.rotated` | This process installed a new current signing key |
//! | `token.issued` | An access token was minted |
//! | `token.verified` | An access token passed every check |
//! | `token.denied` | Minting was refused (empty subject, no usable key) |
//! | `token.rejected` | Verification failed |
//! | `token.revoked` | A revocation entry was written |
//!
//! Events never carry the token string or its signature.

use serde::Serialize;

/// Structured audit event.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"token.issued"`).
    pub event: &'static str,
    /// Token subject, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Signing key involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Audience list (for `token.issued`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<Vec<String>>,
    /// Human-readable reason for denial, rejection or revocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn new(event: &'static str) -> Self {
        Self {
            event,
            subject: None,
            kid: None,
            audience: None,
            reason: None,
        }
    }

    /// Construct a `key.rotated` event.
    #[must_use]
    pub fn key_rotated(kid: &str) -> Self {
        Self {
            kid: Some(kid.to_string()),
            ..Self::new("key.rotated")
        }
    }

    /// Construct a `token.issued` event.
    #[must_use]
    pub fn issued(subject: &str, kid: &str, audience: &[String]) -> Self {
        Self {
            subject: Some(subject.to_string()),
            kid: Some(kid.to_string()),
            audience: Some(audience.to_vec()),
            ..Self::new("token.issued")
        }
    }

    /// Construct a `token.verified` event.
    #[must_use]
    pub fn verified(subject: &str, kid: &str) -> Self {
        Self {
            subject: Some(subject.to_string()),
            kid: Some(kid.to_string()),
            ..Self::new("token.verified")
        }
    }

    /// Construct a `token.denied` event.
    #[must_use]
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new("token.denied")
        }
    }

    /// Construct a `token.rejected` event.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new("token.rejected")
        }
    }

    /// Construct a `token.revoked` event.
    #[must_use]
    pub fn revoked(subject: &str, reason: &str) -> Self {
        Self {
            subject: Some(subject.to_string()),
            reason: Some(reason.to_string()),
            ..Self::new("token.revoked")
        }
    }
}

/// Emit an audit event via `tracing::info!` under the `audit` target.
///
/// ```text
/// INFO audit: audit={"event":"token.issued","subject":"tenant-a",...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(target: "audit", audit = %json, "token audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
