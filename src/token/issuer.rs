//! Access-token minting, verification and revocation.
//!
//! # Verification order
//!
//! 1. Length bound (no parsing of oversized input).
//! 2. Header: algorithm must be EdDSA, `kid` must resolve via the key manager.
//! 3. Signature over the claims.
//! 4. Expiry, then issuer, then audience.
//! 5. Revocation bucket. An unreachable bucket fails the check.
//!
//! Revocation entries are keyed by the token's signature segment, so the
//! bucket never holds claim data.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, Header, Validation};
use tracing::{debug, error, warn};

use super::audit::{self, AuditEvent};
use super::claims::{AccessClaims, now_secs, signature_fragment};
use super::key_manager::KeyManager;
use crate::store::{KeyValueStore, StoreError};
use crate::{Error, Result};

/// Tokens longer than this are rejected before parsing.
pub const MAX_TOKEN_LEN: usize = 1024;

const SIGNING_ALGORITHM: Algorithm = Algorithm::EdDSA;

/// Outcome of [`TokenIssuer::create_access_token`].
///
/// `Denied` is an expected answer (empty subject, no usable signing key), not
/// an error; callers branch on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issuance {
    /// A signed compact token
    Token(String),
    /// Nothing was issued
    Denied,
}

impl Issuance {
    /// The token, if one was issued.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Token(t) => Some(t),
            Self::Denied => None,
        }
    }

    /// Consume into the token, if one was issued.
    #[must_use]
    pub fn into_token(self) -> Option<String> {
        match self {
            Self::Token(t) => Some(t),
            Self::Denied => None,
        }
    }

    /// `true` when nothing was issued.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied)
    }
}

/// Mints and checks access tokens signed by a [`KeyManager`].
pub struct TokenIssuer {
    issuer: String,
    keys: Arc<KeyManager>,
    revocations: Arc<dyn KeyValueStore>,
}

impl TokenIssuer {
    /// Create an issuer that stamps `issuer` into every token.
    pub fn new(issuer: impl Into<String>, keys: Arc<KeyManager>, revocations: Arc<dyn KeyValueStore>) -> Self {
        Self {
            issuer: issuer.into(),
            keys,
            revocations,
        }
    }

    /// Configured issuer string.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The key manager tokens are signed with.
    #[must_use]
    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Mint a token for `subject` valid for `validity`, restricted to `audience`.
    ///
    /// An empty `audience` produces an unscoped token. Returns
    /// [`Issuance::Denied`] for an empty subject or when no signing key is
    /// available.
    pub async fn create_access_token<S: AsRef<str>>(
        &self,
        subject: &str,
        validity: Duration,
        audience: &[S],
    ) -> Issuance {
        if subject.is_empty() {
            debug!("Refusing to issue token for empty subject");
            audit::emit(&AuditEvent::denied("empty subject"));
            return Issuance::Denied;
        }

        let key = match self.keys.current_key().await {
            Ok(key) => key,
            Err(e) => {
                error!(error = %e, "Failed to get signing key");
                audit::emit(&AuditEvent::denied("no signing key"));
                return Issuance::Denied;
            }
        };

        let Some(exp) = expiry_secs(validity) else {
            warn!(?validity, "Refusing to issue token with unrepresentable expiry");
            audit::emit(&AuditEvent::denied("validity out of range"));
            return Issuance::Denied;
        };

        let claims = AccessClaims {
            sub: subject.to_string(),
            iss: self.issuer.clone(),
            aud: audience.iter().map(|a| a.as_ref().to_string()).collect(),
            exp,
        };

        let mut header = Header::new(SIGNING_ALGORITHM);
        header.kid = Some(key.kid().to_string());

        let token = match jsonwebtoken::encode(&header, &claims, key.encoding_key()) {
            Ok(token) => token,
            Err(e) => {
                error!(kid = %key.kid(), error = %e, "Failed to sign token");
                audit::emit(&AuditEvent::denied("signing failed"));
                return Issuance::Denied;
            }
        };

        if token.len() > MAX_TOKEN_LEN {
            warn!(len = token.len(), "Issued token would exceed the verification size limit");
            audit::emit(&AuditEvent::denied("token too large"));
            return Issuance::Denied;
        }

        audit::emit(&AuditEvent::issued(subject, key.kid(), &claims.aud));
        Issuance::Token(token)
    }

    /// Verify `token` and return its subject.
    ///
    /// An empty `expected_audience` is the admin check: it accepts only
    /// unscoped tokens. Store failures while reading the revocation bucket
    /// surface as [`Error::StoreUnavailable`].
    pub async fn verify_access_token(&self, token: &str, expected_audience: &str) -> Result<String> {
        let result = self.verify_inner(token, expected_audience).await;
        if let Err(ref e) = result {
            debug!(error = %e, "Access token rejected");
            audit::emit(&AuditEvent::rejected(e.to_string()));
        }
        result
    }

    async fn verify_inner(&self, token: &str, expected_audience: &str) -> Result<String> {
        let (claims, kid) = self.authenticate(token).await?;

        if !claims.permits_audience(expected_audience) {
            return Err(Error::InvalidAudience(expected_audience.to_string()));
        }

        match self.revocations.get(signature_fragment(token)).await {
            Ok(entry) => return Err(Error::Revoked(String::from_utf8_lossy(&entry.value).into_owned())),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => {
                warn!(error = %e, "Failed to check revocation list");
                return Err(Error::StoreUnavailable(format!("failed to check revocation list: {e}")));
            }
        }

        audit::emit(&AuditEvent::verified(&claims.sub, &kid));
        Ok(claims.sub)
    }

    /// Revoke `token` with a human-readable `reason`.
    ///
    /// The token must carry a valid signature from this issuer and be
    /// unexpired. Revoking twice returns [`Error::AlreadyRevoked`].
    pub async fn revoke(&self, token: &str, reason: &str) -> Result<()> {
        let (claims, _) = self.authenticate(token).await?;

        match self
            .revocations
            .create(signature_fragment(token), reason.as_bytes().to_vec())
            .await
        {
            Ok(_) => {
                audit::emit(&AuditEvent::revoked(&claims.sub, reason));
                Ok(())
            }
            Err(StoreError::AlreadyExists(_)) => Err(Error::AlreadyRevoked),
            Err(e) => {
                warn!(error = %e, "Failed to record revocation");
                Err(Error::StoreUnavailable(format!("failed to revoke token: {e}")))
            }
        }
    }

    /// Signature, expiry and issuer checks. Returns the claims and the `kid`.
    async fn authenticate(&self, token: &str) -> Result<(AccessClaims, String)> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(Error::MalformedToken(format!(
                "token is {} bytes, limit is {MAX_TOKEN_LEN}",
                token.len()
            )));
        }

        let header = jsonwebtoken::decode_header(token).map_err(|e| Error::from_jwt(&e))?;
        if header.alg != SIGNING_ALGORITHM {
            return Err(Error::InvalidSignature(format!(
                "unexpected signing method: {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| Error::UnknownKey("token header has no kid".to_string()))?;

        let public_key = self
            .keys
            .lookup_public_key(&kid)
            .await?
            .ok_or_else(|| Error::UnknownKey(kid.clone()))?;

        let claims = jsonwebtoken::decode::<AccessClaims>(token, &public_key.decoding_key()?, &validation())
            .map_err(|e| Error::from_jwt(&e))?
            .claims;

        if now_secs() >= claims.exp {
            return Err(Error::Expired);
        }
        if claims.iss != self.issuer {
            return Err(Error::InvalidIssuer {
                expected: self.issuer.clone(),
                actual: claims.iss,
            });
        }
        if claims.sub.is_empty() {
            return Err(Error::MalformedToken("empty subject".to_string()));
        }

        Ok((claims, kid))
    }
}

/// Signature-only validation; time, issuer and audience are checked by hand.
fn validation() -> Validation {
    let mut v = Validation::new(SIGNING_ALGORITHM);
    v.leeway = 0;
    v.validate_exp = false;
    v.validate_aud = false;
    v.set_required_spec_claims(&["exp", "sub"]);
    v
}

/// `now + validity` in Unix seconds, rounded up. `None` if it overflows.
fn expiry_secs(validity: Duration) -> Option<u64> {
    let at = SystemTime::now()
        .checked_add(validity)?
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    at.as_secs().checked_add(u64::from(at.subsec_nanos() > 0))
}

#[cfg(test)]
mod tests {
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
    use jsonwebtoken::EncodingKey;

    use super::*;
    use crate::store::MemoryStore;
    use crate::token::key_manager::SigningKey;

    const ISSUER: &str = "https://dummy";
    const HOUR: Duration = Duration::from_secs(3600);

    async fn issuer() -> TokenIssuer {
        let keys = Arc::new(KeyManager::new(Arc::new(MemoryStore::new())).await.unwrap());
        TokenIssuer::new(ISSUER, keys, Arc::new(MemoryStore::new()))
    }

    async fn mint(ti: &TokenIssuer, sub: &str, aud: &[&str]) -> String {
        ti.create_access_token(sub, HOUR, aud).await.into_token().unwrap()
    }

    #[tokio::test]
    async fn round_trip_returns_subject() {
        let ti = issuer().await;
        let token = mint(&ti, "tenant-a", &[]).await;

        assert_eq!(ti.verify_access_token(&token, "").await.unwrap(), "tenant-a");
        assert_eq!(ti.verify_access_token(&token, "http://audience").await.unwrap(), "tenant-a");
    }

    #[tokio::test]
    async fn header_carries_current_kid() {
        let ti = issuer().await;
        let token = mint(&ti, "tenant-a", &[]).await;

        let header = jsonwebtoken::decode_header(&token).unwrap();

        assert_eq!(header.alg, Algorithm::EdDSA);
        assert_eq!(header.kid.as_deref(), Some(ti.key_manager().loaded_key().kid()));
    }

    #[tokio::test]
    async fn empty_subject_is_denied() {
        let ti = issuer().await;

        assert!(ti.create_access_token("", HOUR, &["a"]).await.is_denied());
        assert!(ti.create_access_token::<&str>("", Duration::ZERO, &[]).await.is_denied());
    }

    #[tokio::test]
    async fn scoped_token_checks_membership() {
        let ti = issuer().await;
        let token = mint(&ti, "tenant-a", &["a"]).await;

        assert!(ti.verify_access_token(&token, "a").await.is_ok());
        assert!(matches!(
            ti.verify_access_token(&token, "").await,
            Err(Error::InvalidAudience(_))
        ));
        assert!(matches!(
            ti.verify_access_token(&token, "b").await,
            Err(Error::InvalidAudience(aud)) if aud == "b"
        ));
    }

    #[tokio::test]
    async fn oversized_token_is_malformed() {
        let ti = issuer().await;
        let token = "a".repeat(MAX_TOKEN_LEN + 1);

        assert!(matches!(
            ti.verify_access_token(&token, "").await,
            Err(Error::MalformedToken(_))
        ));
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let ti = issuer().await;

        let err = ti.verify_access_token("not.a.token", "").await.unwrap_err();
        assert!(matches!(err, Error::MalformedToken(_)), "{err:?}");
    }

    #[tokio::test]
    async fn tampered_payload_fails_signature() {
        let ti = issuer().await;
        let token = mint(&ti, "tenant-a", &[]).await;
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"admin","iss":"{ISSUER}","exp":9999999999}}"#));
        parts[1] = &forged;

        let err = ti.verify_access_token(&parts.join("."), "").await.unwrap_err();

        assert!(matches!(err, Error::InvalidSignature(_)), "{err:?}");
    }

    #[tokio::test]
    async fn foreign_algorithm_is_rejected() {
        let ti = issuer().await;
        let kid = ti.key_manager().loaded_key().kid().to_string();
        let claims = AccessClaims {
            sub: "admin".to_string(),
            iss: ISSUER.to_string(),
            aud: vec![],
            exp: now_secs() + 3600,
        };
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(kid);
        let token = jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(b"guessable")).unwrap();

        assert!(matches!(
            ti.verify_access_token(&token, "").await,
            Err(Error::InvalidSignature(_))
        ));
    }

    #[tokio::test]
    async fn unpublished_key_is_unknown() {
        let ti = issuer().await;
        let rogue = SigningKey::generate(HOUR).unwrap();
        let claims = AccessClaims {
            sub: "admin".to_string(),
            iss: ISSUER.to_string(),
            aud: vec![],
            exp: now_secs() + 3600,
        };
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(rogue.kid().to_string());
        let token = jsonwebtoken::encode(&header, &claims, rogue.encoding_key()).unwrap();

        assert!(matches!(
            ti.verify_access_token(&token, "").await,
            Err(Error::UnknownKey(kid)) if kid == rogue.kid()
        ));
    }

    #[tokio::test]
    async fn token_survives_key_rotation() {
        let ti = issuer().await;
        let token = mint(&ti, "tenant-a", &[]).await;
        let old = ti.key_manager().loaded_key();

        ti.key_manager().rotate_key(&old).await.unwrap();

        assert_eq!(ti.verify_access_token(&token, "").await.unwrap(), "tenant-a");
    }

    #[tokio::test]
    async fn revoke_then_verify_reports_reason() {
        let ti = issuer().await;
        let token = mint(&ti, "tenant-a", &["a"]).await;

        ti.revoke(&token, "compromised").await.unwrap();

        match ti.verify_access_token(&token, "a").await {
            Err(Error::Revoked(reason)) => assert_eq!(reason, "compromised"),
            other => panic!("expected Revoked, got {other:?}"),
        }
        assert!(matches!(ti.revoke(&token, "again").await, Err(Error::AlreadyRevoked)));
    }

    #[tokio::test]
    async fn revoke_rejects_invalid_tokens() {
        let ti = issuer().await;

        assert!(ti.revoke("junk", "spam").await.is_err());
        assert!(ti.revoke(&"x".repeat(MAX_TOKEN_LEN + 1), "spam").await.is_err());
    }

    #[test]
    fn expiry_is_rounded_up() {
        let before = now_secs();
        let exp = expiry_secs(Duration::from_secs(1)).unwrap();
        assert!(exp > before);
        assert!(exp <= before + 2);
    }

    #[test]
    fn expiry_overflow_is_none() {
        assert_eq!(expiry_secs(Duration::MAX), None);
        assert_eq!(expiry_secs(Duration::from_secs(u64::MAX / 2)), None);
    }

    #[tokio::test]
    async fn huge_validity_is_denied() {
        let ti = issuer().await;

        let issuance = ti
            .create_access_token::<&str>("alice", Duration::from_secs(u64::MAX / 2), &[])
            .await;

        assert!(issuance.is_denied());
        // The issuer keeps working afterwards
        assert!(!ti.create_access_token::<&str>("alice", HOUR, &[]).await.is_denied());
    }
}
