//! Claim sets and small JWT helpers shared by the issuer, the federated
//! verifier and the login client.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use subtle::ConstantTimeEq;

use crate::{Error, Result};

/// Claims carried by access tokens minted by [`TokenIssuer`](super::TokenIssuer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (tenant or principal the token speaks for)
    pub sub: String,
    /// Issuer
    #[serde(default)]
    pub iss: String,
    /// Audience restriction. Empty means unscoped.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_audience"
    )]
    pub aud: Vec<String>,
    /// Expiry (Unix seconds)
    pub exp: u64,
}

impl AccessClaims {
    /// Audience check with unscoped-token semantics.
    ///
    /// A token without an audience restriction satisfies every expectation.
    /// A restricted token requires `expected` to be one of its audiences, so a
    /// restricted token never satisfies the empty (admin) expectation.
    #[must_use]
    pub fn permits_audience(&self, expected: &str) -> bool {
        if self.aud.iter().all(String::is_empty) {
            return true;
        }
        // Scan every entry so timing does not reveal the matching position
        let mut matched = subtle::Choice::from(0);
        for aud in &self.aud {
            matched |= aud.as_bytes().ct_eq(expected.as_bytes());
        }
        bool::from(matched)
    }
}

/// The `exp`/`iss`/`sub` subset of any JWT payload, read without verification.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnverifiedClaims {
    /// Issuer
    #[serde(default)]
    pub iss: Option<String>,
    /// Subject
    #[serde(default)]
    pub sub: Option<String>,
    /// Expiry (Unix seconds)
    #[serde(default)]
    pub exp: Option<u64>,
}

/// Decode a JWT payload without checking its signature.
///
/// Only for client-side decisions (refresh short-circuit, issuer discovery);
/// never for authorization.
pub fn peek_claims<T: DeserializeOwned>(token: &str) -> Result<T> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::MalformedToken("not a JWT".to_string()));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::MalformedToken(format!("payload is not base64url: {e}")))?;

    serde_json::from_slice(&bytes).map_err(|e| Error::MalformedToken(format!("payload is not a claim set: {e}")))
}

/// The signature segment of a compact JWT.
///
/// Used as the revocation key so that no claim data is persisted.
#[must_use]
pub fn signature_fragment(token: &str) -> &str {
    token.rsplit_once('.').map_or(token, |(_, sig)| sig)
}

/// Current wall-clock time as Unix seconds.
pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// `aud` may be a single string or an array of strings.
fn deserialize_audience<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match Option::<StringOrVec>::deserialize(deserializer)? {
        Some(StringOrVec::String(s)) => Ok(vec![s]),
        Some(StringOrVec::Vec(v)) => Ok(v),
        None => Ok(Vec::new()),
    }
}
