//! Verification of assertions minted by a federated identity provider.
//!
//! The provider publishes its RSA keys as a JWKS document. Keys are cached in
//! memory by `kid` and the whole set is re-fetched only when a token names a
//! `kid` the cache does not know; there is no time-based expiry. Concurrent
//! misses share one fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Default clock-skew tolerance for `exp`/`nbf`, in seconds.
pub const DEFAULT_LEEWAY_SECS: u64 = 60;

/// Default timeout for one JWKS fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// JWKS document with entries kept raw so one bad key does not spoil the set.
#[derive(Debug, Deserialize)]
struct RawJwks {
    #[serde(default)]
    keys: Vec<Value>,
}

type KeyMap = HashMap<String, DecodingKey>;

/// Verifies third-party assertions against a remote key set.
pub struct TokenVerifier {
    jwks_url: String,
    issuer: String,
    algorithms: Vec<Algorithm>,
    claim_path: Vec<String>,
    leeway: u64,
    http: reqwest::Client,
    keys: ArcSwap<KeyMap>,
    refresh: Mutex<()>,
}

impl TokenVerifier {
    /// Create a verifier for assertions from `issuer`, signed with one of
    /// `algorithms` by a key published at `jwks_url`.
    ///
    /// `claim_path` names the identity claim to extract, one JSON object key
    /// per element (e.g. a namespace object then the field inside it).
    pub fn new(
        jwks_url: impl Into<String>,
        issuer: impl Into<String>,
        algorithms: Vec<Algorithm>,
        claim_path: Vec<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_FETCH_TIMEOUT)
            .build()?;
        Ok(Self {
            jwks_url: jwks_url.into(),
            issuer: issuer.into(),
            algorithms,
            claim_path,
            leeway: DEFAULT_LEEWAY_SECS,
            http,
            keys: ArcSwap::from_pointee(KeyMap::new()),
            refresh: Mutex::new(()),
        })
    }

    /// Override the clock-skew tolerance.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway.as_secs();
        self
    }

    /// Use a preconfigured HTTP client for JWKS fetches.
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Number of keys currently cached.
    #[must_use]
    pub fn cached_keys(&self) -> usize {
        self.keys.load().len()
    }

    /// Verify `token` and return the configured identity claim.
    pub async fn verify_assertion(&self, token: &str) -> Result<String> {
        let header = jsonwebtoken::decode_header(token).map_err(|e| Error::from_jwt(&e))?;
        if !self.algorithms.contains(&header.alg) {
            return Err(Error::InvalidSignature(format!(
                "signing method {:?} is not allowed",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| Error::UnknownKey("token header has no kid".to_string()))?;

        let key = self.decoding_key(&kid).await?;

        // Pinned to the header's (allow-listed) algorithm
        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        let claims = jsonwebtoken::decode::<Value>(token, &key, &validation)
            .map_err(|e| Error::from_jwt(&e))?
            .claims;

        let iss = claims.get("iss").and_then(Value::as_str).unwrap_or_default();
        if iss != self.issuer {
            return Err(Error::InvalidIssuer {
                expected: self.issuer.clone(),
                actual: iss.to_string(),
            });
        }

        extract_claim(&claims, &self.claim_path)
    }

    /// Cached key for `kid`, refreshing the whole set once on a miss.
    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey> {
        if let Some(key) = self.keys.load().get(kid) {
            return Ok(key.clone());
        }

        let _guard = self.refresh.lock().await;
        // Someone else may have refreshed while we waited
        if let Some(key) = self.keys.load().get(kid) {
            return Ok(key.clone());
        }

        debug!(kid, "Key not cached, fetching JWKS");
        let fresh = self.fetch().await?;
        let found = fresh.get(kid).cloned();
        self.keys.store(Arc::new(fresh));

        found.ok_or_else(|| Error::UnknownKey(kid.to_string()))
    }

    async fn fetch(&self) -> Result<KeyMap> {
        let jwks: RawJwks = self
            .http
            .get(&self.jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let keys = parse_keys(jwks.keys);
        info!(url = %self.jwks_url, keys = keys.len(), "JWKS refreshed");
        Ok(keys)
    }
}

fn parse_keys(entries: Vec<Value>) -> KeyMap {
    let mut keys = KeyMap::with_capacity(entries.len());
    for entry in entries {
        let jwk: Jwk = match serde_json::from_value(entry) {
            Ok(jwk) => jwk,
            Err(e) => {
                warn!(error = %e, "Skipping unparseable JWK");
                continue;
            }
        };
        let Some(kid) = jwk.common.key_id else {
            warn!("Skipping JWK without kid");
            continue;
        };
        let AlgorithmParameters::RSA(rsa) = &jwk.algorithm else {
            warn!(kid, "Skipping non-RSA JWK");
            continue;
        };
        match DecodingKey::from_rsa_components(&rsa.n, &rsa.e) {
            Ok(key) => {
                keys.insert(kid, key);
            }
            Err(e) => warn!(kid, error = %e, "Skipping invalid RSA JWK"),
        }
    }
    keys
}

/// Walk `path` through nested claim objects and return a non-empty string.
fn extract_claim(claims: &Value, path: &[String]) -> Result<String> {
    let name = path.last().map_or("identity", String::as_str);
    let value = path
        .iter()
        .try_fold(claims, |node, key| node.get(key))
        .and_then(Value::as_str)
        .unwrap_or_default();

    if value.is_empty() {
        return Err(Error::MissingClaim(name.to_string()));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn path() -> Vec<String> {
        vec!["https://fabric.example/claims".to_string(), "username".to_string()]
    }

    #[test]
    fn extract_claim_walks_nested_objects() {
        // GIVEN: the identity nested under a namespace
        let claims = json!({"https://fabric.example/claims": {"username": "octocat"}});

        // THEN: the leaf is returned
        assert_eq!(extract_claim(&claims, &path()).unwrap(), "octocat");
    }

    #[test]
    fn extract_claim_requires_presence() {
        let claims = json!({"sub": "1234"});

        let err = extract_claim(&claims, &path()).unwrap_err();

        assert!(matches!(err, Error::MissingClaim(name) if name == "username"));
    }

    #[test]
    fn extract_claim_rejects_empty_and_non_string() {
        let empty = json!({"https://fabric.example/claims": {"username": ""}});
        let number = json!({"https://fabric.example/claims": {"username": 7}});

        assert!(matches!(extract_claim(&empty, &path()), Err(Error::MissingClaim(_))));
        assert!(matches!(extract_claim(&number, &path()), Err(Error::MissingClaim(_))));
    }

    #[test]
    fn parse_keys_skips_unusable_entries() {
        // GIVEN: one RSA key, one EC key, one without kid and one garbage entry
        let entries = vec![
            json!({"kty": "RSA", "kid": "rsa-1", "use": "sig", "n": "u8kpMT9-bXHuVJTiVuYKvH1jQlsAD3Rq3K5Zn7DWKADOqPhmRQci4jUMv2tyScuRLnzShGw-86DFPIVMpoArruwG_j9iM94IVTx36567Kb0NtO1L4fAv_PGdwGVKWfVtlw2qB3cvoTIYFewKihYMPQpSaMxWONCuZ9f508UMYoEFWFBpcceyk5-3LgNstv1fcHLnDNOq9BGlQV6dx1mmUrB33YAZOcDVHIwAFKdhXdXoA80ZntjW1C7Litm7w3F3R0lmHtrvrswS9w23d5wZ0LfjDlxgR7rOzD1kxhKWFfpSxF5GSpw3c46agIeT5hi2lYLGuUAv-1K61fKa9zzBEw", "e": "AQAB"}),
            json!({"kty": "EC", "kid": "ec-1", "crv": "P-256", "x": "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU", "y": "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0"}),
            json!({"kty": "RSA", "n": "AQAB", "e": "AQAB"}),
            json!("not a key"),
        ];

        // WHEN: parsed
        let keys = parse_keys(entries);

        // THEN: only the RSA key survives
        assert_eq!(keys.len(), 1);
        assert!(keys.contains_key("rsa-1"));
    }

    #[tokio::test]
    async fn disallowed_algorithm_fails_before_fetch() {
        let verifier = TokenVerifier::new("http://127.0.0.1:9/jwks", "issuer", vec![Algorithm::PS256], path()).unwrap();
        // HS256 header, empty payload and signature
        let token = "eyJhbGciOiJIUzI1NiIsImtpZCI6ImsxIn0.e30.c2ln";

        let err = verifier.verify_assertion(token).await.unwrap_err();

        assert!(matches!(err, Error::InvalidSignature(_)), "{err:?}");
        assert_eq!(verifier.cached_keys(), 0);
    }
}
