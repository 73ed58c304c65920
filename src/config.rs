//! Configuration management
//!
//! Layered with `figment`: optional YAML file, then `FABRIC_AUTH_*`
//! environment variables (`__` separates nesting levels, e.g.
//! `FABRIC_AUTH_LOGIN__CLIENT_ID`). Durations are human-readable (`"24h"`).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};

use crate::oauth::{AuthClient, CredentialCache, DEFAULT_LOGIN_TIMEOUT, LoginMode, LoginOptions};
use crate::store::KeyValueStore;
use crate::token::{DEFAULT_FETCH_TIMEOUT, DEFAULT_KEY_VALIDITY, DEFAULT_LEEWAY_SECS, KeyManager, TokenIssuer, TokenVerifier};
use crate::{Error, Result};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "FABRIC_AUTH_";

/// Namespace object holding custom claims in federated assertions
pub const DEFAULT_CLAIM_NAMESPACE: &str = "https://fabric.dev/jwt/claims";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Access-token issuer (server side)
    pub issuer: IssuerConfig,
    /// Federated assertion verification
    pub federation: FederationConfig,
    /// Interactive login (CLI side)
    pub login: LoginConfig,
}

/// Access-token issuer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerConfig {
    /// Value stamped into and required of the `iss` claim
    pub issuer: String,
    /// How long a signing key is used before rotation
    #[serde(with = "humantime_serde")]
    pub key_validity: Duration,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            issuer: "https://fabric.internal".to_string(),
            key_validity: DEFAULT_KEY_VALIDITY,
        }
    }
}

impl IssuerConfig {
    /// Build a key manager and issuer over the given store buckets.
    pub async fn build(
        &self,
        public_keys: Arc<dyn KeyValueStore>,
        revocations: Arc<dyn KeyValueStore>,
    ) -> Result<TokenIssuer> {
        if self.issuer.is_empty() {
            return Err(Error::Config("issuer.issuer must not be empty".to_string()));
        }
        let keys = KeyManager::with_validity(public_keys, self.key_validity).await?;
        Ok(TokenIssuer::new(self.issuer.clone(), Arc::new(keys), revocations))
    }
}

/// Federated identity provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// JWKS document URL
    pub jwks_url: Option<String>,
    /// Required `iss` claim
    pub issuer: String,
    /// Accepted signing algorithms
    pub algorithms: Vec<Algorithm>,
    /// Path to the identity claim, one object key per element
    pub claim_path: Vec<String>,
    /// Clock-skew tolerance
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
    /// Timeout for one JWKS fetch
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            jwks_url: None,
            issuer: String::new(),
            algorithms: vec![Algorithm::RS256],
            claim_path: vec![DEFAULT_CLAIM_NAMESPACE.to_string(), "github-username".to_string()],
            leeway: Duration::from_secs(DEFAULT_LEEWAY_SECS),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl FederationConfig {
    /// Build a verifier.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when no JWKS URL, issuer, algorithm or claim path is set.
    pub fn verifier(&self) -> Result<TokenVerifier> {
        let jwks_url = self
            .jwks_url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::Config("federation.jwks_url is required".to_string()))?;
        if self.issuer.is_empty() {
            return Err(Error::Config("federation.issuer is required".to_string()));
        }
        if self.algorithms.is_empty() {
            return Err(Error::Config("federation.algorithms must not be empty".to_string()));
        }
        if self.claim_path.is_empty() {
            return Err(Error::Config("federation.claim_path must not be empty".to_string()));
        }

        let http = reqwest::Client::builder().timeout(self.fetch_timeout).build()?;
        Ok(
            TokenVerifier::new(jwks_url, self.issuer.clone(), self.algorithms.clone(), self.claim_path.clone())?
                .with_leeway(self.leeway)
                .with_http_client(http),
        )
    }
}

/// Interactive login settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Identity provider base URL
    pub issuer: String,
    /// OAuth client ID
    pub client_id: String,
    /// Upstream provider hint
    pub provider: Option<String>,
    /// `callback` (local listener) or `poll`
    pub mode: LoginMode,
    /// Callback port (0 = ephemeral)
    pub callback_port: u16,
    /// How long to wait for the browser
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Use PKCE
    pub pkce: bool,
    /// Open the browser automatically
    pub open_browser: bool,
    /// Token cache directory (default `~/.fabric-auth/tokens`)
    pub token_dir: Option<PathBuf>,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            issuer: "https://auth.fabric.dev".to_string(),
            client_id: "fabric-cli".to_string(),
            provider: None,
            mode: LoginMode::Callback,
            callback_port: 0,
            timeout: DEFAULT_LOGIN_TIMEOUT,
            pkce: true,
            open_browser: true,
            token_dir: None,
        }
    }
}

impl LoginConfig {
    /// Provider client
    pub fn client(&self) -> Result<AuthClient> {
        if self.issuer.is_empty() || self.client_id.is_empty() {
            return Err(Error::Config("login.issuer and login.client_id are required".to_string()));
        }
        AuthClient::new(self.client_id.clone(), self.issuer.clone())
    }

    /// Flow options (`interactive` is decided by the caller)
    #[must_use]
    pub fn options(&self) -> LoginOptions {
        LoginOptions {
            mode: self.mode,
            port: self.callback_port,
            pkce: self.pkce,
            provider: self.provider.clone(),
            open_browser: self.open_browser,
            interactive: false,
            timeout: self.timeout,
        }
    }

    /// Credential cache at `token_dir` or the default location
    pub fn credential_cache(&self) -> Result<CredentialCache> {
        match &self.token_dir {
            Some(dir) => CredentialCache::new(dir),
            None => CredentialCache::default_location(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!("Config file not found: {}", p.display())));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment.extract().map_err(|e| Error::Config(e.to_string()))
    }
}
