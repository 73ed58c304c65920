//! Identity-provider client
//!
//! Talks to the provider's `/authorize`, `/token` and `/userinfo` endpoints.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::pkce::{DEFAULT_VERIFIER_LEN, Pkce};
use crate::token::claims::{UnverifiedClaims, now_secs, peek_claims};
use crate::{Error, Result};

/// A cached access token is reused if it is valid for longer than this.
pub const REFRESH_GRACE: Duration = Duration::from_secs(30);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// `response_type` of an authorize request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// Authorization code
    Code,
    /// Implicit token
    Token,
}

impl ResponseType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Token => "token",
        }
    }
}

/// Options for [`AuthClient::authorize`]
#[derive(Debug, Clone, Default)]
pub struct AuthorizeOptions {
    /// Attach a PKCE challenge (code flow only)
    pub pkce: bool,
    /// Upstream provider hint (e.g. `github`)
    pub provider: Option<String>,
}

impl AuthorizeOptions {
    /// Enable PKCE
    #[must_use]
    pub fn with_pkce(mut self) -> Self {
        self.pkce = true;
        self
    }

    /// Set the upstream provider hint
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

/// Everything needed to finish one authorization attempt
#[derive(Clone)]
pub struct AuthorizeRequest {
    /// CSRF token echoed back on the callback
    pub state: String,
    /// PKCE verifier, sent only with the code exchange
    pub verifier: Option<String>,
    /// Where the callback will be delivered
    pub redirect_uri: String,
    /// URL to open in the browser
    pub url: Url,
}

impl fmt::Debug for AuthorizeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizeRequest")
            .field("state", &self.state)
            .field("redirect_uri", &self.redirect_uri)
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

/// Tokens returned by the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens {
    /// Access token
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,
    /// Refresh token
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
}

/// A tenant the user belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant ID
    pub id: String,
    /// Display name
    pub name: String,
}

/// `/token` response: either tokens or an OAuth error
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(flatten)]
    tokens: Tokens,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenResponse {
    fn oauth_error(&self) -> Option<&str> {
        match (self.error_description.as_deref(), self.error.as_deref()) {
            (Some(desc), _) if !desc.is_empty() => Some(desc),
            (_, Some(code)) if !code.is_empty() => Some(code),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default, rename = "allTenants")]
    all_tenants: Vec<Tenant>,
}

#[derive(Debug, Clone, Copy)]
enum Grant {
    AuthorizationCode,
    RefreshToken,
    JwtBearer,
}

impl Grant {
    /// Prefix for errors reported by the provider
    fn rejected(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "invalid authorization code",
            Self::RefreshToken => "invalid refresh token",
            Self::JwtBearer => "invalid JWT",
        }
    }

    /// Prefix for transport and decoding failures
    fn failed(self) -> &'static str {
        match self {
            Self::RefreshToken => "token refresh failed",
            Self::AuthorizationCode | Self::JwtBearer => "token exchange failed",
        }
    }
}

/// Client for one identity provider
#[derive(Debug, Clone)]
pub struct AuthClient {
    http: Client,
    client_id: String,
    issuer: String,
}

impl AuthClient {
    /// Create a client for `issuer` identifying as `client_id`.
    pub fn new(client_id: impl Into<String>, issuer: impl Into<String>) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_http_client(http, client_id, issuer))
    }

    /// Create a client using a preconfigured HTTP client.
    #[must_use]
    pub fn with_http_client(http: Client, client_id: impl Into<String>, issuer: impl Into<String>) -> Self {
        let issuer: String = issuer.into();
        Self {
            http,
            client_id: client_id.into(),
            issuer: issuer.trim_end_matches('/').to_string(),
        }
    }

    /// Provider base URL
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// OAuth client ID
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Build the authorize URL and the secrets needed to finish the flow.
    pub fn authorize(
        &self,
        redirect_uri: &str,
        response: ResponseType,
        options: &AuthorizeOptions,
    ) -> Result<AuthorizeRequest> {
        let mut url = Url::parse(&format!("{}/authorize", self.issuer))
            .map_err(|e| Error::Config(format!("invalid issuer URL {:?}: {e}", self.issuer)))?;

        let state = uuid::Uuid::new_v4().to_string();

        // Sorted so the URL is stable for a given input
        let mut query = BTreeMap::new();
        query.insert("client_id", self.client_id.clone());
        query.insert("state", state.clone());
        query.insert("redirect_uri", redirect_uri.to_string());
        query.insert("response_type", response.as_str().to_string());
        if let Some(provider) = options.provider.as_ref().filter(|p| !p.is_empty()) {
            query.insert("provider", provider.clone());
        }

        let mut verifier = None;
        if options.pkce && response == ResponseType::Code {
            let pkce = Pkce::generate(DEFAULT_VERIFIER_LEN)?;
            query.insert("code_challenge_method", pkce.method.to_string());
            query.insert("code_challenge", pkce.challenge);
            verifier = Some(pkce.verifier);
        }

        url.query_pairs_mut().extend_pairs(&query);

        Ok(AuthorizeRequest {
            state,
            verifier,
            redirect_uri: redirect_uri.to_string(),
            url,
        })
    }

    /// Redirect URI that makes the provider hold the code for [`Self::poll`]
    #[must_use]
    pub fn poll_redirect_uri(&self) -> String {
        format!("{}/clients/auth", self.issuer)
    }

    /// Long-poll the provider for the code of the login identified by `state`.
    ///
    /// `Ok(None)` means the poll timed out before the user finished and the
    /// caller should poll again.
    pub async fn poll(&self, state: &str) -> Result<Option<String>> {
        let url = format!("{}/clients/auth/poll", self.issuer);
        let empty: [(&str, &str); 0] = [];
        let response = match self.http.post(&url).query(&[("state", state)]).form(&empty).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        if status == reqwest::StatusCode::REQUEST_TIMEOUT {
            return Ok(None);
        }
        if status != reqwest::StatusCode::OK {
            return Err(Error::ProviderError(format!("unexpected status code: {status}")));
        }

        let body = response.bytes().await?;
        let values: BTreeMap<String, String> = url::form_urlencoded::parse(&body).into_owned().collect();
        if values.contains_key("error") {
            let reason = values.get("error_description").map_or("", String::as_str);
            return Err(Error::ProviderError(format!("authentication failed: {reason}")));
        }
        match values.get("code").filter(|c| !c.is_empty()) {
            Some(code) => Ok(Some(code.clone())),
            None => Err(Error::ProviderError("no code received from auth server".to_string())),
        }
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange(&self, code: &str, redirect_uri: &str, verifier: Option<&str>) -> Result<Tokens> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(verifier) = verifier {
            form.push(("code_verifier", verifier));
        }
        self.call_token(Grant::AuthorizationCode, &form).await
    }

    /// Exchange a federated identity assertion for tokens.
    pub async fn exchange_jwt(&self, assertion: &str) -> Result<Tokens> {
        let form = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)];
        self.call_token(Grant::JwtBearer, &form).await
    }

    /// Refresh tokens, reusing `access_token` while it has more than
    /// [`REFRESH_GRACE`] left.
    ///
    /// The reuse check reads the access token's `exp` without verifying it.
    pub async fn refresh(&self, refresh_token: &str, access_token: Option<&str>) -> Result<Tokens> {
        if let Some(access) = access_token.filter(|a| !a.is_empty()) {
            let claims: UnverifiedClaims = peek_claims(access)
                .map_err(|e| Error::MalformedToken(format!("invalid access token: {e}")))?;
            if claims.exp.is_some_and(|exp| exp > now_secs() + REFRESH_GRACE.as_secs()) {
                debug!("Access token still valid, skipping refresh");
                return Ok(Tokens {
                    access_token: access.to_string(),
                    refresh_token: refresh_token.to_string(),
                });
            }
        }

        let form = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.call_token(Grant::RefreshToken, &form).await
    }

    /// List the tenants available to the holder of `access_token`.
    ///
    /// The userinfo endpoint is derived from the token's (unverified) issuer.
    pub async fn list_tenants(&self, access_token: &str) -> Result<Vec<Tenant>> {
        let token = access_token.trim();
        if token.is_empty() {
            return Err(Error::MalformedToken(
                "no access token available; please login first".to_string(),
            ));
        }

        let claims: UnverifiedClaims = peek_claims(token)?;
        let iss = claims
            .iss
            .filter(|iss| !iss.is_empty())
            .ok_or_else(|| Error::MalformedToken("token is missing issuer (iss) claim".to_string()))?;

        let url = format!("{}/userinfo", iss.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ProviderError(format!("userinfo request failed: {status}")));
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| Error::ProviderError(format!("failed to decode userinfo: {e}")))?;
        Ok(info.all_tenants)
    }

    async fn call_token(&self, grant: Grant, form: &[(&str, &str)]) -> Result<Tokens> {
        let url = format!("{}/token", self.issuer);
        debug!(url = %url, grant = ?grant, "Calling token endpoint");

        let response = self.http.post(&url).form(form).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        // The body is inspected first: providers report OAuth errors with any status
        let parsed: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::ProviderError(format!("{}: {e}: {status}", grant.failed())))?;

        if let Some(reason) = parsed.oauth_error() {
            return Err(Error::ProviderError(format!("{}: {reason}", grant.rejected())));
        }
        if status != reqwest::StatusCode::OK {
            return Err(Error::ProviderError(format!("{}: {status}", grant.failed())));
        }

        info!(grant = ?grant, "Token endpoint returned tokens");
        Ok(parsed.tokens)
    }
}

/// Pick the single tenant called `name`.
pub fn select_tenant<'a>(tenants: &'a [Tenant], name: &str) -> Result<&'a Tenant> {
    let name = name.trim();
    let mut matches = tenants.iter().filter(|t| t.name == name);
    match (matches.next(), matches.next()) {
        (Some(tenant), None) => Ok(tenant),
        (None, _) => Err(Error::TenantNotFound(name.to_string())),
        (Some(_), Some(_)) => Err(Error::MultipleTenants(name.to_string())),
    }
}

/// Pick the single tenant whose ID equals the `sub` of `access_token`.
///
/// The token is read without verification; it only steers the choice.
pub fn select_tenant_by_sub<'a>(tenants: &'a [Tenant], access_token: &str) -> Result<&'a Tenant> {
    let claims: UnverifiedClaims = peek_claims(access_token.trim())
        .map_err(|e| Error::MalformedToken(format!("invalid subject (sub) claim in token: {e}")))?;
    let sub = claims
        .sub
        .filter(|sub| !sub.is_empty())
        .ok_or_else(|| Error::MalformedToken("token is missing subject (sub) claim".to_string()))?;

    let mut matches = tenants.iter().filter(|t| t.id == sub);
    match (matches.next(), matches.next()) {
        (Some(tenant), None) => Ok(tenant),
        (None, _) => Err(Error::TenantNotFound(format!("no tenant with id {sub}"))),
        (Some(_), Some(_)) => Err(Error::MultipleTenants(sub)),
    }
}
