//! Error types for the credential core

use std::io;

use thiserror::Error;

use crate::store::StoreError;

/// Result type alias for the credential core
pub type Result<T> = std::result::Result<T, Error>;

/// Credential core errors
#[derive(Error, Debug)]
pub enum Error {
    /// Token is oversized, structurally broken, or missing required claims
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Signature did not verify, or the token used a foreign algorithm
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The `kid` header could not be resolved to a public key
    #[error("unknown key ID: {0}")]
    UnknownKey(String),

    /// The `iss` claim did not match the configured issuer
    #[error("invalid issuer: expected {expected:?}, got {actual:?}")]
    InvalidIssuer {
        /// Configured issuer
        expected: String,
        /// Issuer found in the token
        actual: String,
    },

    /// The `aud` claim does not include the expected audience
    #[error("invalid audience: {0:?}")]
    InvalidAudience(String),

    /// The token is past its `exp` claim
    #[error("token expired")]
    Expired,

    /// The token is on the revocation list
    #[error("token revoked: {0}")]
    Revoked(String),

    /// A revocation entry already exists for this token
    #[error("token already revoked")]
    AlreadyRevoked,

    /// The backing key-value store could not be reached or failed
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A required custom claim is absent or empty
    #[error("missing {0} claim")]
    MissingClaim(String),

    /// PKCE verifier length outside 43..=128
    #[error("code verifier length must be between 43 and 128 characters, got {0}")]
    InvalidPkceLength(usize),

    /// Callback `state` did not match the one sent with the authorize request
    #[error("authentication error: state mismatch")]
    StateMismatch,

    /// Login was canceled by the user, the caller, or the deadline
    #[error("login canceled: {0}")]
    Canceled(String),

    /// The identity provider reported an error
    #[error("{0}")]
    ProviderError(String),

    /// No tenant matches the requested name or ID
    #[error("tenant not found: {0:?}")]
    TenantNotFound(String),

    /// More than one tenant shares the requested name or ID
    #[error("multiple tenants match {0:?}")]
    MultipleTenants(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// `true` for failures that mean the credential itself is no good and the
    /// user should log in again.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken(_)
                | Self::InvalidSignature(_)
                | Self::UnknownKey(_)
                | Self::InvalidIssuer { .. }
                | Self::InvalidAudience(_)
                | Self::Expired
                | Self::Revoked(_)
                | Self::MissingClaim(_)
        )
    }

    /// `true` for transient failures where retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StoreUnavailable(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    pub(crate) fn from_jwt(err: &jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidIssuer => Self::InvalidIssuer {
                expected: String::new(),
                actual: String::new(),
            },
            ErrorKind::InvalidAudience => Self::InvalidAudience(String::new()),
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_)
            | ErrorKind::MissingRequiredClaim(_) => Self::MalformedToken(err.to_string()),
            _ => Self::InvalidSignature(err.to_string()),
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}
