//! Fabric Auth Library
//!
//! Credential core for the Fabric control plane.
//!
//! # Features
//!
//! - **Rotating signing keys**: Ed25519 keys rotated lock-free, public halves
//!   published to a shared key-value store before use
//! - **Access tokens**: mint, verify (signature, issuer, audience, expiry,
//!   revocation) and revoke
//! - **Federated assertions**: verify third-party tokens against a cached JWKS
//! - **PKCE**: RFC 7636 verifier/challenge helpers
//! - **CLI login**: authorization-code flow with a local callback listener,
//!   refresh with reuse, JWT-bearer exchange, tenant listing
//!
//! Failures that should prompt a new login are told apart from transient
//! ones by [`Error::is_auth_failure`] and [`Error::is_retryable`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod oauth;
pub mod pkce;
pub mod store;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber.with(fmt::layer().with_writer(std::io::stderr)).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
