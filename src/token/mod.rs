//! Signing keys, access tokens and federated assertions.
//!
//! # Components
//!
//! - [`KeyManager`]: owns the current Ed25519 signing key, rotates it on
//!   expiry and resolves published public keys by `kid`.
//! - [`TokenIssuer`]: mints, verifies and revokes access tokens signed by the
//!   key manager.
//! - [`TokenVerifier`]: checks assertions from a federated identity provider
//!   against its published JWKS.
//!
//! Lifecycle events are written to the `audit` tracing target (see [`audit`]).

pub mod audit;
pub mod claims;
mod issuer;
mod key_manager;
mod verifier;

pub use claims::{AccessClaims, UnverifiedClaims, peek_claims, signature_fragment};
pub use issuer::{Issuance, MAX_TOKEN_LEN, TokenIssuer};
pub use key_manager::{DEFAULT_KEY_VALIDITY, KID_MAX_LEN, KeyManager, PublicKey, SigningKey};
pub use verifier::{DEFAULT_FETCH_TIMEOUT, DEFAULT_LEEWAY_SECS, TokenVerifier};
