//! Proof Key for Code Exchange (RFC 7636).

use std::fmt;
use std::ops::RangeInclusive;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{Error, Result};

/// Allowed verifier lengths, in characters.
pub const VERIFIER_LEN: RangeInclusive<usize> = 43..=128;

/// Verifier length used by the login flow.
pub const DEFAULT_VERIFIER_LEN: usize = 64;

/// How the challenge is derived from the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeMethod {
    /// Challenge is the verifier itself
    #[serde(rename = "plain")]
    Plain,
    /// Challenge is `BASE64URL(SHA256(verifier))`
    S256,
}

impl ChallengeMethod {
    /// Wire name (`code_challenge_method`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

impl fmt::Display for ChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verifier/challenge pair for one authorization attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct Pkce {
    /// Secret sent only with the code exchange
    pub verifier: String,
    /// Derived value sent with the authorize request
    pub challenge: String,
    /// Derivation used for `challenge`
    pub method: ChallengeMethod,
}

impl Pkce {
    /// Generate an S256 pair with a `length`-character verifier.
    pub fn generate(length: usize) -> Result<Self> {
        let verifier = generate_verifier(length)?;
        let challenge = generate_challenge(&verifier, ChallengeMethod::S256);
        Ok(Self {
            verifier,
            challenge,
            method: ChallengeMethod::S256,
        })
    }
}

impl fmt::Debug for Pkce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pkce")
            .field("challenge", &self.challenge)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// Random base64url verifier of exactly `length` characters.
///
/// # Errors
///
/// [`Error::InvalidPkceLength`] when `length` is outside [`VERIFIER_LEN`].
pub fn generate_verifier(length: usize) -> Result<String> {
    if !VERIFIER_LEN.contains(&length) {
        return Err(Error::InvalidPkceLength(length));
    }
    let bytes: Vec<u8> = (0..length).map(|_| rand::random::<u8>()).collect();
    let mut verifier = URL_SAFE_NO_PAD.encode(bytes);
    verifier.truncate(length);
    Ok(verifier)
}

/// Derive the challenge for `verifier`.
#[must_use]
pub fn generate_challenge(verifier: &str, method: ChallengeMethod) -> String {
    match method {
        ChallengeMethod::Plain => verifier.to_string(),
        ChallengeMethod::S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
    }
}

/// `true` if `challenge` was derived from `verifier` with `method`.
#[must_use]
pub fn validate_challenge(verifier: &str, challenge: &str, method: ChallengeMethod) -> bool {
    let expected = generate_challenge(verifier, method);
    expected.as_bytes().ct_eq(challenge.as_bytes()).into()
}
