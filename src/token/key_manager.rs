//! Rotating Ed25519 signing keys.
//!
//! # Lifecycle
//!
//! A [`SigningKey`] is *active* while it is the key installed in the manager
//! and *retired* once a rotation replaced it. Retired keys keep verifying
//! tokens for as long as the store retains their published public half.
//!
//! # Rotation race
//!
//! The current key lives behind an [`ArcSwap`]. Rotation generates a key,
//! publishes its public half with a create-if-absent write, then swaps the
//! pointer only if it still points at the key the caller saw expire. When two
//! callers race, both publish (harmless) but only one swap lands; the loser
//! returns whatever key is installed at that moment.
//!
//! No lock is held across the publish, and the verification hot path is a
//! single atomic load.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::{PUBLIC_KEY_LENGTH, VerifyingKey};
use jsonwebtoken::{DecodingKey, EncodingKey};
use tracing::{debug, info, warn};

use super::audit::{self, AuditEvent};
use crate::store::{KeyValueStore, StoreError};
use crate::{Error, Result};

/// Longest `kid` accepted for lookup (a hyphenated UUID).
pub const KID_MAX_LEN: usize = 36;

/// How long a freshly minted signing key stays current.
pub const DEFAULT_KEY_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

/// An Ed25519 key pair with its identifier and expiry. Never mutated.
pub struct SigningKey {
    kid: String,
    secret: ed25519_dalek::SigningKey,
    encoding: EncodingKey,
    expires_at: SystemTime,
}

impl SigningKey {
    pub(crate) fn generate(validity: Duration) -> Result<Self> {
        let expires_at = SystemTime::now()
            .checked_add(validity)
            .ok_or_else(|| Error::Config(format!("key validity {validity:?} is out of range")))?;
        let seed: [u8; 32] = rand::random();
        let secret = ed25519_dalek::SigningKey::from_bytes(&seed);
        let der = secret
            .to_pkcs8_der()
            .map_err(|e| Error::Internal(format!("failed to encode Ed25519 key: {e}")))?;

        Ok(Self {
            kid: uuid::Uuid::new_v4().to_string(),
            encoding: EncodingKey::from_ed_der(der.as_bytes()),
            secret,
            expires_at,
        })
    }

    /// Key identifier written into token headers.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// When this key stops being used for signing.
    #[must_use]
    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    /// `true` once the key's signing window has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    /// The public half.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.secret.verifying_key())
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// A published Ed25519 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Parse raw public key bytes as stored in the key bucket.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: &[u8; PUBLIC_KEY_LENGTH] = bytes.try_into().ok()?;
        VerifyingKey::from_bytes(raw).ok().map(Self)
    }

    /// Raw bytes, as published.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        self.0.as_bytes()
    }

    pub(crate) fn decoding_key(&self) -> Result<DecodingKey> {
        DecodingKey::from_ed_components(&URL_SAFE_NO_PAD.encode(self.as_bytes()))
            .map_err(|e| Error::Internal(format!("unusable public key: {e}")))
    }
}

/// Owns the current signing key and resolves published public keys.
pub struct KeyManager {
    store: Arc<dyn KeyValueStore>,
    current: ArcSwap<SigningKey>,
    validity: Duration,
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("current", &self.current.load())
            .field("validity", &self.validity)
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    /// Create a key manager whose keys rotate every [`DEFAULT_KEY_VALIDITY`].
    ///
    /// # Errors
    ///
    /// Fails if the first key cannot be generated or published; no usable
    /// manager exists without one.
    pub async fn new(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        Self::with_validity(store, DEFAULT_KEY_VALIDITY).await
    }

    /// Create a key manager with a custom key validity window.
    pub async fn with_validity(store: Arc<dyn KeyValueStore>, validity: Duration) -> Result<Self> {
        let first = mint(store.as_ref(), validity).await?;
        info!(kid = %first.kid, "Initial signing key published");
        audit::emit(&AuditEvent::key_rotated(&first.kid));

        Ok(Self {
            store,
            current: ArcSwap::from_pointee(first),
            validity,
        })
    }

    /// The installed key, without checking expiry and without I/O.
    #[must_use]
    pub fn loaded_key(&self) -> Arc<SigningKey> {
        self.current.load_full()
    }

    /// The installed key if still valid; otherwise rotate and return the winner.
    ///
    /// # Errors
    ///
    /// Fails if the key had expired and the replacement could not be
    /// published. The expired key stays installed in that case.
    pub async fn current_key(&self) -> Result<Arc<SigningKey>> {
        let key = self.loaded_key();
        if key.is_expired() {
            debug!(kid = %key.kid, "Signing key expired, rotating");
            return self.rotate_key(&key).await;
        }
        Ok(key)
    }

    /// Replace `expected_old` with a freshly published key.
    ///
    /// If another caller already replaced `expected_old`, the key generated
    /// here is abandoned (its public half stays published) and the key that
    /// is current at that moment is returned instead.
    pub async fn rotate_key(&self, expected_old: &Arc<SigningKey>) -> Result<Arc<SigningKey>> {
        let candidate = Arc::new(mint(self.store.as_ref(), self.validity).await?);

        let previous = self.current.compare_and_swap(expected_old, Arc::clone(&candidate));
        if Arc::ptr_eq(&previous, expected_old) {
            info!(kid = %candidate.kid, retired = %expected_old.kid, "Signing key rotated");
            audit::emit(&AuditEvent::key_rotated(&candidate.kid));
            Ok(candidate)
        } else {
            debug!(kid = %candidate.kid, "Lost rotation race, using installed key");
            Ok(self.loaded_key())
        }
    }

    /// Resolve the public key for `kid`, or `None` when it cannot be found.
    ///
    /// Oversized identifiers are rejected before any lookup. The current key
    /// is answered from memory; anything else is read from the store.
    pub async fn get_public_key(&self, kid: &str) -> Option<PublicKey> {
        self.lookup_public_key(kid).await.ok().flatten()
    }

    /// Like [`get_public_key`](Self::get_public_key) but keeps store outages
    /// apart from unknown keys.
    pub(crate) async fn lookup_public_key(&self, kid: &str) -> Result<Option<PublicKey>> {
        if kid.len() > KID_MAX_LEN {
            debug!(len = kid.len(), "Rejecting oversized kid");
            return Ok(None);
        }

        {
            let current = self.current.load();
            if current.kid == kid {
                return Ok(Some(current.public_key()));
            }
        }

        match self.store.get(kid).await {
            Ok(entry) => {
                let key = PublicKey::from_bytes(&entry.value);
                if key.is_none() {
                    warn!(kid, "Published public key is not a valid Ed25519 key");
                }
                Ok(key)
            }
            Err(StoreError::NotFound(_)) => {
                debug!(kid, "Public key not found");
                Ok(None)
            }
            Err(e) => {
                warn!(kid, error = %e, "Failed to get public key");
                Err(Error::StoreUnavailable(format!("failed to get public key {kid}: {e}")))
            }
        }
    }
}

/// Generate a key and publish its public half before anyone can sign with it.
async fn mint(store: &dyn KeyValueStore, validity: Duration) -> Result<SigningKey> {
    let key = SigningKey::generate(validity)?;
    store
        .create(&key.kid, key.public_key().as_bytes().to_vec())
        .await
        .map_err(|e| Error::StoreUnavailable(format!("failed to store public key {}: {e}", key.kid)))?;
    Ok(key)
}
