//! Access-token lifecycle tests
//!
//! Exercise issuance, verification and revocation across several issuer
//! instances sharing the same key-value buckets, the way replicas of one
//! service would.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FlakyStore;
use fabric_auth::Error;
use fabric_auth::store::{KeyValueStore, MemoryStore};
use fabric_auth::token::{AccessClaims, KID_MAX_LEN, KeyManager, TokenIssuer, peek_claims};

const ISSUER: &str = "https://fabric.test";
const HOUR: Duration = Duration::from_secs(3600);

struct Buckets {
    keys: Arc<dyn KeyValueStore>,
    revocations: Arc<dyn KeyValueStore>,
}

impl Buckets {
    fn new() -> Self {
        Self {
            keys: Arc::new(MemoryStore::new()),
            revocations: Arc::new(MemoryStore::new()),
        }
    }

    async fn issuer(&self, name: &str) -> TokenIssuer {
        let keys = KeyManager::new(Arc::clone(&self.keys)).await.unwrap();
        TokenIssuer::new(name, Arc::new(keys), Arc::clone(&self.revocations))
    }
}

async fn mint(issuer: &TokenIssuer, subject: &str, validity: Duration, audience: &[&str]) -> String {
    issuer
        .create_access_token(subject, validity, audience)
        .await
        .into_token()
        .expect("token should be issued")
}

/// Test that a token verifies and yields its subject
#[tokio::test]
async fn test_issue_and_verify() {
    let buckets = Buckets::new();
    let issuer = buckets.issuer(ISSUER).await;

    let token = mint(&issuer, "tenant-1234", HOUR, &[]).await;

    assert_eq!(issuer.verify_access_token(&token, "").await.unwrap(), "tenant-1234");
    assert_eq!(issuer.verify_access_token(&token, "orchestrator").await.unwrap(), "tenant-1234");

    let claims: AccessClaims = peek_claims(&token).unwrap();
    assert_eq!(claims.iss, ISSUER);
    assert!(claims.aud.is_empty());
}

/// Test that an empty subject is denied without a token
#[tokio::test]
async fn test_empty_subject_denied() {
    let buckets = Buckets::new();
    let issuer = buckets.issuer(ISSUER).await;

    let issuance = issuer.create_access_token::<&str>("", HOUR, &[]).await;

    assert!(issuance.is_denied());
    assert!(issuance.token().is_none());
}

/// Test audience scoping
#[tokio::test]
async fn test_audience_scoping() {
    let buckets = Buckets::new();
    let issuer = buckets.issuer(ISSUER).await;

    let token = mint(&issuer, "tenant-1234", HOUR, &["a"]).await;

    assert_eq!(issuer.verify_access_token(&token, "a").await.unwrap(), "tenant-1234");
    assert!(matches!(
        issuer.verify_access_token(&token, "").await,
        Err(Error::InvalidAudience(aud)) if aud.is_empty()
    ));
    assert!(matches!(
        issuer.verify_access_token(&token, "b").await,
        Err(Error::InvalidAudience(aud)) if aud == "b"
    ));
}

/// Test that a token issued by one replica verifies on another
#[tokio::test]
async fn test_verify_on_other_replica() {
    let buckets = Buckets::new();
    let first = buckets.issuer(ISSUER).await;
    let second = buckets.issuer(ISSUER).await;
    assert_ne!(first.key_manager().loaded_key().kid(), second.key_manager().loaded_key().kid());

    let token = mint(&first, "tenant-1234", HOUR, &[]).await;

    assert_eq!(second.verify_access_token(&token, "").await.unwrap(), "tenant-1234");
}

/// Test that tokens from another issuer are refused even with a shared key store
#[tokio::test]
async fn test_foreign_issuer_rejected() {
    let buckets = Buckets::new();
    let ours = buckets.issuer(ISSUER).await;
    let theirs = buckets.issuer("https://elsewhere.test").await;

    let token = mint(&theirs, "tenant-1234", HOUR, &[]).await;

    match ours.verify_access_token(&token, "").await {
        Err(Error::InvalidIssuer { expected, actual }) => {
            assert_eq!(expected, ISSUER);
            assert_eq!(actual, "https://elsewhere.test");
        }
        other => panic!("expected InvalidIssuer, got {other:?}"),
    }
}

/// Test that a token stops verifying once expired
#[tokio::test]
async fn test_token_expiry() {
    let buckets = Buckets::new();
    let issuer = buckets.issuer(ISSUER).await;

    let token = mint(&issuer, "tenant-1234", Duration::from_secs(1), &[]).await;
    assert!(issuer.verify_access_token(&token, "").await.is_ok());

    tokio::time::sleep(Duration::from_millis(2100)).await;

    let err = issuer.verify_access_token(&token, "").await.unwrap_err();
    assert!(matches!(err, Error::Expired));
    assert!(err.is_auth_failure());
}

/// Test revocation visible to every replica, and revoking twice
#[tokio::test]
async fn test_revocation() {
    let buckets = Buckets::new();
    let first = buckets.issuer(ISSUER).await;
    let second = buckets.issuer(ISSUER).await;

    let token = mint(&first, "tenant-1234", HOUR, &[]).await;
    // Ed25519 is deterministic; a different expiry keeps the tokens apart
    let other = mint(&first, "tenant-1234", 2 * HOUR, &[]).await;

    first.revoke(&token, "leaked in CI logs").await.unwrap();

    for issuer in [&first, &second] {
        assert!(matches!(
            issuer.verify_access_token(&token, "").await,
            Err(Error::Revoked(reason)) if reason == "leaked in CI logs"
        ));
    }
    assert!(matches!(second.revoke(&token, "again").await, Err(Error::AlreadyRevoked)));

    // Other tokens for the same subject are unaffected
    assert_eq!(second.verify_access_token(&other, "").await.unwrap(), "tenant-1234");
}

/// Test that only tokens this service would accept can be revoked
#[tokio::test]
async fn test_revoke_requires_valid_token() {
    let buckets = Buckets::new();
    let ours = buckets.issuer(ISSUER).await;
    let theirs = buckets.issuer("https://elsewhere.test").await;
    let foreign = mint(&theirs, "tenant-1234", HOUR, &[]).await;

    assert!(matches!(ours.revoke("not-a-token", "x").await, Err(Error::MalformedToken(_))));
    assert!(matches!(ours.revoke(&foreign, "x").await, Err(Error::InvalidIssuer { .. })));
}

/// Test that an unreachable revocation store fails closed
#[tokio::test]
async fn test_revocation_store_down_fails_closed() {
    let revocations = FlakyStore::new();
    let keys = KeyManager::new(Arc::new(MemoryStore::new())).await.unwrap();
    let issuer = TokenIssuer::new(ISSUER, Arc::new(keys), Arc::clone(&revocations) as Arc<dyn KeyValueStore>);

    let token = mint(&issuer, "tenant-1234", HOUR, &[]).await;
    revocations.set_down(true);

    let err = issuer.verify_access_token(&token, "").await.unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));
    assert!(err.is_retryable());
    assert!(!err.is_auth_failure());

    assert!(matches!(issuer.revoke(&token, "x").await, Err(Error::StoreUnavailable(_))));

    revocations.set_down(false);
    assert_eq!(issuer.verify_access_token(&token, "").await.unwrap(), "tenant-1234");
}

/// Test that an unreachable key store surfaces as an outage, not an unknown key
#[tokio::test]
async fn test_key_store_down_on_cold_lookup() {
    let keys = FlakyStore::new();
    let revocations: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let first = TokenIssuer::new(
        ISSUER,
        Arc::new(KeyManager::new(Arc::clone(&keys) as Arc<dyn KeyValueStore>).await.unwrap()),
        Arc::clone(&revocations),
    );
    let second = TokenIssuer::new(
        ISSUER,
        Arc::new(KeyManager::new(Arc::clone(&keys) as Arc<dyn KeyValueStore>).await.unwrap()),
        revocations,
    );

    let token = mint(&first, "tenant-1234", HOUR, &[]).await;
    keys.set_down(true);

    // The issuing replica answers from memory
    assert!(first.verify_access_token(&token, "").await.is_ok());
    // The other one has to read the store
    assert!(matches!(
        second.verify_access_token(&token, "").await,
        Err(Error::StoreUnavailable(_))
    ));
}

/// Test that a rotation race leaves one winner that both callers agree on
#[tokio::test]
async fn test_rotation_race() {
    let manager = KeyManager::new(Arc::new(MemoryStore::new())).await.unwrap();
    let old = manager.loaded_key();

    let winner = manager.rotate_key(&old).await.unwrap();
    let loser = manager.rotate_key(&old).await.unwrap();

    assert_ne!(winner.kid(), old.kid());
    assert!(Arc::ptr_eq(&winner, &loser));
    assert!(Arc::ptr_eq(&winner, &manager.loaded_key()));

    // Retired keys remain resolvable
    assert!(manager.get_public_key(old.kid()).await.is_some());
}

/// Test key lookup edge cases
#[tokio::test]
async fn test_public_key_lookup() {
    let manager = KeyManager::new(Arc::new(MemoryStore::new())).await.unwrap();
    let current = manager.loaded_key();

    let found = manager.get_public_key(current.kid()).await.unwrap();
    assert_eq!(found, current.public_key());

    assert!(manager.get_public_key("unknown-kid").await.is_none());
    assert!(manager.get_public_key(&"k".repeat(KID_MAX_LEN + 1)).await.is_none());
}
