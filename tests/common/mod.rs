//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use fabric_auth::store::{Entry, KeyValueStore, MemoryStore, StoreError};
use tokio::task::JoinHandle;

/// In-memory store whose backend can be switched off
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Entry, StoreError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.create(key, value).await
    }

    async fn update(&self, key: &str, value: Vec<u8>, expected_revision: u64) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.update(key, value, expected_revision).await
    }

    async fn get_revision(&self, key: &str, revision: u64) -> Result<Vec<u8>, StoreError> {
        self.check()?;
        self.inner.get_revision(key, revision).await
    }
}

/// Serve `router` on an ephemeral loopback port; returns the base URL.
pub async fn spawn_server(router: Router) -> (String, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), handle)
}

/// A loopback port that was free a moment ago
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
