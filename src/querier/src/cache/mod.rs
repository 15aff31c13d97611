//! Result caching.
//!
//! [`Cache`] is a byte store keyed by organisation and key; [`BucketCache`]
//! keeps per-query time buckets on top of it so a repeated query only has
//! to execute the parts of its window that are not cached yet.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

pub mod bucket;

pub use bucket::{BucketCache, CachedBucket, CachedData};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to encode cache payload: {0}")]
    Encode(String),

    #[error("failed to decode cache payload: {0}")]
    Decode(String),

    #[error("cache entry not found: {0}")]
    NotFound(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// A byte store with per-entry expiry.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, org_id: &str, key: &str) -> CacheResult<Vec<u8>>;

    async fn set(&self, org_id: &str, key: &str, payload: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    async fn delete(&self, org_id: &str, key: &str) -> CacheResult<()>;
}

#[derive(Debug, Clone)]
struct Entry {
    payload: Vec<u8>,
    expires_at: Instant,
}

/// Process-local [`Cache`].
///
/// With `max_entries` set, inserting into a full cache first drops expired
/// entries and then the entry closest to expiry.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<(String, String), Entry>>>,
    max_entries: usize,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Self::default()
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, org_id: &str, key: &str) -> CacheResult<Vec<u8>> {
        let entries = self.entries.read().await;
        match entries.get(&(org_id.to_string(), key.to_string())) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(entry.payload.clone()),
            _ => Err(CacheError::NotFound(key.to_string())),
        }
    }

    async fn set(&self, org_id: &str, key: &str, payload: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let now = Instant::now();
        let id = (org_id.to_string(), key.to_string());
        let mut entries = self.entries.write().await;

        if self.max_entries > 0 && !entries.contains_key(&id) && entries.len() >= self.max_entries {
            entries.retain(|_, entry| entry.expires_at > now);
            if entries.len() >= self.max_entries
                && let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(id, _)| id.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            id,
            Entry {
                payload,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, org_id: &str, key: &str) -> CacheResult<()> {
        self.entries
            .write()
            .await
            .remove(&(org_id.to_string(), key.to_string()));
        Ok(())
    }
}
