//! Generic cache collaborator.
//!
//! The core only requires the get/set/invalidate contract; any backend can
//! stand behind it. [`MemoryCache`] is the bundled in-process
//! implementation, useful for development, testing, and single-node runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Key/value cache with optional time-to-live.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a value, `None` when absent or expired.
    async fn get(&self, key: &str) -> Option<String>;

    /// Store a value; `ttl` of `None` keeps it until invalidated.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>);

    /// Drop a key.
    async fn invalidate(&self, key: &str);
}

struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-memory [`Cache`] implementation.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: drop the stale entry before reporting a miss.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(CacheEntry::is_expired) {
            entries.remove(key);
        }
        None
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        let entry = CacheEntry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}
