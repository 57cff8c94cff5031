//! Ephemeral key-value store used for codes, counters and admin sessions.
//!
//! Every caller treats the cache as best-effort: an error here means "fall back
//! to durable storage" or "skip", never a failed request.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

// INCR and EXPIRE run as one script so a counter can never outlive its window.
const INCR_WITH_WINDOW: &str = r#"
local count = redis.call('INCR', KEYS[1])
if redis.call('TTL', KEYS[1]) < 0 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error>;
    /// Increment an integer counter, creating it at 1. A counter left without an
    /// expiry gets `ttl_seconds` in the same atomic step.
    async fn incr(&self, key: &str, ttl_seconds: u64) -> Result<i64, anyhow::Error>;
    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), anyhow::Error>;
    /// Remaining lifetime in seconds, `None` when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<u64>, anyhow::Error>;
    /// Returns whether the key existed. Only one of several concurrent callers sees `true`.
    async fn del(&self, key: &str) -> Result<bool, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisCache {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %config.url, "Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // Use ConnectionManager for automatic reconnection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get cache: {}", e))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache: {}", e))
    }

    async fn incr(&self, key: &str, ttl_seconds: u64) -> Result<i64, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::Script::new(INCR_WITH_WINDOW)
            .key(key)
            .arg(ttl_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to increment counter: {}", e))
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set expiry: {}", e))?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let ttl: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read ttl: {}", e))?;
        // -2: missing key, -1: no expiry
        Ok(u64::try_from(ttl).ok())
    }

    async fn del(&self, key: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete cache key: {}", e))?;
        Ok(removed > 0)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

struct MockEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MockEntry {
    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

/// In-process cache honoring TTLs. `set_unavailable(true)` makes every call fail.
#[derive(Default)]
pub struct MockCache {
    entries: Mutex<HashMap<String, MockEntry>>,
    unavailable: AtomicBool,
}

impl MockCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Drop the expiry of `key`, as Redis `PERSIST` does.
    pub fn persist(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = None;
            }
        }
    }

    /// Forget `key` as if its TTL had elapsed.
    pub fn expire_now(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, MockEntry>>, anyhow::Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock cache unavailable"));
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock cache mutex poisoned: {}", e))?;
        entries.retain(|_, entry| entry.is_live());
        Ok(entries)
    }
}

#[async_trait]
impl CacheStore for MockCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(self.guard()?.get(key).map(|e| e.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        self.guard()?.insert(
            key.to_string(),
            MockEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_seconds)),
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str, ttl_seconds: u64) -> Result<i64, anyhow::Error> {
        let mut entries = self.guard()?;
        let entry = entries.entry(key.to_string()).or_insert(MockEntry {
            value: "0".to_string(),
            expires_at: None,
        });
        let next = entry
            .value
            .parse::<i64>()
            .map_err(|e| anyhow::anyhow!("Value is not an integer: {}", e))?
            + 1;
        entry.value = next.to_string();
        if entry.expires_at.is_none() {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_seconds));
        }
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        if let Some(entry) = self.guard()?.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_seconds));
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, anyhow::Error> {
        Ok(self.guard()?.get(key).and_then(|entry| {
            entry
                .expires_at
                .map(|at| at.saturating_duration_since(Instant::now()).as_secs())
        }))
    }

    async fn del(&self, key: &str) -> Result<bool, anyhow::Error> {
        Ok(self.guard()?.remove(key).is_some())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.guard().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_creates_counter_with_window() {
        let cache = MockCache::new();
        assert_eq!(cache.incr("c", 900).await.unwrap(), 1);
        assert!(cache.ttl("c").await.unwrap().unwrap() > 890);

        // Later increments keep the original window.
        cache.expire("c", 30).await.unwrap();
        assert_eq!(cache.incr("c", 900).await.unwrap(), 2);
        assert!(cache.ttl("c").await.unwrap().unwrap() <= 30);

        // A counter that lost its expiry gets one back.
        cache.persist("c");
        assert_eq!(cache.incr("c", 900).await.unwrap(), 3);
        assert!(cache.ttl("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn outage_toggle_fails_every_call() {
        let cache = MockCache::new();
        cache.set_ex("k", "v", 60).await.unwrap();
        cache.set_unavailable(true);
        assert!(cache.get("k").await.is_err());
        assert!(cache.health_check().await.is_err());
        cache.set_unavailable(false);
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn zero_ttl_entry_is_gone() {
        let cache = MockCache::new();
        cache.set_ex("k", "v", 0).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
