//! Fixed-window login attempt counter kept in the cache.
//!
//! The window starts at the first failure. Cache outages degrade to "allowed"
//! rather than locking every user out.

use std::sync::Arc;
use uuid::Uuid;

use super::cache::CacheStore;
use super::error::ServiceError;

#[derive(Clone)]
pub struct LoginAttemptTracker {
    cache: Arc<dyn CacheStore>,
    max_attempts: i64,
    window_seconds: u64,
}

impl LoginAttemptTracker {
    pub fn new(cache: Arc<dyn CacheStore>, max_attempts: i64, window_seconds: u64) -> Self {
        Self {
            cache,
            max_attempts,
            window_seconds,
        }
    }

    /// Identifier the counter is keyed by: lowercased email plus the tenant.
    pub fn identifier(email: &str, tenant_id: Option<Uuid>) -> String {
        let tenant = tenant_id
            .map(|t| t.to_string())
            .unwrap_or_else(|| "default".to_string());
        format!("{}:{}", email.trim().to_lowercase(), tenant)
    }

    fn key(identifier: &str) -> String {
        format!("login_attempts:{}", identifier)
    }

    /// Reject when the identifier already reached the threshold in the current window.
    pub async fn ensure_allowed(&self, identifier: &str) -> Result<(), ServiceError> {
        let key = Self::key(identifier);
        let count = match self.cache.get(&key).await {
            Ok(value) => value.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0),
            Err(e) => {
                tracing::warn!(error = %e, "Login attempt counter unavailable, allowing attempt");
                return Ok(());
            }
        };

        if count >= self.max_attempts {
            let retry_after = match self.cache.ttl(&key).await {
                Ok(Some(remaining)) => remaining,
                Ok(None) => {
                    // A counter without an expiry would block forever; restart its window.
                    if let Err(e) = self.cache.expire(&key, self.window_seconds).await {
                        tracing::warn!(error = %e, "Failed to restore login attempt window");
                    }
                    self.window_seconds
                }
                Err(_) => self.window_seconds,
            };
            tracing::warn!(identifier = %identifier, count, "Login blocked by attempt limit");
            return Err(ServiceError::RateLimited {
                message: "Too many login attempts. Please try again later.".to_string(),
                retry_after: Some(retry_after),
            });
        }

        Ok(())
    }

    pub async fn record_failure(&self, identifier: &str) {
        if let Err(e) = self
            .cache
            .incr(&Self::key(identifier), self.window_seconds)
            .await
        {
            tracing::warn!(error = %e, "Failed to record login failure");
        }
    }

    pub async fn reset(&self, identifier: &str) {
        if let Err(e) = self.cache.del(&Self::key(identifier)).await {
            tracing::warn!(error = %e, "Failed to reset login attempts");
        }
    }
}
