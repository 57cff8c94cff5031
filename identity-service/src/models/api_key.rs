//! API key model - hashed tenant credentials for service callers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// API key entity. Only the hash of the plaintext key is stored.
#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyRecord {
    pub key_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub key_hash: String,
    pub permissions: Vec<String>,
    pub is_active: bool,
    pub expiry_utc: Option<DateTime<Utc>>,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl ApiKeyRecord {
    pub fn new(
        tenant_id: Uuid,
        name: String,
        key_hash: String,
        permissions: Vec<String>,
        expiry_utc: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            key_id: Uuid::new_v4(),
            tenant_id,
            name,
            key_hash,
            permissions,
            is_active: true,
            expiry_utc,
            last_used_utc: None,
            created_utc: Utc::now(),
        }
    }

    /// Active and not past its expiry at `now`.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expiry_utc.map_or(true, |exp| exp > now)
    }

    pub fn has_permissions(&self, required: &[String]) -> bool {
        required.iter().all(|p| self.permissions.contains(p))
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiKeyResponse {
    pub key_id: Uuid,
    pub name: String,
    pub permissions: Vec<String>,
    pub is_active: bool,
    pub expiry_utc: Option<DateTime<Utc>>,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl From<ApiKeyRecord> for ApiKeyResponse {
    fn from(k: ApiKeyRecord) -> Self {
        Self {
            key_id: k.key_id,
            name: k.name,
            permissions: k.permissions,
            is_active: k.is_active,
            expiry_utc: k.expiry_utc,
            last_used_utc: k.last_used_utc,
            created_utc: k.created_utc,
        }
    }
}

/// Returned once at creation; the plaintext key is not retrievable afterwards.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreatedApiKeyResponse {
    #[serde(flatten)]
    pub record: ApiKeyResponse,
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn expired_or_inactive_keys_are_unusable() {
        let now = Utc::now();
        let mut key = ApiKeyRecord::new(
            Uuid::new_v4(),
            "ci".to_string(),
            "hash".to_string(),
            vec![],
            Some(now + Duration::hours(1)),
        );
        assert!(key.is_usable_at(now));
        assert!(!key.is_usable_at(now + Duration::hours(2)));

        key.expiry_utc = None;
        key.is_active = false;
        assert!(!key.is_usable_at(now));
    }

    #[test]
    fn permission_check_requires_all() {
        let key = ApiKeyRecord::new(
            Uuid::new_v4(),
            "ci".to_string(),
            "hash".to_string(),
            vec!["users:read".to_string(), "users:write".to_string()],
            None,
        );
        assert!(key.has_permissions(&[]));
        assert!(key.has_permissions(&["users:read".to_string()]));
        assert!(!key.has_permissions(&["users:read".to_string(), "admin".to_string()]));
    }
}
