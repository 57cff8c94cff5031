//! Tenant model - root of multi-tenancy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Name of the tenant used when a flow has no explicit tenant.
pub const DEFAULT_TENANT_NAME: &str = "Default";

/// Name of the tenant holding the bootstrap console administrator.
pub const SYSTEM_TENANT_NAME: &str = "System";

/// Tenant entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub name: String,
    /// Globally unique when present.
    pub domain: Option<String>,
    /// Primary opaque access credential, issued at creation.
    pub primary_api_key: String,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Tenant {
    /// Create a new active tenant with a fresh primary credential.
    pub fn new(name: String, domain: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: Uuid::new_v4(),
            name,
            domain: domain.map(|d| d.trim().to_lowercase()).filter(|d| !d.is_empty()),
            primary_api_key: Uuid::new_v4().to_string(),
            is_active: true,
            created_utc: now,
            updated_utc: now,
        }
    }
}

/// Tenant response for API.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TenantResponse {
    pub tenant_id: Uuid,
    pub name: String,
    pub domain: Option<String>,
    /// Primary credential; withheld from callers holding only a secondary key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl From<Tenant> for TenantResponse {
    fn from(t: Tenant) -> Self {
        Self {
            tenant_id: t.tenant_id,
            name: t.name,
            domain: t.domain,
            api_key: Some(t.primary_api_key),
            is_active: t.is_active,
            created_utc: t.created_utc,
            updated_utc: t.updated_utc,
        }
    }
}

impl TenantResponse {
    pub fn without_credential(mut self) -> Self {
        self.api_key = None;
        self
    }
}
