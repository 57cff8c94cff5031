//! Storage interfaces, one per entity.
//!
//! Services depend on these traits only. `Database` (PostgreSQL) backs them in
//! production and `InMemoryStore` backs them in tests and local runs.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    ApiKeyRecord, CodeChannel, CodePurpose, OAuthAccount, OAuthProviderKind, Tenant, User,
    VerificationCode,
};

pub use memory::InMemoryStore;
pub use postgres::Database;

/// Raised by `insert`/`update` when a uniqueness constraint would be broken.
#[derive(Debug, thiserror::Error)]
#[error("unique constraint violated: {0}")]
pub struct UniqueViolation(pub String);

/// True when a storage error came from a uniqueness constraint.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<UniqueViolation>().is_some()
}

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn find_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>, anyhow::Error>;
    async fn find_by_name(&self, name: &str) -> Result<Option<Tenant>, anyhow::Error>;
    async fn find_by_domain(&self, domain: &str) -> Result<Option<Tenant>, anyhow::Error>;
    async fn find_by_primary_key(&self, api_key: &str) -> Result<Option<Tenant>, anyhow::Error>;
    async fn list(&self) -> Result<Vec<Tenant>, anyhow::Error>;
    async fn insert(&self, tenant: &Tenant) -> Result<(), anyhow::Error>;
    async fn update(&self, tenant: &Tenant) -> Result<(), anyhow::Error>;
    /// Delete a tenant with its users, their linked accounts and its API keys, atomically.
    async fn delete_cascade(&self, tenant_id: Uuid) -> Result<bool, anyhow::Error>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, anyhow::Error>;
    /// Email comparison is case-insensitive.
    async fn find_by_tenant_and_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, anyhow::Error>;
    async fn find_by_tenant_and_username(
        &self,
        tenant_id: Uuid,
        username: &str,
    ) -> Result<Option<User>, anyhow::Error>;
    /// Every account with this email, across tenants, oldest first.
    async fn find_all_by_email(&self, email: &str) -> Result<Vec<User>, anyhow::Error>;
    async fn list_in_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>, anyhow::Error>;
    async fn insert(&self, user: &User) -> Result<(), anyhow::Error>;
    /// Returns false when no user has this id.
    async fn set_active(&self, user_id: Uuid, is_active: bool) -> Result<bool, anyhow::Error>;
    /// Overwrite (or clear) the stored refresh-token hash.
    async fn set_refresh_hash(
        &self,
        user_id: Uuid,
        hashed_rt: Option<&str>,
    ) -> Result<(), anyhow::Error>;
    /// Replace the password hash and clear the refresh-token hash when `revoke_sessions`.
    async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        revoke_sessions: bool,
    ) -> Result<(), anyhow::Error>;
    async fn touch_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), anyhow::Error>;
    async fn mark_verified(&self, user_id: Uuid) -> Result<(), anyhow::Error>;
    /// Delete a user and its linked accounts in one transaction.
    async fn delete_with_dependents(&self, user_id: Uuid) -> Result<bool, anyhow::Error>;
}

#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Active keys with no expiry or an expiry after `now`.
    async fn list_usable(&self, now: DateTime<Utc>) -> Result<Vec<ApiKeyRecord>, anyhow::Error>;
    async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<ApiKeyRecord>, anyhow::Error>;
    async fn insert(&self, key: &ApiKeyRecord) -> Result<(), anyhow::Error>;
    async fn touch_last_used(&self, key_id: Uuid, at: DateTime<Utc>) -> Result<(), anyhow::Error>;
    /// Delete only when the key belongs to `tenant_id`.
    async fn delete(&self, tenant_id: Uuid, key_id: Uuid) -> Result<bool, anyhow::Error>;
}

#[async_trait]
pub trait VerificationCodeRepository: Send + Sync {
    async fn insert(&self, code: &VerificationCode) -> Result<(), anyhow::Error>;
    async fn find_by_token(&self, token: &str) -> Result<Option<VerificationCode>, anyhow::Error>;
    /// Flag as used. Returns false when no record has this token.
    async fn mark_used(&self, token: &str) -> Result<bool, anyhow::Error>;
    async fn delete_by_token(&self, token: &str) -> Result<(), anyhow::Error>;
    async fn delete_for_target(
        &self,
        target: &str,
        channel: CodeChannel,
        purpose: CodePurpose,
    ) -> Result<u64, anyhow::Error>;
    /// One-time codes issued to `target` on `channel` at or after `since`.
    async fn count_issued_since(
        &self,
        target: &str,
        channel: CodeChannel,
        since: DateTime<Utc>,
    ) -> Result<i64, anyhow::Error>;
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error>;
}

#[async_trait]
pub trait OAuthAccountRepository: Send + Sync {
    async fn find_by_provider_id(
        &self,
        provider: OAuthProviderKind,
        provider_id: &str,
    ) -> Result<Option<OAuthAccount>, anyhow::Error>;
    async fn find_by_user_and_provider(
        &self,
        user_id: Uuid,
        provider: OAuthProviderKind,
    ) -> Result<Option<OAuthAccount>, anyhow::Error>;
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<OAuthAccount>, anyhow::Error>;
    async fn insert(&self, account: &OAuthAccount) -> Result<(), anyhow::Error>;
    async fn update(&self, account: &OAuthAccount) -> Result<(), anyhow::Error>;
    async fn delete(
        &self,
        user_id: Uuid,
        provider: OAuthProviderKind,
    ) -> Result<bool, anyhow::Error>;
}

#[async_trait]
pub trait StorageHealth: Send + Sync {
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// Every repository handle a service may need, backed by one store.
#[derive(Clone)]
pub struct Repositories {
    pub tenants: Arc<dyn TenantRepository>,
    pub users: Arc<dyn UserRepository>,
    pub api_keys: Arc<dyn ApiKeyRepository>,
    pub codes: Arc<dyn VerificationCodeRepository>,
    pub oauth_accounts: Arc<dyn OAuthAccountRepository>,
    pub health: Arc<dyn StorageHealth>,
}

impl Repositories {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: TenantRepository
            + UserRepository
            + ApiKeyRepository
            + VerificationCodeRepository
            + OAuthAccountRepository
            + StorageHealth
            + 'static,
    {
        Self {
            tenants: store.clone(),
            users: store.clone(),
            api_keys: store.clone(),
            codes: store.clone(),
            oauth_accounts: store.clone(),
            health: store,
        }
    }
}
