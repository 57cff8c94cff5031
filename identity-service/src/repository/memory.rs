//! In-process storage with the same uniqueness rules as the PostgreSQL schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    ApiKeyRepository, OAuthAccountRepository, StorageHealth, TenantRepository, UniqueViolation,
    UserRepository, VerificationCodeRepository,
};
use crate::models::{
    ApiKeyRecord, CodeChannel, CodePurpose, OAuthAccount, OAuthProviderKind, Tenant, User,
    VerificationCode,
};

#[derive(Default)]
struct Tables {
    tenants: HashMap<Uuid, Tenant>,
    users: HashMap<Uuid, User>,
    api_keys: HashMap<Uuid, ApiKeyRecord>,
    codes: HashMap<String, VerificationCode>,
    oauth_accounts: HashMap<Uuid, OAuthAccount>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, anyhow::Error> {
        self.tables
            .lock()
            .map_err(|e| anyhow::anyhow!("In-memory store mutex poisoned: {}", e))
    }
}

fn violation(constraint: &str) -> anyhow::Error {
    anyhow::Error::new(UniqueViolation(constraint.to_string()))
}

fn sorted_by_created<T, F>(mut items: Vec<T>, created: F) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    items.sort_by_key(|item| created(item));
    items
}

#[async_trait]
impl StorageHealth for InMemoryStore {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.lock().map(|_| ())
    }
}

#[async_trait]
impl TenantRepository for InMemoryStore {
    async fn find_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>, anyhow::Error> {
        Ok(self.lock()?.tenants.get(&tenant_id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Tenant>, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables
            .tenants
            .values()
            .filter(|t| t.name == name)
            .min_by_key(|t| t.created_utc)
            .cloned())
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Option<Tenant>, anyhow::Error> {
        let domain = domain.to_lowercase();
        let tables = self.lock()?;
        Ok(tables
            .tenants
            .values()
            .find(|t| t.domain.as_deref() == Some(domain.as_str()))
            .cloned())
    }

    async fn find_by_primary_key(&self, api_key: &str) -> Result<Option<Tenant>, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables
            .tenants
            .values()
            .find(|t| t.primary_api_key == api_key)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Tenant>, anyhow::Error> {
        let tenants = self.lock()?.tenants.values().cloned().collect();
        Ok(sorted_by_created(tenants, |t: &Tenant| t.created_utc))
    }

    async fn insert(&self, tenant: &Tenant) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        if tenant.domain.is_some()
            && tables.tenants.values().any(|t| t.domain == tenant.domain)
        {
            return Err(violation("tenants_domain_key"));
        }
        if tables
            .tenants
            .values()
            .any(|t| t.primary_api_key == tenant.primary_api_key)
        {
            return Err(violation("tenants_primary_api_key_key"));
        }
        tables.tenants.insert(tenant.tenant_id, tenant.clone());
        Ok(())
    }

    async fn update(&self, tenant: &Tenant) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        if tenant.domain.is_some()
            && tables
                .tenants
                .values()
                .any(|t| t.tenant_id != tenant.tenant_id && t.domain == tenant.domain)
        {
            return Err(violation("tenants_domain_key"));
        }
        if let Some(existing) = tables.tenants.get_mut(&tenant.tenant_id) {
            existing.name = tenant.name.clone();
            existing.domain = tenant.domain.clone();
            existing.is_active = tenant.is_active;
            existing.updated_utc = tenant.updated_utc;
        }
        Ok(())
    }

    async fn delete_cascade(&self, tenant_id: Uuid) -> Result<bool, anyhow::Error> {
        let mut tables = self.lock()?;
        let user_ids: Vec<Uuid> = tables
            .users
            .values()
            .filter(|u| u.tenant_id == Some(tenant_id))
            .map(|u| u.user_id)
            .collect();
        tables
            .oauth_accounts
            .retain(|_, a| !user_ids.contains(&a.user_id));
        tables.users.retain(|_, u| u.tenant_id != Some(tenant_id));
        tables.api_keys.retain(|_, k| k.tenant_id != tenant_id);
        Ok(tables.tenants.remove(&tenant_id).is_some())
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, anyhow::Error> {
        Ok(self.lock()?.users.get(&user_id).cloned())
    }

    async fn find_by_tenant_and_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, anyhow::Error> {
        let email = email.to_lowercase();
        let tables = self.lock()?;
        Ok(tables
            .users
            .values()
            .find(|u| u.tenant_id == Some(tenant_id) && u.email.to_lowercase() == email)
            .cloned())
    }

    async fn find_by_tenant_and_username(
        &self,
        tenant_id: Uuid,
        username: &str,
    ) -> Result<Option<User>, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables
            .users
            .values()
            .find(|u| u.tenant_id == Some(tenant_id) && u.username.as_deref() == Some(username))
            .cloned())
    }

    async fn find_all_by_email(&self, email: &str) -> Result<Vec<User>, anyhow::Error> {
        let email = email.to_lowercase();
        let users = self
            .lock()?
            .users
            .values()
            .filter(|u| u.email.to_lowercase() == email)
            .cloned()
            .collect();
        Ok(sorted_by_created(users, |u: &User| u.created_utc))
    }

    async fn list_in_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>, anyhow::Error> {
        let users = self
            .lock()?
            .users
            .values()
            .filter(|u| u.tenant_id == Some(tenant_id))
            .cloned()
            .collect();
        Ok(sorted_by_created(users, |u: &User| u.created_utc))
    }

    async fn insert(&self, user: &User) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        let email = user.email.to_lowercase();
        if tables
            .users
            .values()
            .any(|u| u.tenant_id == user.tenant_id && u.email.to_lowercase() == email)
        {
            return Err(violation("uq_users_tenant_email"));
        }
        if user.username.is_some()
            && tables
                .users
                .values()
                .any(|u| u.tenant_id == user.tenant_id && u.username == user.username)
        {
            return Err(violation("uq_users_tenant_username"));
        }
        tables.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn set_refresh_hash(
        &self,
        user_id: Uuid,
        hashed_rt: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        if let Some(user) = self.lock()?.users.get_mut(&user_id) {
            user.hashed_rt = hashed_rt.map(str::to_string);
            user.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        revoke_sessions: bool,
    ) -> Result<(), anyhow::Error> {
        if let Some(user) = self.lock()?.users.get_mut(&user_id) {
            user.password_hash = password_hash.to_string();
            if revoke_sessions {
                user.hashed_rt = None;
            }
            user.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn touch_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), anyhow::Error> {
        if let Some(user) = self.lock()?.users.get_mut(&user_id) {
            user.last_login_utc = Some(at);
        }
        Ok(())
    }

    async fn set_active(&self, user_id: Uuid, is_active: bool) -> Result<bool, anyhow::Error> {
        match self.lock()?.users.get_mut(&user_id) {
            Some(user) => {
                user.is_active = is_active;
                user.updated_utc = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_verified(&self, user_id: Uuid) -> Result<(), anyhow::Error> {
        if let Some(user) = self.lock()?.users.get_mut(&user_id) {
            user.is_verified = true;
            user.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn delete_with_dependents(&self, user_id: Uuid) -> Result<bool, anyhow::Error> {
        let mut tables = self.lock()?;
        tables.oauth_accounts.retain(|_, a| a.user_id != user_id);
        Ok(tables.users.remove(&user_id).is_some())
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryStore {
    async fn list_usable(&self, now: DateTime<Utc>) -> Result<Vec<ApiKeyRecord>, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables
            .api_keys
            .values()
            .filter(|k| k.is_usable_at(now))
            .cloned()
            .collect())
    }

    async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<ApiKeyRecord>, anyhow::Error> {
        let keys = self
            .lock()?
            .api_keys
            .values()
            .filter(|k| k.tenant_id == tenant_id)
            .cloned()
            .collect();
        Ok(sorted_by_created(keys, |k: &ApiKeyRecord| k.created_utc))
    }

    async fn insert(&self, key: &ApiKeyRecord) -> Result<(), anyhow::Error> {
        self.lock()?.api_keys.insert(key.key_id, key.clone());
        Ok(())
    }

    async fn touch_last_used(&self, key_id: Uuid, at: DateTime<Utc>) -> Result<(), anyhow::Error> {
        if let Some(key) = self.lock()?.api_keys.get_mut(&key_id) {
            key.last_used_utc = Some(at);
        }
        Ok(())
    }

    async fn delete(&self, tenant_id: Uuid, key_id: Uuid) -> Result<bool, anyhow::Error> {
        let mut tables = self.lock()?;
        match tables.api_keys.get(&key_id) {
            Some(key) if key.tenant_id == tenant_id => {
                tables.api_keys.remove(&key_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl VerificationCodeRepository for InMemoryStore {
    async fn insert(&self, code: &VerificationCode) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        if tables.codes.contains_key(&code.token) {
            return Err(violation("verification_codes_token_key"));
        }
        tables.codes.insert(code.token.clone(), code.clone());
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<VerificationCode>, anyhow::Error> {
        Ok(self.lock()?.codes.get(token).cloned())
    }

    async fn mark_used(&self, token: &str) -> Result<bool, anyhow::Error> {
        match self.lock()?.codes.get_mut(token) {
            Some(code) => {
                code.is_used = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_by_token(&self, token: &str) -> Result<(), anyhow::Error> {
        self.lock()?.codes.remove(token);
        Ok(())
    }

    async fn delete_for_target(
        &self,
        target: &str,
        channel: CodeChannel,
        purpose: CodePurpose,
    ) -> Result<u64, anyhow::Error> {
        let mut tables = self.lock()?;
        let before = tables.codes.len();
        tables.codes.retain(|_, c| {
            !(c.target == target
                && c.channel_code == channel.as_str()
                && c.purpose_code == purpose.as_str())
        });
        Ok((before - tables.codes.len()) as u64)
    }

    async fn count_issued_since(
        &self,
        target: &str,
        channel: CodeChannel,
        since: DateTime<Utc>,
    ) -> Result<i64, anyhow::Error> {
        let tables = self.lock()?;
        let count = tables
            .codes
            .values()
            .filter(|c| c.target == target && c.is_otp(channel) && c.created_utc >= since)
            .count();
        Ok(count as i64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error> {
        let mut tables = self.lock()?;
        let before = tables.codes.len();
        tables.codes.retain(|_, c| c.expiry_utc >= now);
        Ok((before - tables.codes.len()) as u64)
    }
}

#[async_trait]
impl OAuthAccountRepository for InMemoryStore {
    async fn find_by_provider_id(
        &self,
        provider: OAuthProviderKind,
        provider_id: &str,
    ) -> Result<Option<OAuthAccount>, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables
            .oauth_accounts
            .values()
            .find(|a| a.provider_code == provider.as_str() && a.provider_id == provider_id)
            .cloned())
    }

    async fn find_by_user_and_provider(
        &self,
        user_id: Uuid,
        provider: OAuthProviderKind,
    ) -> Result<Option<OAuthAccount>, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables
            .oauth_accounts
            .values()
            .find(|a| a.user_id == user_id && a.provider_code == provider.as_str())
            .cloned())
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<OAuthAccount>, anyhow::Error> {
        let accounts = self
            .lock()?
            .oauth_accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        Ok(sorted_by_created(accounts, |a: &OAuthAccount| a.created_utc))
    }

    async fn insert(&self, account: &OAuthAccount) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        if tables.oauth_accounts.values().any(|a| {
            a.provider_code == account.provider_code && a.provider_id == account.provider_id
        }) {
            return Err(violation("oauth_accounts_provider_code_provider_id_key"));
        }
        if tables
            .oauth_accounts
            .values()
            .any(|a| a.user_id == account.user_id && a.provider_code == account.provider_code)
        {
            return Err(violation("oauth_accounts_user_id_provider_code_key"));
        }
        tables
            .oauth_accounts
            .insert(account.account_id, account.clone());
        Ok(())
    }

    async fn update(&self, account: &OAuthAccount) -> Result<(), anyhow::Error> {
        if let Some(existing) = self.lock()?.oauth_accounts.get_mut(&account.account_id) {
            existing.username = account.username.clone();
            existing.avatar = account.avatar.clone();
            existing.access_token = account.access_token.clone();
            existing.refresh_token = account.refresh_token.clone();
            existing.last_login_utc = account.last_login_utc;
        }
        Ok(())
    }

    async fn delete(
        &self,
        user_id: Uuid,
        provider: OAuthProviderKind,
    ) -> Result<bool, anyhow::Error> {
        let mut tables = self.lock()?;
        let before = tables.oauth_accounts.len();
        tables
            .oauth_accounts
            .retain(|_, a| !(a.user_id == user_id && a.provider_code == provider.as_str()));
        Ok(tables.oauth_accounts.len() < before)
    }
}
