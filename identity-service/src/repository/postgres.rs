//! PostgreSQL storage for identity-service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use super::{
    ApiKeyRepository, OAuthAccountRepository, StorageHealth, TenantRepository, UniqueViolation,
    UserRepository, VerificationCodeRepository,
};
use crate::models::{
    ApiKeyRecord, CodeChannel, CodePurpose, OAuthAccount, OAuthProviderKind, Tenant, User,
    VerificationCode,
};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a sqlx error, keeping uniqueness violations recognizable to callers.
fn db_err(e: sqlx::Error) -> anyhow::Error {
    if let sqlx::Error::Database(ref db) = e {
        if db.is_unique_violation() {
            let constraint = db.constraint().unwrap_or("unknown").to_string();
            return anyhow::Error::new(UniqueViolation(constraint));
        }
    }
    anyhow::Error::new(e)
}

#[async_trait]
impl StorageHealth for Database {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                db_err(e)
            })?;
        Ok(())
    }
}

// ==================== Tenant Operations ====================

#[async_trait]
impl TenantRepository for Database {
    async fn find_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>, anyhow::Error> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Tenant>, anyhow::Error> {
        sqlx::query_as::<_, Tenant>(
            "SELECT * FROM tenants WHERE name = $1 ORDER BY created_utc LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Option<Tenant>, anyhow::Error> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE domain = LOWER($1)")
            .bind(domain)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_by_primary_key(&self, api_key: &str) -> Result<Option<Tenant>, anyhow::Error> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE primary_api_key = $1")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn list(&self) -> Result<Vec<Tenant>, anyhow::Error> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants ORDER BY created_utc")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn insert(&self, tenant: &Tenant) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO tenants (tenant_id, name, domain, primary_api_key, is_active, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(tenant.tenant_id)
        .bind(&tenant.name)
        .bind(&tenant.domain)
        .bind(&tenant.primary_api_key)
        .bind(tenant.is_active)
        .bind(tenant.created_utc)
        .bind(tenant.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update(&self, tenant: &Tenant) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            UPDATE tenants SET name = $2, domain = $3, is_active = $4, updated_utc = $5
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant.tenant_id)
        .bind(&tenant.name)
        .bind(&tenant.domain)
        .bind(tenant.is_active)
        .bind(tenant.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_cascade(&self, tenant_id: Uuid) -> Result<bool, anyhow::Error> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "DELETE FROM oauth_accounts WHERE user_id IN (SELECT user_id FROM users WHERE tenant_id = $1)",
        )
        .bind(tenant_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM users WHERE tenant_id = $1")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query("DELETE FROM api_keys WHERE tenant_id = $1")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let result = sqlx::query("DELETE FROM tenants WHERE tenant_id = $1")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}

// ==================== User Operations ====================

#[async_trait]
impl UserRepository for Database {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, anyhow::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_by_tenant_and_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, anyhow::Error> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE tenant_id = $1 AND LOWER(email) = LOWER($2)",
        )
        .bind(tenant_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_by_tenant_and_username(
        &self,
        tenant_id: Uuid,
        username: &str,
    ) -> Result<Option<User>, anyhow::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE tenant_id = $1 AND username = $2")
            .bind(tenant_id)
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_all_by_email(&self, email: &str) -> Result<Vec<User>, anyhow::Error> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE LOWER(email) = LOWER($1) ORDER BY created_utc",
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn insert(&self, user: &User) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO users (
                user_id, tenant_id, email, username, password_hash, first_name, last_name,
                phone_number, country, role_code, permissions, is_active, is_verified,
                is_system_admin, hashed_rt, last_login_utc, created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(user.user_id)
        .bind(user.tenant_id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone_number)
        .bind(&user.country)
        .bind(&user.role_code)
        .bind(&user.permissions)
        .bind(user.is_active)
        .bind(user.is_verified)
        .bind(user.is_system_admin)
        .bind(&user.hashed_rt)
        .bind(user.last_login_utc)
        .bind(user.created_utc)
        .bind(user.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_refresh_hash(
        &self,
        user_id: Uuid,
        hashed_rt: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE users SET hashed_rt = $2, updated_utc = NOW() WHERE user_id = $1")
            .bind(user_id)
            .bind(hashed_rt)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        revoke_sessions: bool,
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2,
                hashed_rt = CASE WHEN $3 THEN NULL ELSE hashed_rt END,
                updated_utc = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(password_hash)
        .bind(revoke_sessions)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn touch_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE users SET last_login_utc = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_in_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>, anyhow::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE tenant_id = $1 ORDER BY created_utc")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn set_active(&self, user_id: Uuid, is_active: bool) -> Result<bool, anyhow::Error> {
        let result =
            sqlx::query("UPDATE users SET is_active = $2, updated_utc = NOW() WHERE user_id = $1")
                .bind(user_id)
                .bind(is_active)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_verified(&self, user_id: Uuid) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE users SET is_verified = TRUE, updated_utc = NOW() WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_with_dependents(&self, user_id: Uuid) -> Result<bool, anyhow::Error> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM oauth_accounts WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let result = sqlx::query("DELETE FROM users WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}

// ==================== API Key Operations ====================

#[async_trait]
impl ApiKeyRepository for Database {
    async fn list_usable(&self, now: DateTime<Utc>) -> Result<Vec<ApiKeyRecord>, anyhow::Error> {
        sqlx::query_as::<_, ApiKeyRecord>(
            r#"
            SELECT * FROM api_keys
            WHERE is_active = TRUE AND (expiry_utc IS NULL OR expiry_utc > $1)
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<ApiKeyRecord>, anyhow::Error> {
        sqlx::query_as::<_, ApiKeyRecord>(
            "SELECT * FROM api_keys WHERE tenant_id = $1 ORDER BY created_utc",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn insert(&self, key: &ApiKeyRecord) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (key_id, tenant_id, name, key_hash, permissions, is_active, expiry_utc, last_used_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(key.key_id)
        .bind(key.tenant_id)
        .bind(&key.name)
        .bind(&key.key_hash)
        .bind(&key.permissions)
        .bind(key.is_active)
        .bind(key.expiry_utc)
        .bind(key.last_used_utc)
        .bind(key.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn touch_last_used(&self, key_id: Uuid, at: DateTime<Utc>) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE api_keys SET last_used_utc = $2 WHERE key_id = $1")
            .bind(key_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete(&self, tenant_id: Uuid, key_id: Uuid) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("DELETE FROM api_keys WHERE key_id = $1 AND tenant_id = $2")
            .bind(key_id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}

// ==================== Verification Code Operations ====================

#[async_trait]
impl VerificationCodeRepository for Database {
    async fn insert(&self, code: &VerificationCode) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO verification_codes (code_id, channel_code, purpose_code, target, code, token, tenant_id, is_used, expiry_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(code.code_id)
        .bind(&code.channel_code)
        .bind(&code.purpose_code)
        .bind(&code.target)
        .bind(&code.code)
        .bind(&code.token)
        .bind(code.tenant_id)
        .bind(code.is_used)
        .bind(code.expiry_utc)
        .bind(code.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<VerificationCode>, anyhow::Error> {
        sqlx::query_as::<_, VerificationCode>("SELECT * FROM verification_codes WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn mark_used(&self, token: &str) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("UPDATE verification_codes SET is_used = TRUE WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_token(&self, token: &str) -> Result<(), anyhow::Error> {
        sqlx::query("DELETE FROM verification_codes WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_for_target(
        &self,
        target: &str,
        channel: CodeChannel,
        purpose: CodePurpose,
    ) -> Result<u64, anyhow::Error> {
        let result = sqlx::query(
            "DELETE FROM verification_codes WHERE target = $1 AND channel_code = $2 AND purpose_code = $3",
        )
        .bind(target)
        .bind(channel.as_str())
        .bind(purpose.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn count_issued_since(
        &self,
        target: &str,
        channel: CodeChannel,
        since: DateTime<Utc>,
    ) -> Result<i64, anyhow::Error> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM verification_codes
            WHERE target = $1 AND channel_code = $2 AND purpose_code = $3 AND created_utc >= $4
            "#,
        )
        .bind(target)
        .bind(channel.as_str())
        .bind(CodePurpose::Otp.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(count.0)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error> {
        let result = sqlx::query("DELETE FROM verification_codes WHERE expiry_utc < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

// ==================== OAuth Account Operations ====================

#[async_trait]
impl OAuthAccountRepository for Database {
    async fn find_by_provider_id(
        &self,
        provider: OAuthProviderKind,
        provider_id: &str,
    ) -> Result<Option<OAuthAccount>, anyhow::Error> {
        sqlx::query_as::<_, OAuthAccount>(
            "SELECT * FROM oauth_accounts WHERE provider_code = $1 AND provider_id = $2",
        )
        .bind(provider.as_str())
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_by_user_and_provider(
        &self,
        user_id: Uuid,
        provider: OAuthProviderKind,
    ) -> Result<Option<OAuthAccount>, anyhow::Error> {
        sqlx::query_as::<_, OAuthAccount>(
            "SELECT * FROM oauth_accounts WHERE user_id = $1 AND provider_code = $2",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<OAuthAccount>, anyhow::Error> {
        sqlx::query_as::<_, OAuthAccount>(
            "SELECT * FROM oauth_accounts WHERE user_id = $1 ORDER BY created_utc",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn insert(&self, account: &OAuthAccount) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO oauth_accounts (account_id, user_id, provider_code, provider_id, username, avatar, access_token, refresh_token, last_login_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(account.account_id)
        .bind(account.user_id)
        .bind(&account.provider_code)
        .bind(&account.provider_id)
        .bind(&account.username)
        .bind(&account.avatar)
        .bind(&account.access_token)
        .bind(&account.refresh_token)
        .bind(account.last_login_utc)
        .bind(account.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update(&self, account: &OAuthAccount) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            UPDATE oauth_accounts
            SET username = $2, avatar = $3, access_token = $4, refresh_token = $5, last_login_utc = $6
            WHERE account_id = $1
            "#,
        )
        .bind(account.account_id)
        .bind(&account.username)
        .bind(&account.avatar)
        .bind(&account.access_token)
        .bind(&account.refresh_token)
        .bind(account.last_login_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete(
        &self,
        user_id: Uuid,
        provider: OAuthProviderKind,
    ) -> Result<bool, anyhow::Error> {
        let result =
            sqlx::query("DELETE FROM oauth_accounts WHERE user_id = $1 AND provider_code = $2")
                .bind(user_id)
                .bind(provider.as_str())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
