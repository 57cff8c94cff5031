//! Session token lifecycle: issue, rotate and revoke access/refresh pairs.
//!
//! Only a SHA-256 digest of the current refresh token is persisted, on the user
//! row. Issuing a pair overwrites it, so exactly one refresh token per user is
//! valid at a time. Two rotations racing with the same token both pass the
//! hash check and the last write wins; the loser's pair stops refreshing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::ServiceError;
use super::jwt::JwtService;
use crate::models::User;
use crate::repository::{TenantRepository, UserRepository};

/// Token response returned to client
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

pub fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn timestamp_to_utc(ts: i64) -> Result<DateTime<Utc>, ServiceError> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("Token expiry out of range")))
}

#[derive(Clone)]
pub struct TokenIssuer {
    jwt: JwtService,
    users: Arc<dyn UserRepository>,
    tenants: Arc<dyn TenantRepository>,
}

impl TokenIssuer {
    pub fn new(
        jwt: JwtService,
        users: Arc<dyn UserRepository>,
        tenants: Arc<dyn TenantRepository>,
    ) -> Self {
        Self {
            jwt,
            users,
            tenants,
        }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    /// Mint a pair for `user` and make its refresh token the only valid one.
    pub async fn issue(&self, user: &User) -> Result<TokenPair, ServiceError> {
        let access_token = self.jwt.generate_access_token(user)?;
        let refresh_token = self.jwt.generate_refresh_token(user.user_id)?;

        // Expiries come from the minted tokens themselves.
        let access_claims = self.jwt.validate_access_token(&access_token)?;
        let refresh_claims = self.jwt.validate_refresh_token(&refresh_token)?;

        self.users
            .set_refresh_hash(user.user_id, Some(&hash_refresh_token(&refresh_token)))
            .await
            .map_err(ServiceError::Storage)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            access_expires_at: timestamp_to_utc(access_claims.exp)?,
            refresh_expires_at: timestamp_to_utc(refresh_claims.exp)?,
        })
    }

    /// Exchange a refresh token for a new pair. Every failure looks the same to the caller.
    pub async fn rotate(&self, refresh_token: &str) -> Result<(User, TokenPair), ServiceError> {
        let user = self.check_refresh_token(refresh_token).await.map_err(|reason| {
            tracing::warn!(reason = %reason, "Refresh token rejected");
            ServiceError::invalid_refresh_token()
        })?;

        let pair = self.issue(&user).await?;
        Ok((user, pair))
    }

    async fn check_refresh_token(&self, refresh_token: &str) -> Result<User, anyhow::Error> {
        let claims = self.jwt.validate_refresh_token(refresh_token)?;
        let user_id = Uuid::parse_str(&claims.sub)?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("user not found"))?;

        if !user.is_active {
            return Err(anyhow::anyhow!("user inactive"));
        }

        if let Some(tenant_id) = user.tenant_id {
            let tenant = self
                .tenants
                .find_by_id(tenant_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("tenant not found"))?;
            if !tenant.is_active {
                return Err(anyhow::anyhow!("tenant inactive"));
            }
        }

        let stored = user
            .hashed_rt
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no active session"))?;
        let presented = hash_refresh_token(refresh_token);

        if !bool::from(stored.as_bytes().ct_eq(presented.as_bytes())) {
            return Err(anyhow::anyhow!("refresh token superseded"));
        }

        Ok(user)
    }

    /// Clear the stored refresh hash unconditionally.
    pub async fn revoke(&self, user_id: Uuid) -> Result<(), ServiceError> {
        self.users
            .set_refresh_hash(user_id, None)
            .await
            .map_err(ServiceError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::models::Tenant;
    use crate::repository::InMemoryStore;
    use secrecy::Secret;

    async fn setup() -> (TokenIssuer, Arc<InMemoryStore>, User) {
        let store = Arc::new(InMemoryStore::new());
        let jwt = JwtService::new(&JwtConfig {
            access_secret: Secret::new("a-secret".to_string()),
            refresh_secret: Secret::new("r-secret".to_string()),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        })
        .unwrap();
        let tenant = Tenant::new("Acme".to_string(), None);
        TenantRepository::insert(store.as_ref(), &tenant).await.unwrap();
        let user = User::new(tenant.tenant_id, "a@x.com", "hash".to_string());
        UserRepository::insert(store.as_ref(), &user).await.unwrap();

        let issuer = TokenIssuer::new(jwt, store.clone(), store.clone());
        (issuer, store, user)
    }

    #[tokio::test]
    async fn issue_persists_only_a_digest() {
        let (issuer, store, user) = setup().await;
        let pair = issuer.issue(&user).await.unwrap();

        let stored = UserRepository::find_by_id(store.as_ref(), user.user_id)
            .await
            .unwrap()
            .unwrap()
            .hashed_rt
            .unwrap();
        assert_ne!(stored, pair.refresh_token);
        assert_eq!(stored, hash_refresh_token(&pair.refresh_token));
        assert!(pair.refresh_expires_at > pair.access_expires_at);
    }

    #[tokio::test]
    async fn superseded_refresh_token_is_rejected() {
        let (issuer, _store, user) = setup().await;
        let first = issuer.issue(&user).await.unwrap();

        let (_, second) = issuer.rotate(&first.refresh_token).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);

        let err = issuer.rotate(&first.refresh_token).await.unwrap_err();
        assert!(matches!(err, ServiceError::Authentication(ref m) if m == "Invalid refresh token"));

        issuer.rotate(&second.refresh_token).await.unwrap();
    }

    #[tokio::test]
    async fn revoke_invalidates_current_token() {
        let (issuer, _store, user) = setup().await;
        let pair = issuer.issue(&user).await.unwrap();
        issuer.revoke(user.user_id).await.unwrap();
        assert!(issuer.rotate(&pair.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn suspended_tenant_blocks_rotation() {
        let (issuer, store, user) = setup().await;
        let pair = issuer.issue(&user).await.unwrap();

        let mut tenant = TenantRepository::find_by_id(store.as_ref(), user.tenant_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        tenant.is_active = false;
        TenantRepository::update(store.as_ref(), &tenant).await.unwrap();

        assert!(issuer.rotate(&pair.refresh_token).await.is_err());
    }
}
