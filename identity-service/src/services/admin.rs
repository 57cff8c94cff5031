//! Administrator sign-in for the console.
//!
//! A console session is an access token for an admin user. The browser holds
//! either the token itself or an opaque session id that maps to it in the cache
//! under `admin_session:{sid}` for as long as the token lives.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    models::{AuditAction, AuditEvent, User},
    repository::{TenantRepository, UserRepository},
    services::{
        audit::{emit, AuditSink},
        cache::CacheStore,
        jwt::JwtService,
        login_attempts::LoginAttemptTracker,
        ServiceError,
    },
    utils::{verify_password_blocking, Password},
};

#[derive(Debug, Clone)]
pub struct AdminSession {
    pub user: User,
    pub access_token: String,
    pub session_id: String,
    pub expires_in: i64,
}

fn session_key(session_id: &str) -> String {
    format!("admin_session:{}", session_id)
}

#[derive(Clone)]
pub struct AdminSessionService {
    tenants: Arc<dyn TenantRepository>,
    users: Arc<dyn UserRepository>,
    jwt: JwtService,
    cache: Arc<dyn CacheStore>,
    attempts: LoginAttemptTracker,
    audit: Arc<dyn AuditSink>,
}

impl AdminSessionService {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        users: Arc<dyn UserRepository>,
        jwt: JwtService,
        cache: Arc<dyn CacheStore>,
        attempts: LoginAttemptTracker,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            tenants,
            users,
            jwt,
            cache,
            attempts,
            audit,
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AdminSession, ServiceError> {
        let email = email.trim().to_lowercase();
        let identifier = format!("admin:{}", LoginAttemptTracker::identifier(&email, None));
        self.attempts.ensure_allowed(&identifier).await?;

        let candidates = self
            .users
            .find_all_by_email(&email)
            .await
            .map_err(ServiceError::Storage)?;

        let mut admin = None;
        for user in candidates.into_iter().filter(|u| u.is_admin() && u.is_active) {
            if verify_password_blocking(Password::new(password.to_string()), user.password_hash.clone())
                .await
                && self.tenant_is_active(&user).await?
            {
                admin = Some(user);
                break;
            }
        }

        let Some(user) = admin else {
            self.attempts.record_failure(&identifier).await;
            tracing::warn!("Admin login failed");
            emit(
                &self.audit,
                AuditEvent::new(AuditAction::AdminLogin, false)
                    .details(serde_json::json!({ "reason": "invalid_credentials" })),
            );
            return Err(ServiceError::invalid_credentials());
        };

        self.attempts.reset(&identifier).await;

        let access_token = self.jwt.generate_access_token(&user)?;
        let expires_in = self.jwt.access_token_expiry_seconds();
        let session_id = Uuid::new_v4().to_string();

        // Without the cache the console still works from the token cookie.
        if let Err(e) = self
            .cache
            .set_ex(&session_key(&session_id), &access_token, expires_in.max(1) as u64)
            .await
        {
            tracing::warn!(error = %e, "Failed to store admin session");
        }

        self.users
            .touch_last_login(user.user_id, Utc::now())
            .await
            .map_err(ServiceError::Storage)?;

        tracing::info!(user_id = %user.user_id, "Admin logged in");
        emit(
            &self.audit,
            AuditEvent::new(AuditAction::AdminLogin, true)
                .tenant(user.tenant_id)
                .actor(user.user_id),
        );

        Ok(AdminSession {
            user,
            access_token,
            session_id,
            expires_in,
        })
    }

    /// Token stored for a session id, if the session is still live.
    pub async fn session_token(&self, session_id: &str) -> Option<String> {
        match self.cache.get(&session_key(session_id)).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "Admin session lookup failed");
                None
            }
        }
    }

    /// Resolve an access token to an active admin.
    pub async fn authenticate(&self, token: &str) -> Result<User, ServiceError> {
        let claims = self
            .jwt
            .validate_access_token(token)
            .map_err(|_| ServiceError::Authentication("Invalid or expired token".to_string()))?;

        let user_id = claims
            .user_id()
            .ok_or_else(|| ServiceError::Authentication("Invalid token subject".to_string()))?;

        let user = self
            .users
            .find_by_id(user_id)
            .await
            .map_err(ServiceError::Storage)?
            .filter(|u| u.is_active)
            .ok_or_else(|| ServiceError::Authentication("User not found".to_string()))?;

        if !self.tenant_is_active(&user).await? {
            return Err(ServiceError::Authentication("Tenant is inactive".to_string()));
        }

        if !user.is_admin() {
            return Err(ServiceError::Forbidden("Admin access required".to_string()));
        }

        Ok(user)
    }

    /// Tenant-less system admins have no tenant to suspend.
    async fn tenant_is_active(&self, user: &User) -> Result<bool, ServiceError> {
        let Some(tenant_id) = user.tenant_id else {
            return Ok(true);
        };
        let tenant = self
            .tenants
            .find_by_id(tenant_id)
            .await
            .map_err(ServiceError::Storage)?;
        Ok(tenant.map_or(false, |t| t.is_active))
    }

    pub async fn logout(&self, session_id: Option<&str>) {
        if let Some(session_id) = session_id {
            if let Err(e) = self.cache.del(&session_key(session_id)).await {
                tracing::warn!(error = %e, "Failed to delete admin session");
            }
        }
    }
}
