use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    dtos::auth::{LoginRequest, RegisterRequest, RegisterWithCodeRequest},
    models::{AuditAction, AuditEvent, CodeChannel, Tenant, User, DEFAULT_TENANT_NAME},
    repository::{is_unique_violation, TenantRepository, UserRepository},
    services::{
        audit::{emit, AuditSink},
        email::EmailProvider,
        login_attempts::LoginAttemptTracker,
        token::{TokenIssuer, TokenPair},
        verification::{IssuedCode, Redemption, VerificationCodeService},
        ServiceError,
    },
    utils::{check_strength, hash_password_blocking, verify_password_blocking, Password},
};

#[derive(Clone)]
pub struct AuthService {
    tenants: Arc<dyn TenantRepository>,
    users: Arc<dyn UserRepository>,
    tokens: TokenIssuer,
    attempts: LoginAttemptTracker,
    codes: VerificationCodeService,
    email: Arc<dyn EmailProvider>,
    audit: Arc<dyn AuditSink>,
}

fn ensure_strong(password: &str) -> Result<(), ServiceError> {
    let strength = check_strength(password);
    if strength.valid {
        Ok(())
    } else {
        Err(ServiceError::WeakPassword(strength.violations))
    }
}

async fn hash(password: &str) -> Result<String, ServiceError> {
    hash_password_blocking(Password::new(password.to_string()))
        .await
        .map(|h| h.into_string())
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Password hashing error: {}", e)))
}

impl AuthService {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        users: Arc<dyn UserRepository>,
        tokens: TokenIssuer,
        attempts: LoginAttemptTracker,
        codes: VerificationCodeService,
        email: Arc<dyn EmailProvider>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            tenants,
            users,
            tokens,
            attempts,
            codes,
            email,
            audit,
        }
    }

    async fn active_tenant(&self, tenant_id: Uuid) -> Result<Tenant, ServiceError> {
        self.tenants
            .find_by_id(tenant_id)
            .await
            .map_err(ServiceError::Storage)?
            .filter(|t| t.is_active)
            .ok_or_else(|| ServiceError::Tenant("Tenant not found or inactive".to_string()))
    }

    // ==== Registration ====

    pub async fn register(
        &self,
        req: RegisterRequest,
        tenant_id: Uuid,
    ) -> Result<(User, TokenPair), ServiceError> {
        let tenant = self.active_tenant(tenant_id).await?;
        let email = req.email.trim().to_lowercase();

        if self
            .users
            .find_by_tenant_and_email(tenant.tenant_id, &email)
            .await
            .map_err(ServiceError::Storage)?
            .is_some()
        {
            return Err(ServiceError::Conflict(
                "Email already registered in this tenant".to_string(),
            ));
        }

        let username = match req.username.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(username) => {
                if self.username_taken(tenant.tenant_id, username).await? {
                    return Err(ServiceError::Conflict(
                        "Username already taken in this tenant".to_string(),
                    ));
                }
                Some(username.to_string())
            }
            None => {
                // Default handle; dropped rather than failing when someone already has it.
                let fallback = format!("{}{}", req.last_name.trim(), req.first_name.trim());
                if fallback.is_empty() || self.username_taken(tenant.tenant_id, &fallback).await? {
                    None
                } else {
                    Some(fallback)
                }
            }
        };

        ensure_strong(&req.password)?;
        let password_hash = hash(&req.password).await?;

        let mut user = User::new(tenant.tenant_id, &email, password_hash);
        user.username = username;
        user.first_name = Some(req.first_name.trim().to_string());
        user.last_name = Some(req.last_name.trim().to_string());
        user.phone_number = req.phone_number;
        user.country = req.country;

        self.users.insert(&user).await.map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Conflict("User already exists in this tenant".to_string())
            } else {
                ServiceError::Storage(e)
            }
        })?;

        tracing::info!(user_id = %user.user_id, tenant_id = %tenant.tenant_id, "User registered");

        let pair = self.tokens.issue(&user).await?;

        emit(
            &self.audit,
            AuditEvent::new(AuditAction::UserRegistered, true)
                .tenant(user.tenant_id)
                .actor(user.user_id),
        );

        let first_name = user.first_name.clone().unwrap_or_default();
        if let Err(e) = self.email.send_welcome_email(&user.email, &first_name).await {
            tracing::warn!(error = %e, user_id = %user.user_id, "Failed to send welcome email");
        }

        Ok((user, pair))
    }

    async fn username_taken(&self, tenant_id: Uuid, username: &str) -> Result<bool, ServiceError> {
        Ok(self
            .users
            .find_by_tenant_and_username(tenant_id, username)
            .await
            .map_err(ServiceError::Storage)?
            .is_some())
    }

    /// Register with an email address proven by a previously sent code.
    pub async fn register_with_code(
        &self,
        req: RegisterWithCodeRequest,
        tenant_id: Uuid,
    ) -> Result<(User, TokenPair), ServiceError> {
        let redemption = self
            .codes
            .redeem(CodeChannel::Email, &req.verification_token, &req.verification_code)
            .await?;

        if !redemption.valid {
            return Err(ServiceError::Validation(
                "Invalid or expired verification code".to_string(),
            ));
        }

        let email = req.profile.email.trim().to_lowercase();
        if redemption.target.as_deref() != Some(email.as_str()) {
            return Err(ServiceError::Validation(
                "Email does not match the verification code".to_string(),
            ));
        }

        let (mut user, pair) = self.register(req.profile, tenant_id).await?;

        self.users
            .mark_verified(user.user_id)
            .await
            .map_err(ServiceError::Storage)?;
        user.is_verified = true;

        Ok((user, pair))
    }

    // ==== Login ====

    /// Password login. Without a tenant the default tenant is searched.
    pub async fn login(
        &self,
        req: &LoginRequest,
        tenant_id: Option<Uuid>,
    ) -> Result<(User, TokenPair), ServiceError> {
        let email = req.email.trim().to_lowercase();
        let identifier = LoginAttemptTracker::identifier(&email, tenant_id);

        self.attempts.ensure_allowed(&identifier).await?;

        let tenant = match tenant_id {
            Some(tenant_id) => self
                .tenants
                .find_by_id(tenant_id)
                .await
                .map_err(ServiceError::Storage)?,
            None => self
                .tenants
                .find_by_name(DEFAULT_TENANT_NAME)
                .await
                .map_err(ServiceError::Storage)?,
        };

        let user = match &tenant {
            Some(tenant) => self
                .users
                .find_by_tenant_and_email(tenant.tenant_id, &email)
                .await
                .map_err(ServiceError::Storage)?,
            None => None,
        };

        let (tenant, user) = match (tenant, user) {
            (Some(tenant), Some(user)) => (tenant, user),
            (tenant, _) => {
                self.attempts.record_failure(&identifier).await;
                tracing::warn!(tenant_id = ?tenant_id, "Login failed: unknown user");
                self.audit_login_failure(tenant.map(|t| t.tenant_id), "user_not_found");
                return Err(ServiceError::invalid_credentials());
            }
        };

        // Account state is only disclosed to callers holding the right password.
        let password_ok =
            verify_password_blocking(Password::new(req.password.clone()), user.password_hash.clone())
                .await;
        if !password_ok {
            self.attempts.record_failure(&identifier).await;
            tracing::warn!(user_id = %user.user_id, "Login failed: invalid password");
            self.audit_login_failure(Some(tenant.tenant_id), "invalid_password");
            return Err(ServiceError::invalid_credentials());
        }

        if !tenant.is_active {
            tracing::warn!(tenant_id = %tenant.tenant_id, "Login failed: tenant inactive");
            self.audit_login_failure(Some(tenant.tenant_id), "tenant_inactive");
            return Err(ServiceError::Tenant("Tenant is inactive".to_string()));
        }

        if !user.is_active {
            tracing::warn!(user_id = %user.user_id, "Login failed: user inactive");
            self.audit_login_failure(Some(tenant.tenant_id), "user_inactive");
            return Err(ServiceError::invalid_credentials());
        }

        self.attempts.reset(&identifier).await;

        self.users
            .touch_last_login(user.user_id, Utc::now())
            .await
            .map_err(ServiceError::Storage)?;

        let pair = self.tokens.issue(&user).await?;

        tracing::info!(user_id = %user.user_id, tenant_id = %tenant.tenant_id, "User logged in");
        emit(
            &self.audit,
            AuditEvent::new(AuditAction::LoginSucceeded, true)
                .tenant(user.tenant_id)
                .actor(user.user_id)
                .details(serde_json::json!({ "method": "password" })),
        );

        Ok((user, pair))
    }

    fn audit_login_failure(&self, tenant_id: Option<Uuid>, reason: &str) {
        emit(
            &self.audit,
            AuditEvent::new(AuditAction::LoginFailed, false)
                .tenant(tenant_id)
                .details(serde_json::json!({ "reason": reason })),
        );
    }

    // ==== Sessions ====

    pub async fn refresh(&self, refresh_token: &str) -> Result<(User, TokenPair), ServiceError> {
        let (user, pair) = self.tokens.rotate(refresh_token).await?;
        emit(
            &self.audit,
            AuditEvent::new(AuditAction::TokenRefreshed, true)
                .tenant(user.tenant_id)
                .actor(user.user_id),
        );
        Ok((user, pair))
    }

    pub async fn logout(&self, user_id: Uuid) -> Result<(), ServiceError> {
        self.tokens.revoke(user_id).await?;
        tracing::info!(user_id = %user_id, "User logged out");
        emit(
            &self.audit,
            AuditEvent::new(AuditAction::UserLoggedOut, true).actor(user_id),
        );
        Ok(())
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<User, ServiceError> {
        self.users
            .find_by_id(user_id)
            .await
            .map_err(ServiceError::Storage)?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))
    }

    // ==== Verification codes ====

    pub async fn send_email_code(&self, email: &str) -> Result<IssuedCode, ServiceError> {
        self.codes.issue(CodeChannel::Email, email).await
    }

    pub async fn verify_email_code(&self, token: &str, code: &str) -> Result<Redemption, ServiceError> {
        self.codes.redeem(CodeChannel::Email, token, code).await
    }

    pub async fn send_sms_code(&self, phone_number: &str) -> Result<IssuedCode, ServiceError> {
        self.codes.issue(CodeChannel::Sms, phone_number).await
    }

    pub async fn verify_sms_code(&self, token: &str, code: &str) -> Result<Redemption, ServiceError> {
        self.codes.redeem(CodeChannel::Sms, token, code).await
    }

    // ==== Passwords ====

    /// Always succeeds the same way whether or not the account exists.
    pub async fn request_password_reset(
        &self,
        email: &str,
        tenant_id: Uuid,
    ) -> Result<(), ServiceError> {
        let email = email.trim().to_lowercase();
        let user = self
            .users
            .find_by_tenant_and_email(tenant_id, &email)
            .await
            .map_err(ServiceError::Storage)?;

        let Some(user) = user else {
            tracing::info!(tenant_id = %tenant_id, "Password reset requested for unknown account");
            return Ok(());
        };

        self.codes.issue_password_reset(&email, Some(tenant_id)).await?;

        emit(
            &self.audit,
            AuditEvent::new(AuditAction::PasswordResetRequested, true)
                .tenant(user.tenant_id)
                .actor(user.user_id),
        );
        Ok(())
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), ServiceError> {
        let record = self.codes.verify_password_reset(token).await?;
        ensure_strong(new_password)?;

        let user = match record.tenant_id {
            Some(tenant_id) => self
                .users
                .find_by_tenant_and_email(tenant_id, &record.target)
                .await
                .map_err(ServiceError::Storage)?,
            None => self
                .users
                .find_all_by_email(&record.target)
                .await
                .map_err(ServiceError::Storage)?
                .into_iter()
                .next(),
        }
        .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;

        let password_hash = hash(new_password).await?;
        self.users
            .update_password(user.user_id, &password_hash, true)
            .await
            .map_err(ServiceError::Storage)?;

        self.codes.complete_password_reset(token).await?;

        tracing::info!(user_id = %user.user_id, "Password reset");
        emit(
            &self.audit,
            AuditEvent::new(AuditAction::PasswordReset, true)
                .tenant(user.tenant_id)
                .actor(user.user_id),
        );
        Ok(())
    }

    pub async fn change_password(
        &self,
        user_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), ServiceError> {
        let user = self.profile(user_id).await?;

        let old_ok =
            verify_password_blocking(Password::new(old_password.to_string()), user.password_hash.clone())
                .await;
        if !old_ok {
            return Err(ServiceError::Authentication(
                "Current password is incorrect".to_string(),
            ));
        }

        ensure_strong(new_password)?;
        let password_hash = hash(new_password).await?;
        self.users
            .update_password(user_id, &password_hash, false)
            .await
            .map_err(ServiceError::Storage)?;

        emit(
            &self.audit,
            AuditEvent::new(AuditAction::PasswordChanged, true)
                .tenant(user.tenant_id)
                .actor(user_id),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::repository::InMemoryStore;
    use crate::services::audit::MockAuditSink;
    use crate::services::cache::MockCache;
    use crate::services::email::{MockEmailService, SentEmailKind};
    use crate::services::jwt::JwtService;
    use crate::services::sms::MockSmsProvider;
    use crate::services::verification::VerificationSettings;
    use secrecy::Secret;

    struct Harness {
        auth: AuthService,
        store: Arc<InMemoryStore>,
        email: Arc<MockEmailService>,
        tenant: Tenant,
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(MockCache::new());
        let email = Arc::new(MockEmailService::new());
        let jwt = JwtService::new(&JwtConfig {
            access_secret: Secret::new("a-secret".to_string()),
            refresh_secret: Secret::new("r-secret".to_string()),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        })
        .unwrap();
        let tokens = TokenIssuer::new(jwt, store.clone(), store.clone());
        let codes = VerificationCodeService::new(
            cache.clone(),
            store.clone(),
            email.clone(),
            Arc::new(MockSmsProvider::new()),
            VerificationSettings {
                code_ttl_seconds: 600,
                reset_ttl_seconds: 3600,
                resend_interval_seconds: 60,
                frontend_url: "http://localhost:3000".to_string(),
            },
        );
        let auth = AuthService::new(
            store.clone(),
            store.clone(),
            tokens,
            LoginAttemptTracker::new(cache, 5, 900),
            codes,
            email.clone(),
            Arc::new(MockAuditSink::new()),
        );

        let tenant = Tenant::new("t1".to_string(), None);
        TenantRepository::insert(store.as_ref(), &tenant).await.unwrap();

        Harness {
            auth,
            store,
            email,
            tenant,
        }
    }

    fn registration(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: "Secure123!".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            username: None,
            phone_number: None,
            country: None,
        }
    }

    fn login(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn register_then_login_in_same_tenant() {
        let h = harness().await;
        let (user, _) = h.auth.register(registration("a@x.com"), h.tenant.tenant_id).await.unwrap();
        assert_eq!(user.username.as_deref(), Some("LovelaceAda"));
        assert!(!user.is_verified);

        let (logged_in, pair) = h
            .auth
            .login(&login("A@x.com", "Secure123!"), Some(h.tenant.tenant_id))
            .await
            .unwrap();
        assert_eq!(logged_in.user_id, user.user_id);

        let claims = h.auth.tokens.jwt().validate_access_token(&pair.access_token).unwrap();
        assert_eq!(claims.user_id(), Some(user.user_id));
        assert_eq!(h.email.last_payload(SentEmailKind::Welcome, "a@x.com").as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn duplicate_email_conflicts_within_tenant_only() {
        let h = harness().await;
        h.auth.register(registration("a@x.com"), h.tenant.tenant_id).await.unwrap();
        let err = h
            .auth
            .register(registration("A@X.com"), h.tenant.tenant_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let t2 = Tenant::new("t2".to_string(), None);
        TenantRepository::insert(h.store.as_ref(), &t2).await.unwrap();
        let (other, _) = h.auth.register(registration("a@x.com"), t2.tenant_id).await.unwrap();
        assert_eq!(other.tenant_id, Some(t2.tenant_id));
    }

    #[tokio::test]
    async fn weak_password_lists_violations() {
        let h = harness().await;
        let mut req = registration("a@x.com");
        req.password = "password".to_string();
        match h.auth.register(req, h.tenant.tenant_id).await.unwrap_err() {
            ServiceError::WeakPassword(violations) => assert!(violations.len() >= 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sixth_wrong_password_is_rate_limited() {
        let h = harness().await;
        h.auth.register(registration("a@x.com"), h.tenant.tenant_id).await.unwrap();

        for _ in 0..5 {
            let err = h
                .auth
                .login(&login("a@x.com", "Wrong123!"), Some(h.tenant.tenant_id))
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::Authentication(_)));
        }

        let err = h
            .auth
            .login(&login("a@x.com", "Wrong123!"), Some(h.tenant.tenant_id))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn suspended_tenant_cannot_log_in() {
        let h = harness().await;
        h.auth.register(registration("a@x.com"), h.tenant.tenant_id).await.unwrap();

        let mut tenant = h.tenant.clone();
        tenant.is_active = false;
        TenantRepository::update(h.store.as_ref(), &tenant).await.unwrap();

        let err = h
            .auth
            .login(&login("a@x.com", "Secure123!"), Some(h.tenant.tenant_id))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Tenant(_)));
    }

    #[tokio::test]
    async fn disabled_account_looks_like_bad_credentials() {
        let h = harness().await;
        let (user, _) = h.auth.register(registration("a@x.com"), h.tenant.tenant_id).await.unwrap();
        UserRepository::set_active(h.store.as_ref(), user.user_id, false).await.unwrap();

        let unknown = h
            .auth
            .login(&login("ghost@x.com", "Secure123!"), Some(h.tenant.tenant_id))
            .await
            .unwrap_err();
        let wrong = h
            .auth
            .login(&login("a@x.com", "Wrong123!"), Some(h.tenant.tenant_id))
            .await
            .unwrap_err();
        let right = h
            .auth
            .login(&login("a@x.com", "Secure123!"), Some(h.tenant.tenant_id))
            .await
            .unwrap_err();

        for err in [unknown, wrong, right] {
            assert!(matches!(err, ServiceError::Authentication(ref m) if m == "Invalid credentials"));
        }
    }

    #[tokio::test]
    async fn password_reset_flow() {
        let h = harness().await;
        let (user, pair) = h.auth.register(registration("a@x.com"), h.tenant.tenant_id).await.unwrap();

        // Unknown account gets the same answer and no mail.
        h.auth.request_password_reset("ghost@x.com", h.tenant.tenant_id).await.unwrap();
        assert!(h.email.last_payload(SentEmailKind::PasswordReset, "ghost@x.com").is_none());

        h.auth.request_password_reset("a@x.com", h.tenant.tenant_id).await.unwrap();
        let token = h.email.last_payload(SentEmailKind::PasswordReset, "a@x.com").unwrap();

        assert!(matches!(
            h.auth.reset_password(&token, "weak").await.unwrap_err(),
            ServiceError::WeakPassword(_)
        ));
        h.auth.reset_password(&token, "NewSecure123!").await.unwrap();

        // Sessions are revoked and the token is spent.
        assert!(h.auth.refresh(&pair.refresh_token).await.is_err());
        assert!(h.auth.reset_password(&token, "Another123!").await.is_err());

        let (again, _) = h
            .auth
            .login(&login("a@x.com", "NewSecure123!"), Some(h.tenant.tenant_id))
            .await
            .unwrap();
        assert_eq!(again.user_id, user.user_id);
    }

    #[tokio::test]
    async fn change_password_requires_current_one() {
        let h = harness().await;
        let (user, _) = h.auth.register(registration("a@x.com"), h.tenant.tenant_id).await.unwrap();

        assert!(matches!(
            h.auth
                .change_password(user.user_id, "Wrong123!", "NewSecure123!")
                .await
                .unwrap_err(),
            ServiceError::Authentication(_)
        ));
        h.auth
            .change_password(user.user_id, "Secure123!", "NewSecure123!")
            .await
            .unwrap();
        h.auth
            .login(&login("a@x.com", "NewSecure123!"), Some(h.tenant.tenant_id))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn register_with_code_marks_user_verified() {
        let h = harness().await;
        let issued = h.auth.send_email_code("a@x.com").await.unwrap();
        let code = h
            .email
            .last_payload(SentEmailKind::VerificationCode, "a@x.com")
            .unwrap();

        let (user, _) = h
            .auth
            .register_with_code(
                RegisterWithCodeRequest {
                    profile: registration("a@x.com"),
                    verification_token: issued.token,
                    verification_code: code,
                },
                h.tenant.tenant_id,
            )
            .await
            .unwrap();
        assert!(user.is_verified);
    }

    #[tokio::test]
    async fn register_with_code_for_other_email_fails() {
        let h = harness().await;
        let issued = h.auth.send_email_code("b@x.com").await.unwrap();
        let code = h
            .email
            .last_payload(SentEmailKind::VerificationCode, "b@x.com")
            .unwrap();

        let err = h
            .auth
            .register_with_code(
                RegisterWithCodeRequest {
                    profile: registration("a@x.com"),
                    verification_token: issued.token,
                    verification_code: code,
                },
                h.tenant.tenant_id,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn logout_revokes_refresh_token() {
        let h = harness().await;
        let (user, pair) = h.auth.register(registration("a@x.com"), h.tenant.tenant_id).await.unwrap();
        h.auth.logout(user.user_id).await.unwrap();
        assert!(matches!(
            h.auth.refresh(&pair.refresh_token).await.unwrap_err(),
            ServiceError::Authentication(_)
        ));
    }
}
