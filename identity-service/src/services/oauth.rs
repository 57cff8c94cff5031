//! Third-party sign-in: provider code exchange and reconciliation of provider
//! identities with local accounts.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::audit::{emit, AuditSink};
use super::error::ServiceError;
use super::tenant::get_or_create_default_tenant;
use super::token::{TokenIssuer, TokenPair};
use crate::config::OAuthConfig;
use crate::models::{
    AuditAction, AuditEvent, OAuthAccount, OAuthAccountResponse, OAuthIdentity, OAuthProviderKind,
    Tenant, User,
};
use crate::repository::{is_unique_violation, OAuthAccountRepository, TenantRepository, UserRepository};
use crate::utils::{generate_random_password, hash_password_blocking, Password};

/// Exchanges an authorization code for the identity it grants.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    async fn exchange_code(
        &self,
        provider: OAuthProviderKind,
        code: &str,
    ) -> Result<OAuthIdentity, anyhow::Error>;
}

pub fn callback_url(public_base_url: &str, provider: OAuthProviderKind) -> String {
    format!(
        "{}/auth/oauth/{}/callback",
        public_base_url.trim_end_matches('/'),
        provider.as_str()
    )
}

// ============================================================================
// HTTP client
// ============================================================================

#[derive(Debug, Deserialize)]
struct ProviderTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

/// Talks to GitHub and Google over their OAuth 2.0 endpoints.
pub struct HttpOAuthClient {
    config: OAuthConfig,
    client: Client,
}

impl HttpOAuthClient {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    async fn request_token(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<ProviderTokenResponse, anyhow::Error> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to contact provider: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, error = %body, "OAuth token exchange failed");
            return Err(anyhow::anyhow!("Token exchange failed with status {}", status));
        }

        response
            .json::<ProviderTokenResponse>()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse token response: {}", e))
    }

    async fn github_identity(&self, code: &str) -> Result<OAuthIdentity, anyhow::Error> {
        let redirect_uri = callback_url(&self.config.public_base_url, OAuthProviderKind::Github);
        let tokens = self
            .request_token(
                "https://github.com/login/oauth/access_token",
                &[
                    ("client_id", self.config.github.client_id.as_str()),
                    ("client_secret", self.config.github.client_secret.expose_secret().as_str()),
                    ("code", code),
                    ("redirect_uri", redirect_uri.as_str()),
                ],
            )
            .await?;

        let user: GithubUser = self
            .client
            .get("https://api.github.com/user")
            .bearer_auth(&tokens.access_token)
            .header(reqwest::header::USER_AGENT, "identity-service")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // The profile email is empty when the user keeps it private.
        let email = match user.email {
            Some(email) => email,
            None => {
                let emails: Vec<GithubEmail> = self
                    .client
                    .get("https://api.github.com/user/emails")
                    .bearer_auth(&tokens.access_token)
                    .header(reqwest::header::USER_AGENT, "identity-service")
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                emails
                    .into_iter()
                    .find(|e| e.primary && e.verified)
                    .map(|e| e.email)
                    .ok_or_else(|| anyhow::anyhow!("GitHub account has no verified primary email"))?
            }
        };

        let (first_name, last_name) = match user.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => match name.split_once(' ') {
                Some((first, last)) => (Some(first.to_string()), Some(last.trim().to_string())),
                None => (Some(name.to_string()), None),
            },
            _ => (None, None),
        };

        Ok(OAuthIdentity {
            provider: OAuthProviderKind::Github,
            provider_id: user.id.to_string(),
            email,
            username: Some(user.login),
            first_name,
            last_name,
            avatar: user.avatar_url,
            access_token: Some(tokens.access_token),
            refresh_token: tokens.refresh_token,
        })
    }

    async fn google_identity(&self, code: &str) -> Result<OAuthIdentity, anyhow::Error> {
        let redirect_uri = callback_url(&self.config.public_base_url, OAuthProviderKind::Google);
        let tokens = self
            .request_token(
                "https://oauth2.googleapis.com/token",
                &[
                    ("code", code),
                    ("client_id", self.config.google.client_id.as_str()),
                    ("client_secret", self.config.google.client_secret.expose_secret().as_str()),
                    ("redirect_uri", redirect_uri.as_str()),
                    ("grant_type", "authorization_code"),
                ],
            )
            .await?;

        let info: GoogleUserInfo = self
            .client
            .get("https://www.googleapis.com/oauth2/v3/userinfo")
            .bearer_auth(&tokens.access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let email = info
            .email
            .ok_or_else(|| anyhow::anyhow!("Email not provided by Google"))?;
        let username = email.split('@').next().map(str::to_string);

        Ok(OAuthIdentity {
            provider: OAuthProviderKind::Google,
            provider_id: info.sub,
            email,
            username,
            first_name: info.given_name,
            last_name: info.family_name,
            avatar: info.picture,
            access_token: Some(tokens.access_token),
            refresh_token: tokens.refresh_token,
        })
    }
}

#[async_trait]
impl OAuthProvider for HttpOAuthClient {
    async fn exchange_code(
        &self,
        provider: OAuthProviderKind,
        code: &str,
    ) -> Result<OAuthIdentity, anyhow::Error> {
        match provider {
            OAuthProviderKind::Github => self.github_identity(code).await,
            OAuthProviderKind::Google => self.google_identity(code).await,
        }
    }
}

/// Resolves codes registered up front with `register`.
#[derive(Default)]
pub struct MockOAuthProvider {
    identities: Mutex<HashMap<String, OAuthIdentity>>,
}

impl MockOAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, code: &str, identity: OAuthIdentity) {
        if let Ok(mut identities) = self.identities.lock() {
            identities.insert(code.to_string(), identity);
        }
    }
}

#[async_trait]
impl OAuthProvider for MockOAuthProvider {
    async fn exchange_code(
        &self,
        provider: OAuthProviderKind,
        code: &str,
    ) -> Result<OAuthIdentity, anyhow::Error> {
        let identities = self
            .identities
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock OAuth mutex poisoned: {}", e))?;
        identities
            .get(code)
            .filter(|identity| identity.provider == provider)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unknown authorization code"))
    }
}

// ============================================================================
// Linking
// ============================================================================

/// Decoded `state` round-tripped through the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthState {
    pub tenant_id: Option<Uuid>,
    pub timestamp: i64,
}

pub fn generate_state(tenant_id: Option<Uuid>) -> String {
    let timestamp = Utc::now().timestamp_millis();
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(13)
        .map(char::from)
        .collect();
    let raw = match tenant_id {
        Some(tenant_id) => format!("{}:{}:{}", tenant_id, timestamp, random),
        None => format!("{}:{}", timestamp, random),
    };
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

pub fn parse_state(state: &str) -> Result<OAuthState, ServiceError> {
    let invalid = || ServiceError::Validation("Invalid state parameter".to_string());

    let bytes = URL_SAFE_NO_PAD.decode(state.trim()).map_err(|_| invalid())?;
    let decoded = String::from_utf8(bytes).map_err(|_| invalid())?;
    let parts: Vec<&str> = decoded.split(':').collect();

    match parts.as_slice() {
        [tenant, timestamp, _] => Ok(OAuthState {
            tenant_id: Some(Uuid::parse_str(tenant).map_err(|_| invalid())?),
            timestamp: timestamp.parse().map_err(|_| invalid())?,
        }),
        [timestamp, _] => Ok(OAuthState {
            tenant_id: None,
            timestamp: timestamp.parse().map_err(|_| invalid())?,
        }),
        _ => Err(invalid()),
    }
}

#[derive(Clone)]
pub struct OAuthLinker {
    tenants: Arc<dyn TenantRepository>,
    users: Arc<dyn UserRepository>,
    accounts: Arc<dyn OAuthAccountRepository>,
    tokens: TokenIssuer,
    audit: Arc<dyn AuditSink>,
    config: OAuthConfig,
}

impl OAuthLinker {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        users: Arc<dyn UserRepository>,
        accounts: Arc<dyn OAuthAccountRepository>,
        tokens: TokenIssuer,
        audit: Arc<dyn AuditSink>,
        config: OAuthConfig,
    ) -> Self {
        Self {
            tenants,
            users,
            accounts,
            tokens,
            audit,
            config,
        }
    }

    pub fn frontend_url(&self) -> &str {
        &self.config.frontend_url
    }

    /// Provider consent page the browser is sent to.
    pub fn authorization_url(&self, provider: OAuthProviderKind, tenant_id: Option<Uuid>) -> String {
        let state = generate_state(tenant_id);
        let redirect_uri = callback_url(&self.config.public_base_url, provider);

        match provider {
            OAuthProviderKind::Github => format!(
                "https://github.com/login/oauth/authorize?client_id={}&redirect_uri={}&scope={}&state={}",
                urlencoding::encode(&self.config.github.client_id),
                urlencoding::encode(&redirect_uri),
                urlencoding::encode("user:email"),
                urlencoding::encode(&state),
            ),
            OAuthProviderKind::Google => format!(
                "https://accounts.google.com/o/oauth2/v2/auth?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
                urlencoding::encode(&self.config.google.client_id),
                urlencoding::encode(&redirect_uri),
                urlencoding::encode("email profile"),
                urlencoding::encode(&state),
            ),
        }
    }

    async fn target_tenant(&self, tenant_id: Option<Uuid>) -> Result<Tenant, ServiceError> {
        match tenant_id {
            Some(tenant_id) => self
                .tenants
                .find_by_id(tenant_id)
                .await
                .map_err(ServiceError::Storage)?
                .filter(|t| t.is_active)
                .ok_or_else(|| ServiceError::Tenant("Tenant not found or inactive".to_string())),
            None => get_or_create_default_tenant(self.tenants.as_ref()).await,
        }
    }

    /// Sign in with a provider identity, linking or creating the local account as needed.
    pub async fn handle_login(
        &self,
        identity: OAuthIdentity,
        tenant_id: Option<Uuid>,
    ) -> Result<(User, TokenPair), ServiceError> {
        if identity.email.trim().is_empty() {
            return Err(ServiceError::Validation(
                "Email not provided by identity provider".to_string(),
            ));
        }

        let tenant = self.target_tenant(tenant_id).await?;

        let existing = self
            .accounts
            .find_by_provider_id(identity.provider, &identity.provider_id)
            .await
            .map_err(ServiceError::Storage)?;

        let user = match existing {
            Some(mut account) => {
                let user = self
                    .users
                    .find_by_id(account.user_id)
                    .await
                    .map_err(ServiceError::Storage)?
                    .ok_or_else(|| {
                        ServiceError::Internal(anyhow::anyhow!("Linked account has no owner"))
                    })?;
                account.refresh_from(&identity);
                self.accounts
                    .update(&account)
                    .await
                    .map_err(ServiceError::Storage)?;
                user
            }
            None => {
                let email = identity.email.trim().to_lowercase();
                match self
                    .users
                    .find_by_tenant_and_email(tenant.tenant_id, &email)
                    .await
                    .map_err(ServiceError::Storage)?
                {
                    Some(user) => {
                        self.insert_link(user.user_id, &identity).await?;
                        tracing::info!(user_id = %user.user_id, provider = identity.provider.as_str(), "Linked provider identity to existing user");
                        user
                    }
                    None => self.create_user(&tenant, &identity).await?,
                }
            }
        };

        if !user.is_active {
            tracing::warn!(user_id = %user.user_id, "OAuth login refused: user inactive");
            return Err(ServiceError::invalid_credentials());
        }

        self.users
            .touch_last_login(user.user_id, Utc::now())
            .await
            .map_err(ServiceError::Storage)?;

        emit(
            &self.audit,
            AuditEvent::new(AuditAction::OAuthLogin, true)
                .tenant(user.tenant_id)
                .actor(user.user_id)
                .details(serde_json::json!({ "provider": identity.provider.as_str() })),
        );

        let pair = self.tokens.issue(&user).await?;
        Ok((user, pair))
    }

    async fn create_user(&self, tenant: &Tenant, identity: &OAuthIdentity) -> Result<User, ServiceError> {
        // Provider users never sign in with a password; this one is never revealed.
        let password_hash = hash_password_blocking(Password::new(generate_random_password(32)))
            .await
            .map_err(ServiceError::Internal)?;

        let mut user = User::new(tenant.tenant_id, &identity.email, password_hash.into_string());
        user.first_name = identity.first_name.clone();
        user.last_name = identity.last_name.clone();
        user.is_verified = true;

        if let Some(username) = identity.username.as_deref() {
            let taken = self
                .users
                .find_by_tenant_and_username(tenant.tenant_id, username)
                .await
                .map_err(ServiceError::Storage)?
                .is_some();
            if !taken {
                user.username = Some(username.to_string());
            }
        }

        self.users.insert(&user).await.map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Conflict("User already exists".to_string())
            } else {
                ServiceError::Storage(e)
            }
        })?;
        self.insert_link(user.user_id, identity).await?;

        tracing::info!(user_id = %user.user_id, tenant_id = %tenant.tenant_id, "Created user from provider identity");
        Ok(user)
    }

    async fn insert_link(&self, user_id: Uuid, identity: &OAuthIdentity) -> Result<(), ServiceError> {
        let account = OAuthAccount::link(user_id, identity);
        self.accounts.insert(&account).await.map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Conflict(format!(
                    "This {} account is already linked",
                    identity.provider.as_str()
                ))
            } else {
                ServiceError::Storage(e)
            }
        })
    }

    /// Attach a provider identity to a signed-in user.
    pub async fn link(&self, user_id: Uuid, identity: &OAuthIdentity) -> Result<(), ServiceError> {
        let provider = identity.provider.as_str();

        if self
            .accounts
            .find_by_user_and_provider(user_id, identity.provider)
            .await
            .map_err(ServiceError::Storage)?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "User already has a linked {} account",
                provider
            )));
        }

        if self
            .accounts
            .find_by_provider_id(identity.provider, &identity.provider_id)
            .await
            .map_err(ServiceError::Storage)?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "This {} account is linked to another user",
                provider
            )));
        }

        self.insert_link(user_id, identity).await?;

        emit(
            &self.audit,
            AuditEvent::new(AuditAction::OAuthLinked, true)
                .actor(user_id)
                .details(serde_json::json!({ "provider": provider })),
        );
        Ok(())
    }

    pub async fn unlink(&self, user_id: Uuid, provider: OAuthProviderKind) -> Result<(), ServiceError> {
        let removed = self
            .accounts
            .delete(user_id, provider)
            .await
            .map_err(ServiceError::Storage)?;
        if !removed {
            return Err(ServiceError::NotFound(format!(
                "No linked {} account",
                provider.as_str()
            )));
        }

        emit(
            &self.audit,
            AuditEvent::new(AuditAction::OAuthUnlinked, true)
                .actor(user_id)
                .details(serde_json::json!({ "provider": provider.as_str() })),
        );
        Ok(())
    }

    pub async fn list_accounts(&self, user_id: Uuid) -> Result<Vec<OAuthAccountResponse>, ServiceError> {
        let accounts = self
            .accounts
            .list_by_user(user_id)
            .await
            .map_err(ServiceError::Storage)?;
        Ok(accounts.into_iter().map(OAuthAccountResponse::from).collect())
    }
}
