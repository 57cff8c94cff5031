//! OAuth account model - third-party identities linked to local users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Supported identity providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProviderKind {
    Github,
    Google,
}

impl OAuthProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProviderKind::Github => "github",
            OAuthProviderKind::Google => "google",
        }
    }
}

impl FromStr for OAuthProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" => Ok(OAuthProviderKind::Github),
            "google" => Ok(OAuthProviderKind::Google),
            _ => Err(format!("Unsupported OAuth provider: {}", s)),
        }
    }
}

/// Identity asserted by a provider after a successful code exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthIdentity {
    pub provider: OAuthProviderKind,
    pub provider_id: String,
    pub email: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Linked account entity. (provider_code, provider_id) is unique, as is (user_id, provider_code).
#[derive(Debug, Clone, FromRow)]
pub struct OAuthAccount {
    pub account_id: Uuid,
    pub user_id: Uuid,
    pub provider_code: String,
    pub provider_id: String,
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl OAuthAccount {
    pub fn link(user_id: Uuid, identity: &OAuthIdentity) -> Self {
        let now = Utc::now();
        Self {
            account_id: Uuid::new_v4(),
            user_id,
            provider_code: identity.provider.as_str().to_string(),
            provider_id: identity.provider_id.clone(),
            username: identity.username.clone(),
            avatar: identity.avatar.clone(),
            access_token: identity.access_token.clone(),
            refresh_token: identity.refresh_token.clone(),
            last_login_utc: Some(now),
            created_utc: now,
        }
    }

    /// Refresh the cached profile and provider tokens from a new login.
    pub fn refresh_from(&mut self, identity: &OAuthIdentity) {
        if identity.username.is_some() {
            self.username = identity.username.clone();
        }
        if identity.avatar.is_some() {
            self.avatar = identity.avatar.clone();
        }
        self.access_token = identity.access_token.clone();
        self.refresh_token = identity.refresh_token.clone();
        self.last_login_utc = Some(Utc::now());
    }
}

/// Linked account as shown to its owner; provider tokens are never returned.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OAuthAccountResponse {
    pub provider: String,
    pub provider_id: String,
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl From<OAuthAccount> for OAuthAccountResponse {
    fn from(a: OAuthAccount) -> Self {
        Self {
            provider: a.provider_code,
            provider_id: a.provider_id,
            username: a.username,
            avatar: a.avatar,
            last_login_utc: a.last_login_utc,
            created_utc: a.created_utc,
        }
    }
}
