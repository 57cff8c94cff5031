//! Audit event model - security and compliance records handed to the audit sink.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Audit actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    LoginSucceeded,
    LoginFailed,
    UserRegistered,
    UserLoggedOut,
    TokenRefreshed,
    PasswordChanged,
    PasswordResetRequested,
    PasswordReset,
    OAuthLogin,
    OAuthLinked,
    OAuthUnlinked,
    AdminLogin,
    TenantCreated,
    TenantUpdated,
    TenantDeleted,
    ApiKeyCreated,
    ApiKeyDeleted,
    UserSuspended,
    UserActivated,
    UserDeleted,
    SessionsRevoked,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::LoginSucceeded => "login_succeeded",
            AuditAction::LoginFailed => "login_failed",
            AuditAction::UserRegistered => "user_registered",
            AuditAction::UserLoggedOut => "user_logged_out",
            AuditAction::TokenRefreshed => "token_refreshed",
            AuditAction::PasswordChanged => "password_changed",
            AuditAction::PasswordResetRequested => "password_reset_requested",
            AuditAction::PasswordReset => "password_reset",
            AuditAction::OAuthLogin => "oauth_login",
            AuditAction::OAuthLinked => "oauth_linked",
            AuditAction::OAuthUnlinked => "oauth_unlinked",
            AuditAction::AdminLogin => "admin_login",
            AuditAction::TenantCreated => "tenant_created",
            AuditAction::TenantUpdated => "tenant_updated",
            AuditAction::TenantDeleted => "tenant_deleted",
            AuditAction::ApiKeyCreated => "api_key_created",
            AuditAction::ApiKeyDeleted => "api_key_deleted",
            AuditAction::UserSuspended => "user_suspended",
            AuditAction::UserActivated => "user_activated",
            AuditAction::UserDeleted => "user_deleted",
            AuditAction::SessionsRevoked => "sessions_revoked",
        }
    }
}

/// Audit event record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub actor_user_id: Option<Uuid>,
    pub action: AuditAction,
    pub success: bool,
    pub details: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, success: bool) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            tenant_id: None,
            actor_user_id: None,
            action,
            success,
            details: serde_json::Value::Null,
            created_utc: Utc::now(),
        }
    }

    pub fn tenant(mut self, tenant_id: Option<Uuid>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn actor(mut self, user_id: Uuid) -> Self {
        self.actor_user_id = Some(user_id);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}
