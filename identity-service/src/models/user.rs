//! User model - tenant-scoped user accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// User roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    User,
    Admin,
    SuperAdmin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
            UserRole::SuperAdmin => "super_admin",
        }
    }
}

/// Permission granting administrative access regardless of role.
pub const ADMIN_PERMISSION: &str = "admin";

/// User entity.
///
/// `tenant_id` is only absent for system administrators.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub email: String,
    pub username: Option<String>,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub country: Option<String>,
    pub role_code: String,
    pub permissions: Vec<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub is_system_admin: bool,
    /// SHA-256 of the only refresh token currently accepted for this user.
    pub hashed_rt: Option<String>,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl User {
    /// Create a new active, unverified user in a tenant. Email is stored lowercased.
    pub fn new(tenant_id: Uuid, email: &str, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            tenant_id: Some(tenant_id),
            email: email.trim().to_lowercase(),
            username: None,
            password_hash,
            first_name: None,
            last_name: None,
            phone_number: None,
            country: None,
            role_code: UserRole::User.as_str().to_string(),
            permissions: Vec::new(),
            is_active: true,
            is_verified: false,
            is_system_admin: false,
            hashed_rt: None,
            last_login_utc: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Administrator by role, by explicit permission, or as a tenant-less system admin.
    pub fn is_admin(&self) -> bool {
        if self.role_code == UserRole::SuperAdmin.as_str()
            || self.role_code == UserRole::Admin.as_str()
        {
            return true;
        }

        if self.permissions.iter().any(|p| p == ADMIN_PERMISSION) {
            return true;
        }

        self.tenant_id.is_none() && self.is_system_admin
    }

    /// Convert to sanitized response (no sensitive fields).
    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self.clone())
    }
}

/// User response for API (without sensitive fields).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub email: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub country: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub is_verified: bool,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            user_id: u.user_id,
            tenant_id: u.tenant_id,
            email: u.email,
            username: u.username,
            first_name: u.first_name,
            last_name: u.last_name,
            phone_number: u.phone_number,
            country: u.country,
            role: u.role_code,
            is_active: u.is_active,
            is_verified: u.is_verified,
            last_login_utc: u.last_login_utc,
            created_utc: u.created_utc,
            updated_utc: u.updated_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User::new(Uuid::new_v4(), "Someone@Example.com ", "hash".to_string())
    }

    #[test]
    fn email_is_lowercased() {
        assert_eq!(user().email, "someone@example.com");
    }

    #[test]
    fn plain_user_is_not_admin() {
        assert!(!user().is_admin());
    }

    #[test]
    fn admin_by_role_or_permission() {
        let mut by_role = user();
        by_role.role_code = UserRole::SuperAdmin.as_str().to_string();
        assert!(by_role.is_admin());

        let mut by_permission = user();
        by_permission.permissions = vec!["read".to_string(), ADMIN_PERMISSION.to_string()];
        assert!(by_permission.is_admin());
    }

    #[test]
    fn system_admin_flag_requires_no_tenant() {
        let mut scoped = user();
        scoped.is_system_admin = true;
        assert!(!scoped.is_admin());

        scoped.tenant_id = None;
        assert!(scoped.is_admin());
    }
}
