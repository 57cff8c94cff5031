//! User administration for the console, and the bootstrap administrator.

use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;
use uuid::Uuid;

use super::audit::{emit, AuditSink};
use super::error::ServiceError;
use super::token::TokenIssuer;
use crate::models::{AuditAction, AuditEvent, Tenant, User, UserRole, SYSTEM_TENANT_NAME};
use crate::repository::{TenantRepository, UserRepository};
use crate::utils::{generate_random_password, hash_password_blocking, Password};

/// Outcome of [`UserAdminService::ensure_default_admin`].
#[derive(Debug)]
pub struct DefaultAdmin {
    pub created: bool,
    pub email: String,
    /// Only set when no password was configured and one had to be generated.
    pub generated_password: Option<Secret<String>>,
}

fn user_not_found() -> ServiceError {
    ServiceError::NotFound("User not found".to_string())
}

#[derive(Clone)]
pub struct UserAdminService {
    tenants: Arc<dyn TenantRepository>,
    users: Arc<dyn UserRepository>,
    tokens: TokenIssuer,
    audit: Arc<dyn AuditSink>,
}

impl UserAdminService {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        users: Arc<dyn UserRepository>,
        tokens: TokenIssuer,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            tenants,
            users,
            tokens,
            audit,
        }
    }

    pub async fn list_tenant_users(&self, tenant_id: Uuid) -> Result<Vec<User>, ServiceError> {
        self.tenants
            .find_by_id(tenant_id)
            .await
            .map_err(ServiceError::Storage)?
            .ok_or_else(|| ServiceError::NotFound("Tenant not found".to_string()))?;

        self.users
            .list_in_tenant(tenant_id)
            .await
            .map_err(ServiceError::Storage)
    }

    pub async fn get(&self, user_id: Uuid) -> Result<User, ServiceError> {
        self.users
            .find_by_id(user_id)
            .await
            .map_err(ServiceError::Storage)?
            .ok_or_else(user_not_found)
    }

    /// Deactivate an account and end its refresh session.
    pub async fn suspend(&self, actor: Uuid, user_id: Uuid) -> Result<User, ServiceError> {
        if actor == user_id {
            return Err(ServiceError::Validation(
                "Administrators cannot suspend their own account".to_string(),
            ));
        }

        let user = self.set_active(user_id, false).await?;
        self.tokens.revoke(user_id).await?;

        tracing::info!(user_id = %user_id, admin_id = %actor, "User suspended");
        emit(
            &self.audit,
            AuditEvent::new(AuditAction::UserSuspended, true)
                .tenant(user.tenant_id)
                .actor(actor)
                .details(serde_json::json!({ "user_id": user_id })),
        );
        Ok(user)
    }

    pub async fn activate(&self, actor: Uuid, user_id: Uuid) -> Result<User, ServiceError> {
        let user = self.set_active(user_id, true).await?;

        tracing::info!(user_id = %user_id, admin_id = %actor, "User activated");
        emit(
            &self.audit,
            AuditEvent::new(AuditAction::UserActivated, true)
                .tenant(user.tenant_id)
                .actor(actor)
                .details(serde_json::json!({ "user_id": user_id })),
        );
        Ok(user)
    }

    /// Invalidate the user's refresh token. Access tokens run out on their own.
    pub async fn revoke_sessions(&self, actor: Uuid, user_id: Uuid) -> Result<(), ServiceError> {
        let user = self.get(user_id).await?;
        self.tokens.revoke(user_id).await?;

        emit(
            &self.audit,
            AuditEvent::new(AuditAction::SessionsRevoked, true)
                .tenant(user.tenant_id)
                .actor(actor)
                .details(serde_json::json!({ "user_id": user_id })),
        );
        Ok(())
    }

    /// Remove the user together with its linked provider accounts.
    pub async fn delete(&self, actor: Uuid, user_id: Uuid) -> Result<(), ServiceError> {
        if actor == user_id {
            return Err(ServiceError::Validation(
                "Administrators cannot delete their own account".to_string(),
            ));
        }

        let user = self.get(user_id).await?;
        let removed = self
            .users
            .delete_with_dependents(user_id)
            .await
            .map_err(ServiceError::Storage)?;
        if !removed {
            return Err(user_not_found());
        }

        tracing::info!(user_id = %user_id, admin_id = %actor, "User deleted");
        emit(
            &self.audit,
            AuditEvent::new(AuditAction::UserDeleted, true)
                .tenant(user.tenant_id)
                .actor(actor)
                .details(serde_json::json!({ "user_id": user_id })),
        );
        Ok(())
    }

    async fn set_active(&self, user_id: Uuid, is_active: bool) -> Result<User, ServiceError> {
        let found = self
            .users
            .set_active(user_id, is_active)
            .await
            .map_err(ServiceError::Storage)?;
        if !found {
            return Err(user_not_found());
        }
        self.get(user_id).await
    }

    /// Make sure the console has an administrator in the system tenant.
    ///
    /// Existing accounts are left untouched, so restarting never resets a
    /// changed password.
    pub async fn ensure_default_admin(
        &self,
        email: &str,
        password: Option<&Secret<String>>,
    ) -> Result<DefaultAdmin, ServiceError> {
        let email = email.trim().to_lowercase();
        let tenant = self.system_tenant().await?;

        if self
            .users
            .find_by_tenant_and_email(tenant.tenant_id, &email)
            .await
            .map_err(ServiceError::Storage)?
            .is_some()
        {
            tracing::debug!(email = %email, "Default admin already present");
            return Ok(DefaultAdmin {
                created: false,
                email,
                generated_password: None,
            });
        }

        let (plaintext, generated_password) = match password {
            Some(configured) => (configured.expose_secret().clone(), None),
            None => {
                let generated = generate_random_password(24);
                (generated.clone(), Some(Secret::new(generated)))
            }
        };

        let password_hash = hash_password_blocking(Password::new(plaintext))
            .await
            .map_err(ServiceError::Internal)?;

        let mut admin = User::new(tenant.tenant_id, &email, password_hash.into_string());
        admin.username = Some("superadmin".to_string());
        admin.first_name = Some("Super".to_string());
        admin.last_name = Some("Admin".to_string());
        admin.role_code = UserRole::SuperAdmin.as_str().to_string();
        admin.is_verified = true;

        self.users
            .insert(&admin)
            .await
            .map_err(ServiceError::Storage)?;

        tracing::info!(user_id = %admin.user_id, email = %email, "Default admin created");
        Ok(DefaultAdmin {
            created: true,
            email,
            generated_password,
        })
    }

    async fn system_tenant(&self) -> Result<Tenant, ServiceError> {
        if let Some(tenant) = self
            .tenants
            .find_by_name(SYSTEM_TENANT_NAME)
            .await
            .map_err(ServiceError::Storage)?
        {
            return Ok(tenant);
        }

        let tenant = Tenant::new(SYSTEM_TENANT_NAME.to_string(), None);
        self.tenants
            .insert(&tenant)
            .await
            .map_err(ServiceError::Storage)?;
        tracing::info!(tenant_id = %tenant.tenant_id, "System tenant created");
        Ok(tenant)
    }
}
