//! Tenant administration and resolution of tenant credentials.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::audit::{emit, AuditSink};
use super::error::ServiceError;
use crate::models::{
    ApiKeyRecord, ApiKeyResponse, AuditAction, AuditEvent, CreatedApiKeyResponse, Tenant,
    DEFAULT_TENANT_NAME,
};
use crate::repository::{is_unique_violation, ApiKeyRepository, TenantRepository};
use crate::utils::{hash_password_blocking, verify_password_blocking, Password};

/// Tenant a request was authenticated for, and what the credential may do.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant: Tenant,
    /// Set when the caller used a secondary API key rather than the primary credential.
    pub api_key_id: Option<Uuid>,
    pub permissions: Vec<String>,
    /// The tenant's primary credential carries every permission.
    pub full_access: bool,
}

impl TenantContext {
    pub fn tenant_id(&self) -> Uuid {
        self.tenant.tenant_id
    }

    pub fn has_permissions(&self, required: &[String]) -> bool {
        self.full_access || required.iter().all(|p| self.permissions.contains(p))
    }
}

fn tenant_not_found() -> ServiceError {
    ServiceError::NotFound("Tenant not found".to_string())
}

/// Tenant used by flows that name none, created on first use.
pub async fn get_or_create_default_tenant(
    tenants: &dyn TenantRepository,
) -> Result<Tenant, ServiceError> {
    if let Some(tenant) = tenants
        .find_by_name(DEFAULT_TENANT_NAME)
        .await
        .map_err(ServiceError::Storage)?
    {
        return Ok(tenant);
    }

    let tenant = Tenant::new(DEFAULT_TENANT_NAME.to_string(), None);
    tenants.insert(&tenant).await.map_err(ServiceError::Storage)?;
    tracing::info!(tenant_id = %tenant.tenant_id, "Default tenant created");
    Ok(tenant)
}

/// Maps an opaque credential to its tenant.
#[derive(Clone)]
pub struct TenantResolver {
    tenants: Arc<dyn TenantRepository>,
    api_keys: Arc<dyn ApiKeyRepository>,
}

impl TenantResolver {
    pub fn new(tenants: Arc<dyn TenantRepository>, api_keys: Arc<dyn ApiKeyRepository>) -> Self {
        Self { tenants, api_keys }
    }

    /// Resolve `credential` and require `required` permissions.
    ///
    /// Secondary keys are only stored hashed, so every usable key is compared
    /// in turn. Cost grows linearly with the number of keys.
    pub async fn resolve(
        &self,
        credential: &str,
        required: &[String],
    ) -> Result<TenantContext, ServiceError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(ServiceError::Authentication("API key is required".to_string()));
        }

        if let Some(tenant) = self
            .tenants
            .find_by_primary_key(credential)
            .await
            .map_err(ServiceError::Storage)?
        {
            let context = TenantContext {
                tenant,
                api_key_id: None,
                permissions: Vec::new(),
                full_access: true,
            };
            return Self::authorize(context, required);
        }

        let record = self
            .match_api_key(credential)
            .await?
            .ok_or_else(|| ServiceError::Authentication("Invalid API key".to_string()))?;

        let tenant = self
            .tenants
            .find_by_id(record.tenant_id)
            .await
            .map_err(ServiceError::Storage)?
            .ok_or_else(|| ServiceError::Authentication("Invalid API key".to_string()))?;

        self.touch_last_used(record.key_id);

        let context = TenantContext {
            tenant,
            api_key_id: Some(record.key_id),
            permissions: record.permissions,
            full_access: false,
        };
        Self::authorize(context, required)
    }

    fn authorize(context: TenantContext, required: &[String]) -> Result<TenantContext, ServiceError> {
        if !context.tenant.is_active {
            return Err(ServiceError::Forbidden("Tenant is inactive".to_string()));
        }
        if !context.has_permissions(required) {
            return Err(ServiceError::Forbidden("Insufficient permissions".to_string()));
        }
        Ok(context)
    }

    async fn match_api_key(&self, credential: &str) -> Result<Option<ApiKeyRecord>, ServiceError> {
        let candidates = self
            .api_keys
            .list_usable(Utc::now())
            .await
            .map_err(ServiceError::Storage)?;

        for record in candidates {
            let matched =
                verify_password_blocking(Password::new(credential.to_string()), record.key_hash.clone())
                    .await;
            if matched {
                return Ok(Some(record));
            }
        }

        Ok(None)
    }

    fn touch_last_used(&self, key_id: Uuid) {
        let api_keys = self.api_keys.clone();
        tokio::spawn(async move {
            if let Err(e) = api_keys.touch_last_used(key_id, Utc::now()).await {
                tracing::warn!(error = %e, key_id = %key_id, "Failed to update API key last use");
            }
        });
    }
}

/// Fields an administrator may change on a tenant. `None` leaves a field as is;
/// an empty domain clears it.
#[derive(Debug, Clone, Default)]
pub struct TenantUpdate {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Clone)]
pub struct TenantService {
    tenants: Arc<dyn TenantRepository>,
    api_keys: Arc<dyn ApiKeyRepository>,
    audit: Arc<dyn AuditSink>,
}

impl TenantService {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        api_keys: Arc<dyn ApiKeyRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            tenants,
            api_keys,
            audit,
        }
    }

    // ==== Tenants ====

    pub async fn create(&self, name: &str, domain: Option<String>) -> Result<Tenant, ServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation("Tenant name is required".to_string()));
        }

        let tenant = Tenant::new(name.to_string(), domain);
        if let Some(domain) = tenant.domain.as_deref() {
            self.ensure_domain_free(domain, None).await?;
        }

        self.tenants.insert(&tenant).await.map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Conflict("Domain already in use".to_string())
            } else {
                ServiceError::Storage(e)
            }
        })?;

        tracing::info!(tenant_id = %tenant.tenant_id, name = %tenant.name, "Tenant created");
        emit(
            &self.audit,
            AuditEvent::new(AuditAction::TenantCreated, true).tenant(Some(tenant.tenant_id)),
        );

        Ok(tenant)
    }

    async fn ensure_domain_free(&self, domain: &str, owner: Option<Uuid>) -> Result<(), ServiceError> {
        let existing = self
            .tenants
            .find_by_domain(domain)
            .await
            .map_err(ServiceError::Storage)?;
        match existing {
            Some(t) if Some(t.tenant_id) != owner => {
                Err(ServiceError::Conflict("Domain already in use".to_string()))
            }
            _ => Ok(()),
        }
    }

    pub async fn list(&self) -> Result<Vec<Tenant>, ServiceError> {
        self.tenants.list().await.map_err(ServiceError::Storage)
    }

    pub async fn get(&self, tenant_id: Uuid) -> Result<Tenant, ServiceError> {
        self.tenants
            .find_by_id(tenant_id)
            .await
            .map_err(ServiceError::Storage)?
            .ok_or_else(tenant_not_found)
    }

    pub async fn get_by_domain(&self, domain: &str) -> Result<Tenant, ServiceError> {
        self.tenants
            .find_by_domain(&domain.trim().to_lowercase())
            .await
            .map_err(ServiceError::Storage)?
            .ok_or_else(tenant_not_found)
    }

    pub async fn get_by_primary_key(&self, api_key: &str) -> Result<Tenant, ServiceError> {
        self.tenants
            .find_by_primary_key(api_key)
            .await
            .map_err(ServiceError::Storage)?
            .ok_or_else(tenant_not_found)
    }

    pub async fn update(&self, tenant_id: Uuid, changes: TenantUpdate) -> Result<Tenant, ServiceError> {
        let mut tenant = self.get(tenant_id).await?;

        if let Some(name) = changes.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(ServiceError::Validation("Tenant name is required".to_string()));
            }
            tenant.name = name;
        }

        if let Some(domain) = changes.domain {
            let domain = domain.trim().to_lowercase();
            if domain.is_empty() {
                tenant.domain = None;
            } else {
                self.ensure_domain_free(&domain, Some(tenant_id)).await?;
                tenant.domain = Some(domain);
            }
        }

        if let Some(is_active) = changes.is_active {
            tenant.is_active = is_active;
        }

        tenant.updated_utc = Utc::now();
        self.tenants.update(&tenant).await.map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Conflict("Domain already in use".to_string())
            } else {
                ServiceError::Storage(e)
            }
        })?;

        emit(
            &self.audit,
            AuditEvent::new(AuditAction::TenantUpdated, true).tenant(Some(tenant_id)),
        );

        Ok(tenant)
    }

    /// Deactivated tenants keep their data but none of their users can authenticate.
    pub async fn suspend(&self, tenant_id: Uuid) -> Result<Tenant, ServiceError> {
        self.update(
            tenant_id,
            TenantUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn activate(&self, tenant_id: Uuid) -> Result<Tenant, ServiceError> {
        self.update(
            tenant_id,
            TenantUpdate {
                is_active: Some(true),
                ..Default::default()
            },
        )
        .await
    }

    /// Remove the tenant with its users, their linked accounts and its API keys.
    pub async fn delete(&self, tenant_id: Uuid) -> Result<(), ServiceError> {
        let removed = self
            .tenants
            .delete_cascade(tenant_id)
            .await
            .map_err(ServiceError::Storage)?;
        if !removed {
            return Err(tenant_not_found());
        }

        tracing::info!(tenant_id = %tenant_id, "Tenant deleted");
        emit(
            &self.audit,
            AuditEvent::new(AuditAction::TenantDeleted, true).tenant(Some(tenant_id)),
        );
        Ok(())
    }

    // ==== API keys ====

    /// Create a key. The plaintext is only ever part of this response.
    pub async fn create_api_key(
        &self,
        tenant_id: Uuid,
        name: &str,
        permissions: Vec<String>,
        expiry_utc: Option<DateTime<Utc>>,
    ) -> Result<CreatedApiKeyResponse, ServiceError> {
        self.get(tenant_id).await?;

        if expiry_utc.is_some_and(|exp| exp <= Utc::now()) {
            return Err(ServiceError::Validation("Expiry must be in the future".to_string()));
        }

        let plaintext = Uuid::new_v4().to_string();
        let key_hash = hash_password_blocking(Password::new(plaintext.clone()))
            .await
            .map_err(ServiceError::Internal)?;

        let record = ApiKeyRecord::new(
            tenant_id,
            name.trim().to_string(),
            key_hash.into_string(),
            permissions,
            expiry_utc,
        );
        self.api_keys
            .insert(&record)
            .await
            .map_err(ServiceError::Storage)?;

        emit(
            &self.audit,
            AuditEvent::new(AuditAction::ApiKeyCreated, true)
                .tenant(Some(tenant_id))
                .details(serde_json::json!({ "key_id": record.key_id })),
        );

        Ok(CreatedApiKeyResponse {
            record: ApiKeyResponse::from(record),
            key: plaintext,
        })
    }

    pub async fn list_api_keys(&self, tenant_id: Uuid) -> Result<Vec<ApiKeyResponse>, ServiceError> {
        self.get(tenant_id).await?;
        let keys = self
            .api_keys
            .list_by_tenant(tenant_id)
            .await
            .map_err(ServiceError::Storage)?;
        Ok(keys.into_iter().map(ApiKeyResponse::from).collect())
    }

    pub async fn delete_api_key(&self, tenant_id: Uuid, key_id: Uuid) -> Result<(), ServiceError> {
        let removed = self
            .api_keys
            .delete(tenant_id, key_id)
            .await
            .map_err(ServiceError::Storage)?;
        if !removed {
            return Err(ServiceError::NotFound("API key not found".to_string()));
        }

        emit(
            &self.audit,
            AuditEvent::new(AuditAction::ApiKeyDeleted, true)
                .tenant(Some(tenant_id))
                .details(serde_json::json!({ "key_id": key_id })),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryStore;
    use crate::services::audit::MockAuditSink;
    use chrono::Duration;

    fn setup() -> (TenantService, TenantResolver, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let service = TenantService::new(store.clone(), store.clone(), Arc::new(MockAuditSink::new()));
        let resolver = TenantResolver::new(store.clone(), store.clone());
        (service, resolver, store)
    }

    fn perms(items: &[&str]) -> Vec<String> {
        items.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn primary_credential_resolves_with_full_access() {
        let (service, resolver, _) = setup();
        let tenant = service.create("Acme", None).await.unwrap();

        let ctx = resolver
            .resolve(&tenant.primary_api_key, &perms(&["users:write"]))
            .await
            .unwrap();
        assert_eq!(ctx.tenant_id(), tenant.tenant_id);
        assert!(ctx.api_key_id.is_none());
    }

    #[tokio::test]
    async fn secondary_key_is_checked_for_permissions() {
        let (service, resolver, store) = setup();
        let tenant = service.create("Acme", None).await.unwrap();
        let created = service
            .create_api_key(tenant.tenant_id, "ci", perms(&["users:read"]), None)
            .await
            .unwrap();

        let ctx = resolver.resolve(&created.key, &perms(&["users:read"])).await.unwrap();
        assert_eq!(ctx.api_key_id, Some(created.record.key_id));

        let denied = resolver.resolve(&created.key, &perms(&["admin"])).await.unwrap_err();
        assert!(matches!(denied, ServiceError::Forbidden(_)));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let keys = ApiKeyRepository::list_by_tenant(store.as_ref(), tenant.tenant_id)
            .await
            .unwrap();
        assert!(keys[0].last_used_utc.is_some());
    }

    #[tokio::test]
    async fn unknown_expired_or_suspended_credentials_fail() {
        let (service, resolver, store) = setup();
        let tenant = service.create("Acme", None).await.unwrap();

        assert!(matches!(
            resolver.resolve("nope", &[]).await.unwrap_err(),
            ServiceError::Authentication(_)
        ));

        let hash = hash_password_blocking(Password::new("expired-key".to_string()))
            .await
            .unwrap();
        let expired = ApiKeyRecord::new(
            tenant.tenant_id,
            "old".to_string(),
            hash.into_string(),
            vec![],
            Some(Utc::now() - Duration::minutes(1)),
        );
        ApiKeyRepository::insert(store.as_ref(), &expired).await.unwrap();
        assert!(resolver.resolve("expired-key", &[]).await.is_err());

        service.suspend(tenant.tenant_id).await.unwrap();
        assert!(matches!(
            resolver.resolve(&tenant.primary_api_key, &[]).await.unwrap_err(),
            ServiceError::Forbidden(_)
        ));
    }

    #[tokio::test]
    async fn domains_are_globally_unique() {
        let (service, _, _) = setup();
        let first = service.create("Acme", Some("acme.com".to_string())).await.unwrap();
        let err = service.create("Other", Some("ACME.com".to_string())).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let other = service.create("Other", None).await.unwrap();
        let err = service
            .update(
                other.tenant_id,
                TenantUpdate {
                    domain: Some("acme.com".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        assert_eq!(service.get_by_domain("acme.com").await.unwrap().tenant_id, first.tenant_id);
    }

    #[tokio::test]
    async fn api_keys_are_scoped_to_their_tenant() {
        let (service, _, _) = setup();
        let a = service.create("A", None).await.unwrap();
        let b = service.create("B", None).await.unwrap();
        let key = service.create_api_key(a.tenant_id, "k", vec![], None).await.unwrap();

        assert!(matches!(
            service.delete_api_key(b.tenant_id, key.record.key_id).await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
        assert_eq!(service.list_api_keys(a.tenant_id).await.unwrap().len(), 1);
        service.delete_api_key(a.tenant_id, key.record.key_id).await.unwrap();
        assert!(service.list_api_keys(a.tenant_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn default_tenant_is_created_once() {
        let (_, _, store) = setup();
        let first = get_or_create_default_tenant(store.as_ref()).await.unwrap();
        let second = get_or_create_default_tenant(store.as_ref()).await.unwrap();
        assert_eq!(first.tenant_id, second.tenant_id);
        assert_eq!(first.name, DEFAULT_TENANT_NAME);
    }

    #[tokio::test]
    async fn delete_unknown_tenant_is_not_found() {
        let (service, _, _) = setup();
        assert!(matches!(
            service.delete(Uuid::new_v4()).await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }
}
