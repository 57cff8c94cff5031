//! Tenant credential middleware.
//!
//! Tenant-scoped routes require an API key, sent either as
//! `Authorization: Bearer <key>` or in the `x-api-key` header. The resolved
//! `TenantContext` is available to handlers through the `CurrentTenant`
//! extractor.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::request::Parts,
};
use service_core::error::AppError;

use super::auth::{bearer_token, Authenticator};
use crate::services::{ServiceError, TenantContext, TenantResolver};

pub const API_KEY_HEADER: &str = "x-api-key";

pub struct ApiKeyAuthenticator {
    resolver: TenantResolver,
    required_permissions: Vec<String>,
}

impl ApiKeyAuthenticator {
    pub fn new(resolver: TenantResolver) -> Self {
        Self {
            resolver,
            required_permissions: Vec::new(),
        }
    }

    pub fn requiring(mut self, permissions: &[&str]) -> Self {
        self.required_permissions = permissions.iter().map(|p| p.to_string()).collect();
        self
    }
}

/// `Authorization: Bearer` wins over `x-api-key` when both are sent.
fn api_key(parts: &Parts) -> Option<&str> {
    bearer_token(parts).or_else(|| {
        parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|key| !key.is_empty())
    })
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    type Identity = TenantContext;

    async fn authenticate(&self, parts: &Parts) -> Result<TenantContext, ServiceError> {
        let credential = api_key(parts)
            .ok_or_else(|| ServiceError::Authentication("API key is required".to_string()))?;

        let context = self
            .resolver
            .resolve(credential, &self.required_permissions)
            .await?;

        tracing::debug!(
            tenant_id = %context.tenant_id(),
            api_key_id = ?context.api_key_id,
            "Tenant resolved"
        );
        Ok(context)
    }
}

/// Tenant the request was authenticated for.
pub struct CurrentTenant(pub TenantContext);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentTenant
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantContext>()
            .cloned()
            .map(CurrentTenant)
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!("Tenant context missing from request extensions"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::authenticate;
    use crate::models::Tenant;
    use crate::repository::{InMemoryStore, TenantRepository};
    use crate::services::{MockAuditSink, TenantService};
    use axum::{
        body::Body,
        http::{header, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Router,
    };
    use std::sync::Arc;
    use tower::util::ServiceExt;

    fn router(authenticator: ApiKeyAuthenticator) -> Router {
        Router::new()
            .route(
                "/whoami",
                get(|CurrentTenant(ctx): CurrentTenant| async move { ctx.tenant.name }),
            )
            .layer(from_fn_with_state(
                Arc::new(authenticator),
                authenticate::<ApiKeyAuthenticator>,
            ))
    }

    async fn app() -> (Router, Tenant, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let tenant = Tenant::new("t1".to_string(), None);
        TenantRepository::insert(store.as_ref(), &tenant).await.unwrap();

        let resolver = TenantResolver::new(store.clone(), store.clone());
        (router(ApiKeyAuthenticator::new(resolver)), tenant, store)
    }

    fn get_with(name: &str, value: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri("/whoami")
            .header(name, value)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn primary_key_in_either_header() {
        let (router, tenant, _) = app().await;

        let res = router
            .clone()
            .oneshot(get_with(API_KEY_HEADER, &tenant.primary_api_key))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = router
            .oneshot(get_with(
                header::AUTHORIZATION.as_str(),
                &format!("Bearer {}", tenant.primary_api_key),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "t1");
    }

    #[tokio::test]
    async fn authorization_header_takes_precedence() {
        let (router, tenant, _) = app().await;
        let both = |bearer: &str, api_key: &str| {
            axum::http::Request::builder()
                .uri("/whoami")
                .header(header::AUTHORIZATION, format!("Bearer {}", bearer))
                .header(API_KEY_HEADER, api_key)
                .body(Body::empty())
                .unwrap()
        };

        let res = router
            .clone()
            .oneshot(both(&tenant.primary_api_key, "nope"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = router
            .oneshot(both("nope", &tenant.primary_api_key))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_key_is_unauthorized() {
        let (router, _, _) = app().await;
        let res = router.oneshot(get_with(API_KEY_HEADER, "nope")).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn suspended_tenant_is_forbidden() {
        let (router, mut tenant, store) = app().await;
        tenant.is_active = false;
        TenantRepository::update(store.as_ref(), &tenant).await.unwrap();

        let res = router
            .oneshot(get_with(API_KEY_HEADER, &tenant.primary_api_key))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn required_permissions_are_enforced() {
        let (_, tenant, store) = app().await;
        let service = TenantService::new(store.clone(), store.clone(), Arc::new(MockAuditSink::new()));
        let reader = service
            .create_api_key(tenant.tenant_id, "reader", vec!["users:read".to_string()], None)
            .await
            .unwrap();

        let resolver = TenantResolver::new(store.clone(), store.clone());
        let guarded = router(ApiKeyAuthenticator::new(resolver).requiring(&["users:write"]));

        let res = guarded
            .clone()
            .oneshot(get_with(API_KEY_HEADER, &reader.key))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = guarded
            .oneshot(get_with(API_KEY_HEADER, &tenant.primary_api_key))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
