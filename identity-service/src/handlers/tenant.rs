//! Tenant self-service, authenticated by the tenant's own API key.
//!
//! Every route here is scoped to the calling tenant; the permission each
//! one needs is enforced by the `ApiKeyAuthenticator` layered in front of it.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        admin::{CreateApiKeyRequest, CreateTenantRequest},
        auth::MessageResponse,
    },
    middleware::CurrentTenant,
    models::{ApiKeyResponse, CreatedApiKeyResponse, Tenant, TenantResponse},
    services::{ServiceError, TenantContext},
    utils::ValidatedJson,
    AppState,
};

/// Only the primary credential may read itself back.
fn tenant_view(ctx: &TenantContext, tenant: Tenant) -> TenantResponse {
    let response = TenantResponse::from(tenant);
    if ctx.full_access {
        response
    } else {
        response.without_credential()
    }
}

/// Tenant the API key belongs to
#[utoipa::path(
    get,
    path = "/tenant",
    responses(
        (status = 200, description = "Calling tenant", body = TenantResponse),
        (status = 401, description = "Missing or invalid API key", body = ErrorResponse),
        (status = 403, description = "Key lacks tenant:read", body = ErrorResponse)
    ),
    tag = "Tenant",
    security(("api_key" = []))
)]
pub async fn current_tenant(CurrentTenant(ctx): CurrentTenant) -> Json<TenantResponse> {
    let tenant = ctx.tenant.clone();
    Json(tenant_view(&ctx, tenant))
}

/// Tenant by id; only the caller's own tenant is visible
#[utoipa::path(
    get,
    path = "/tenant/{tenant_id}",
    params(("tenant_id" = Uuid, Path, description = "Tenant ID")),
    responses(
        (status = 200, description = "Tenant", body = TenantResponse),
        (status = 403, description = "Key lacks tenant:read", body = ErrorResponse),
        (status = 404, description = "Tenant not found", body = ErrorResponse)
    ),
    tag = "Tenant",
    security(("api_key" = []))
)]
pub async fn get_own_tenant(
    State(state): State<AppState>,
    CurrentTenant(ctx): CurrentTenant,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<TenantResponse>, AppError> {
    // Other tenants are reported as missing, not forbidden.
    if tenant_id != ctx.tenant_id() {
        return Err(ServiceError::NotFound("Tenant not found".to_string()).into());
    }
    let tenant = state.tenant_service.get(tenant_id).await?;
    Ok(Json(tenant_view(&ctx, tenant)))
}

/// Create a tenant
#[utoipa::path(
    post,
    path = "/tenant",
    operation_id = "create_tenant_with_api_key",
    request_body = CreateTenantRequest,
    responses(
        (status = 201, description = "Tenant created", body = TenantResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 403, description = "Key lacks tenant:create", body = ErrorResponse),
        (status = 409, description = "Domain already in use", body = ErrorResponse)
    ),
    tag = "Tenant",
    security(("api_key" = []))
)]
pub async fn create_tenant(
    State(state): State<AppState>,
    CurrentTenant(ctx): CurrentTenant,
    ValidatedJson(req): ValidatedJson<CreateTenantRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = state.tenant_service.create(&req.name, req.domain).await?;
    tracing::info!(
        tenant_id = %tenant.tenant_id,
        created_by = %ctx.tenant_id(),
        "Tenant created through API key"
    );
    Ok((StatusCode::CREATED, Json(TenantResponse::from(tenant))))
}

/// List the calling tenant's API keys
#[utoipa::path(
    get,
    path = "/tenant/api-keys",
    responses(
        (status = 200, description = "Keys without their secrets", body = [ApiKeyResponse]),
        (status = 403, description = "Key lacks tenant:read", body = ErrorResponse)
    ),
    tag = "Tenant",
    security(("api_key" = []))
)]
pub async fn list_own_api_keys(
    State(state): State<AppState>,
    CurrentTenant(ctx): CurrentTenant,
) -> Result<Json<Vec<ApiKeyResponse>>, AppError> {
    Ok(Json(state.tenant_service.list_api_keys(ctx.tenant_id()).await?))
}

/// Create an API key for the calling tenant
#[utoipa::path(
    post,
    path = "/tenant/api-keys",
    request_body = CreateApiKeyRequest,
    responses(
        (status = 201, description = "Key created", body = CreatedApiKeyResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 403, description = "Key lacks tenant:manage or a requested permission", body = ErrorResponse)
    ),
    tag = "Tenant",
    security(("api_key" = []))
)]
pub async fn create_own_api_key(
    State(state): State<AppState>,
    CurrentTenant(ctx): CurrentTenant,
    ValidatedJson(req): ValidatedJson<CreateApiKeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    // A secondary key cannot mint a key stronger than itself.
    if !ctx.has_permissions(&req.permissions) {
        return Err(ServiceError::Forbidden(
            "Cannot grant permissions the calling key does not hold".to_string(),
        )
        .into());
    }

    let created = state
        .tenant_service
        .create_api_key(ctx.tenant_id(), &req.name, req.permissions, req.expiry_utc)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Delete one of the calling tenant's API keys
#[utoipa::path(
    delete,
    path = "/tenant/api-keys/{key_id}",
    params(("key_id" = Uuid, Path, description = "API key ID")),
    responses(
        (status = 200, description = "Key deleted", body = MessageResponse),
        (status = 403, description = "Key lacks tenant:manage", body = ErrorResponse),
        (status = 404, description = "API key not found", body = ErrorResponse)
    ),
    tag = "Tenant",
    security(("api_key" = []))
)]
pub async fn delete_own_api_key(
    State(state): State<AppState>,
    CurrentTenant(ctx): CurrentTenant,
    Path(key_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .tenant_service
        .delete_api_key(ctx.tenant_id(), key_id)
        .await?;
    Ok(Json(MessageResponse::new("API key deleted")))
}
