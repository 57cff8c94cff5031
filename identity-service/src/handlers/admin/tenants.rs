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
        admin::{CreateApiKeyRequest, CreateTenantRequest, UpdateTenantRequest},
        auth::MessageResponse,
    },
    middleware::AdminUser,
    models::{ApiKeyResponse, CreatedApiKeyResponse, TenantResponse},
    services::TenantUpdate,
    utils::ValidatedJson,
    AppState,
};

/// Create a tenant
#[utoipa::path(
    post,
    path = "/admin/api/tenants",
    request_body = CreateTenantRequest,
    responses(
        (status = 201, description = "Tenant created", body = TenantResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 409, description = "Domain already in use", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_session" = []))
)]
pub async fn create_tenant(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ValidatedJson(req): ValidatedJson<CreateTenantRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = state.tenant_service.create(&req.name, req.domain).await?;
    tracing::info!(tenant_id = %tenant.tenant_id, admin_id = %admin.user_id, "Tenant created");
    Ok((StatusCode::CREATED, Json(TenantResponse::from(tenant))))
}

/// List tenants
#[utoipa::path(
    get,
    path = "/admin/api/tenants",
    responses((status = 200, description = "All tenants", body = [TenantResponse])),
    tag = "Admin",
    security(("admin_session" = []))
)]
pub async fn list_tenants(State(state): State<AppState>) -> Result<Json<Vec<TenantResponse>>, AppError> {
    let tenants = state.tenant_service.list().await?;
    Ok(Json(tenants.into_iter().map(TenantResponse::from).collect()))
}

/// Get a tenant
#[utoipa::path(
    get,
    path = "/admin/api/tenants/{tenant_id}",
    params(("tenant_id" = Uuid, Path, description = "Tenant ID")),
    responses(
        (status = 200, description = "Tenant", body = TenantResponse),
        (status = 404, description = "Tenant not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_session" = []))
)]
pub async fn get_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<TenantResponse>, AppError> {
    let tenant = state.tenant_service.get(tenant_id).await?;
    Ok(Json(TenantResponse::from(tenant)))
}

/// Update a tenant
#[utoipa::path(
    patch,
    path = "/admin/api/tenants/{tenant_id}",
    params(("tenant_id" = Uuid, Path, description = "Tenant ID")),
    request_body = UpdateTenantRequest,
    responses(
        (status = 200, description = "Tenant updated", body = TenantResponse),
        (status = 404, description = "Tenant not found", body = ErrorResponse),
        (status = 409, description = "Domain already in use", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_session" = []))
)]
pub async fn update_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateTenantRequest>,
) -> Result<Json<TenantResponse>, AppError> {
    let tenant = state
        .tenant_service
        .update(
            tenant_id,
            TenantUpdate {
                name: req.name,
                domain: req.domain,
                is_active: req.is_active,
            },
        )
        .await?;
    Ok(Json(TenantResponse::from(tenant)))
}

/// Delete a tenant with its users and keys
#[utoipa::path(
    delete,
    path = "/admin/api/tenants/{tenant_id}",
    params(("tenant_id" = Uuid, Path, description = "Tenant ID")),
    responses(
        (status = 200, description = "Tenant deleted", body = MessageResponse),
        (status = 404, description = "Tenant not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_session" = []))
)]
pub async fn delete_tenant(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    state.tenant_service.delete(tenant_id).await?;
    tracing::info!(tenant_id = %tenant_id, admin_id = %admin.user_id, "Tenant deleted");
    Ok(Json(MessageResponse::new("Tenant deleted")))
}

/// Suspend a tenant; its users can no longer sign in
#[utoipa::path(
    post,
    path = "/admin/api/tenants/{tenant_id}/suspend",
    params(("tenant_id" = Uuid, Path, description = "Tenant ID")),
    responses(
        (status = 200, description = "Tenant suspended", body = TenantResponse),
        (status = 404, description = "Tenant not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_session" = []))
)]
pub async fn suspend_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<TenantResponse>, AppError> {
    let tenant = state.tenant_service.suspend(tenant_id).await?;
    Ok(Json(TenantResponse::from(tenant)))
}

/// Reactivate a suspended tenant
#[utoipa::path(
    post,
    path = "/admin/api/tenants/{tenant_id}/activate",
    params(("tenant_id" = Uuid, Path, description = "Tenant ID")),
    responses(
        (status = 200, description = "Tenant activated", body = TenantResponse),
        (status = 404, description = "Tenant not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_session" = []))
)]
pub async fn activate_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<TenantResponse>, AppError> {
    let tenant = state.tenant_service.activate(tenant_id).await?;
    Ok(Json(TenantResponse::from(tenant)))
}

// ==== API keys ====

/// Create an API key; the plaintext key is only returned here
#[utoipa::path(
    post,
    path = "/admin/api/tenants/{tenant_id}/api-keys",
    params(("tenant_id" = Uuid, Path, description = "Tenant ID")),
    request_body = CreateApiKeyRequest,
    responses(
        (status = 201, description = "Key created", body = CreatedApiKeyResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 404, description = "Tenant not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_session" = []))
)]
pub async fn create_api_key(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<CreateApiKeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let created = state
        .tenant_service
        .create_api_key(tenant_id, &req.name, req.permissions, req.expiry_utc)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// List a tenant's API keys
#[utoipa::path(
    get,
    path = "/admin/api/tenants/{tenant_id}/api-keys",
    params(("tenant_id" = Uuid, Path, description = "Tenant ID")),
    responses(
        (status = 200, description = "Keys without their secrets", body = [ApiKeyResponse]),
        (status = 404, description = "Tenant not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_session" = []))
)]
pub async fn list_api_keys(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<ApiKeyResponse>>, AppError> {
    Ok(Json(state.tenant_service.list_api_keys(tenant_id).await?))
}

/// Delete an API key
#[utoipa::path(
    delete,
    path = "/admin/api/tenants/{tenant_id}/api-keys/{key_id}",
    params(
        ("tenant_id" = Uuid, Path, description = "Tenant ID"),
        ("key_id" = Uuid, Path, description = "API key ID")
    ),
    responses(
        (status = 200, description = "Key deleted", body = MessageResponse),
        (status = 404, description = "API key not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_session" = []))
)]
pub async fn delete_api_key(
    State(state): State<AppState>,
    Path((tenant_id, key_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<MessageResponse>, AppError> {
    state.tenant_service.delete_api_key(tenant_id, key_id).await?;
    Ok(Json(MessageResponse::new("API key deleted")))
}
