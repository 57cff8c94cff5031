use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::auth::MessageResponse, middleware::AdminUser, models::UserResponse, AppState,
};

/// List a tenant's users
#[utoipa::path(
    get,
    path = "/admin/api/tenants/{tenant_id}/users",
    params(("tenant_id" = Uuid, Path, description = "Tenant ID")),
    responses(
        (status = 200, description = "Users, oldest first", body = [UserResponse]),
        (status = 404, description = "Tenant not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_session" = []))
)]
pub async fn list_tenant_users(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<UserResponse>>, AppError> {
    let users = state.user_admin.list_tenant_users(tenant_id).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// Get a user
#[utoipa::path(
    get,
    path = "/admin/api/users/{user_id}",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_session" = []))
)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.user_admin.get(user_id).await?;
    Ok(Json(UserResponse::from(user)))
}

/// Suspend a user and end their refresh session
#[utoipa::path(
    post,
    path = "/admin/api/users/{user_id}/suspend",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User suspended", body = UserResponse),
        (status = 400, description = "Own account", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_session" = []))
)]
pub async fn suspend_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.user_admin.suspend(admin.user_id, user_id).await?;
    Ok(Json(UserResponse::from(user)))
}

/// Reactivate a suspended user
#[utoipa::path(
    post,
    path = "/admin/api/users/{user_id}/activate",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User activated", body = UserResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_session" = []))
)]
pub async fn activate_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.user_admin.activate(admin.user_id, user_id).await?;
    Ok(Json(UserResponse::from(user)))
}

/// Invalidate a user's refresh token
#[utoipa::path(
    post,
    path = "/admin/api/users/{user_id}/revoke-sessions",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Sessions revoked", body = MessageResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_session" = []))
)]
pub async fn revoke_user_sessions(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    state.user_admin.revoke_sessions(admin.user_id, user_id).await?;
    Ok(Json(MessageResponse::new("Sessions revoked")))
}

/// Delete a user and their linked provider accounts
#[utoipa::path(
    delete,
    path = "/admin/api/users/{user_id}",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deleted", body = MessageResponse),
        (status = 400, description = "Own account", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_session" = []))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    state.user_admin.delete(admin.user_id, user_id).await?;
    Ok(Json(MessageResponse::new("User deleted")))
}
