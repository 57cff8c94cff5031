use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::auth::{AuthResponse, ChangePasswordRequest, LoginRequest, MessageResponse, RefreshRequest},
    middleware::{AuthUser, CurrentTenant},
    models::UserResponse,
    utils::ValidatedJson,
    AppState,
};

/// Login with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 400, description = "Tenant inactive or validation error", body = ErrorResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 429, description = "Too many login attempts", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("api_key" = []))
)]
pub async fn login(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (user, tokens) = state
        .auth_service
        .login(&req, Some(tenant.tenant_id()))
        .await?;
    Ok((
        StatusCode::OK,
        Json(AuthResponse {
            user: user.sanitized(),
            tokens,
        }),
    ))
}

/// Exchange a refresh token for a new pair
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed successfully", body = AuthResponse),
        (status = 401, description = "Invalid refresh token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (user, tokens) = state.auth_service.refresh(&req.refresh_token).await?;
    Ok((
        StatusCode::OK,
        Json(AuthResponse {
            user: user.sanitized(),
            tokens,
        }),
    ))
}

/// Logout and invalidate the refresh token
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logged out successfully", body = MessageResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    state.auth_service.logout(user.user_id()?).await?;
    Ok((StatusCode::OK, Json(MessageResponse::new("Logged out successfully"))))
}

/// Current user's profile
#[utoipa::path(
    get,
    path = "/auth/profile",
    responses(
        (status = 200, description = "User profile", body = UserResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "User",
    security(("bearer_auth" = []))
)]
pub async fn profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.auth_service.profile(user.user_id()?).await?;
    Ok(Json(user.sanitized()))
}

/// Change password with the current one
#[utoipa::path(
    patch,
    path = "/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Password does not meet requirements", body = ErrorResponse),
        (status = 401, description = "Current password is incorrect", body = ErrorResponse)
    ),
    tag = "User",
    security(("bearer_auth" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .change_password(user.user_id()?, &req.old_password, &req.new_password)
        .await?;
    Ok((StatusCode::OK, Json(MessageResponse::new("Password changed successfully"))))
}
