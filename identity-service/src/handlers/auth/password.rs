use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::auth::{MessageResponse, PasswordResetConfirm, PasswordResetRequest},
    middleware::CurrentTenant,
    utils::ValidatedJson,
    AppState,
};

pub const RESET_ACK: &str =
    "If your email is registered, you will receive a password reset link shortly.";

/// Request a password reset link
#[utoipa::path(
    post,
    path = "/auth/request-password-reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Request received", body = MessageResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("api_key" = []))
)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    ValidatedJson(req): ValidatedJson<PasswordResetRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .request_password_reset(&req.email, tenant.tenant_id())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, tenant_id = %tenant.tenant_id(), "Failed to process password reset request");
            e
        })?;

    Ok((StatusCode::OK, Json(MessageResponse::new(RESET_ACK))))
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = PasswordResetConfirm,
    responses(
        (status = 200, description = "Password reset successful", body = MessageResponse),
        (status = 400, description = "Invalid or expired token, or weak password", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PasswordResetConfirm>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .reset_password(&req.token, &req.new_password)
        .await?;
    Ok((StatusCode::OK, Json(MessageResponse::new("Password reset successfully"))))
}
