use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::auth::{AuthResponse, RegisterRequest, RegisterWithCodeRequest},
    middleware::CurrentTenant,
    utils::ValidatedJson,
    AppState,
};

/// Register a new user in the caller's tenant
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 400, description = "Validation error or weak password", body = ErrorResponse),
        (status = 409, description = "Email or username already taken", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("api_key" = []))
)]
pub async fn register(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (user, tokens) = state
        .auth_service
        .register(req, tenant.tenant_id())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: user.sanitized(),
            tokens,
        }),
    ))
}

/// Register with an email address proven by a verification code
#[utoipa::path(
    post,
    path = "/auth/register-with-code",
    request_body = RegisterWithCodeRequest,
    responses(
        (status = 201, description = "User registered and verified", body = AuthResponse),
        (status = 400, description = "Invalid code or validation error", body = ErrorResponse),
        (status = 409, description = "Email or username already taken", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("api_key" = []))
)]
pub async fn register_with_code(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    ValidatedJson(req): ValidatedJson<RegisterWithCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (user, tokens) = state
        .auth_service
        .register_with_code(req, tenant.tenant_id())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: user.sanitized(),
            tokens,
        }),
    ))
}
