use service_core::{
    axum::{extract::State, Json},
    error::AppError,
};

use crate::{
    dtos::auth::{
        CodeSentResponse, SendEmailCodeRequest, SendSmsCodeRequest, VerifyCodeRequest,
        VerifyCodeResponse,
    },
    services::{IssuedCode, Redemption},
    utils::ValidatedJson,
    AppState,
};

fn sent(issued: IssuedCode) -> Json<CodeSentResponse> {
    Json(CodeSentResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        message: "Verification code sent".to_string(),
    })
}

fn verified(redemption: Redemption) -> Json<VerifyCodeResponse> {
    Json(VerifyCodeResponse {
        valid: redemption.valid,
        target: redemption.target,
    })
}

/// Email a six digit verification code
#[utoipa::path(
    post,
    path = "/auth/send-verification-code",
    request_body = SendEmailCodeRequest,
    responses(
        (status = 200, description = "Code sent", body = CodeSentResponse),
        (status = 429, description = "A code was sent too recently", body = ErrorResponse),
        (status = 502, description = "Email delivery failed", body = ErrorResponse)
    ),
    tag = "Verification"
)]
pub async fn send_verification_code(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<SendEmailCodeRequest>,
) -> Result<Json<CodeSentResponse>, AppError> {
    let issued = state.auth_service.send_email_code(&req.email).await?;
    Ok(sent(issued))
}

/// Check an emailed code
#[utoipa::path(
    post,
    path = "/auth/verify-code",
    request_body = VerifyCodeRequest,
    responses(
        (status = 200, description = "Verification result", body = VerifyCodeResponse)
    ),
    tag = "Verification"
)]
pub async fn verify_code(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyCodeRequest>,
) -> Result<Json<VerifyCodeResponse>, AppError> {
    let redemption = state
        .auth_service
        .verify_email_code(&req.token, &req.code)
        .await?;
    Ok(verified(redemption))
}

/// Text a six digit verification code
#[utoipa::path(
    post,
    path = "/auth/sms/send-code",
    request_body = SendSmsCodeRequest,
    responses(
        (status = 200, description = "Code sent", body = CodeSentResponse),
        (status = 429, description = "A code was sent too recently", body = ErrorResponse),
        (status = 502, description = "SMS delivery failed", body = ErrorResponse)
    ),
    tag = "Verification"
)]
pub async fn send_sms_code(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<SendSmsCodeRequest>,
) -> Result<Json<CodeSentResponse>, AppError> {
    let issued = state.auth_service.send_sms_code(&req.phone_number).await?;
    Ok(sent(issued))
}

/// Check a texted code
#[utoipa::path(
    post,
    path = "/auth/sms/verify-code",
    request_body = VerifyCodeRequest,
    responses(
        (status = 200, description = "Verification result", body = VerifyCodeResponse)
    ),
    tag = "Verification"
)]
pub async fn verify_sms_code(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyCodeRequest>,
) -> Result<Json<VerifyCodeResponse>, AppError> {
    let redemption = state
        .auth_service
        .verify_sms_code(&req.token, &req.code)
        .await?;
    Ok(verified(redemption))
}
