use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::models::{OAuthAccountResponse, UserResponse};
use crate::services::TokenPair;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "a@x.com")]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    #[schema(example = "Secure123!", min_length = 8)]
    pub password: String,

    #[validate(length(min = 1, max = 50, message = "First name is required"))]
    #[schema(example = "Ada")]
    pub first_name: String,

    #[validate(length(min = 1, max = 50, message = "Last name is required"))]
    #[schema(example = "Lovelace")]
    pub last_name: String,

    #[validate(length(min = 3, max = 50, message = "Username must be 3-50 characters"))]
    #[schema(example = "ada")]
    pub username: Option<String>,

    #[schema(example = "+15550100")]
    pub phone_number: Option<String>,

    #[schema(example = "GB")]
    pub country: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterWithCodeRequest {
    #[serde(flatten)]
    #[validate(nested)]
    pub profile: RegisterRequest,

    #[validate(length(min = 1, message = "Verification token is required"))]
    pub verification_token: String,

    #[validate(length(equal = 6, message = "Verification code must be 6 digits"))]
    #[schema(example = "123456")]
    pub verification_code: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "a@x.com")]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "Secure123!")]
    pub password: String,
}

/// User profile plus a fresh token pair.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub user: UserResponse,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    #[schema(example = "eyJhbGciOiJIUzI1NiJ9...")]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SendEmailCodeRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "a@x.com")]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SendSmsCodeRequest {
    #[validate(length(min = 6, max = 20, message = "Invalid phone number"))]
    #[schema(example = "+15550100")]
    pub phone_number: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CodeSentResponse {
    /// Redemption token to send back with the code.
    pub token: String,
    pub expires_at: DateTime<Utc>,
    #[schema(example = "Verification code sent")]
    pub message: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyCodeRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,

    #[validate(length(equal = 6, message = "Verification code must be 6 digits"))]
    #[schema(example = "123456")]
    pub code: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyCodeResponse {
    pub valid: bool,
    /// Address the code was sent to, present only when valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PasswordResetRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "a@x.com")]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PasswordResetConfirm {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    #[schema(example = "NewSecure123!", min_length = 8)]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub old_password: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    #[schema(example = "NewSecure123!", min_length = 8)]
    pub new_password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    #[schema(example = "Operation completed")]
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct OAuthRedirectQuery {
    /// Tenant the provider account should sign in to. The default tenant when absent.
    pub tenant_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct OAuthLinkRequest {
    /// Authorization code obtained from the provider.
    #[validate(length(min = 1, message = "Authorization code is required"))]
    pub code: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OAuthAccountsResponse {
    pub accounts: Vec<OAuthAccountResponse>,
}
