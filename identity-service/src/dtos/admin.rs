use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::UserResponse;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AdminLoginRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "admin@example.com")]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminLoginResponse {
    pub success: bool,
    pub user: UserResponse,
    pub access_token: String,
    #[schema(example = 900)]
    pub expires_in: i64,
    #[schema(example = "/admin")]
    pub redirect_to: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminStatusResponse {
    pub authenticated: bool,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateTenantRequest {
    #[validate(length(min = 1, max = 100, message = "Tenant name is required"))]
    #[schema(example = "Acme")]
    pub name: String,

    #[validate(length(max = 255))]
    #[schema(example = "acme.com")]
    pub domain: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateTenantRequest {
    #[validate(length(min = 1, max = 100, message = "Tenant name cannot be empty"))]
    pub name: Option<String>,

    /// An empty string removes the domain.
    #[validate(length(max = 255))]
    pub domain: Option<String>,

    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 100, message = "Key name is required"))]
    #[schema(example = "billing-backend")]
    pub name: String,

    #[serde(default)]
    #[schema(example = json!(["users:read"]))]
    pub permissions: Vec<String>,

    pub expiry_utc: Option<DateTime<Utc>>,
}
