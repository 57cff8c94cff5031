use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Credentials, tokens or sessions did not check out. The message is safe to show.
    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Tenant(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("Password does not meet requirements")]
    WeakPassword(Vec<String>),

    #[error("{message}")]
    RateLimited {
        message: String,
        retry_after: Option<u64>,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Storage error: {0}")]
    Storage(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn invalid_credentials() -> Self {
        ServiceError::Authentication("Invalid credentials".to_string())
    }

    pub fn invalid_refresh_token() -> Self {
        ServiceError::Authentication("Invalid refresh token".to_string())
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Authentication(msg) => AppError::AuthError(anyhow::anyhow!(msg)),
            ServiceError::Tenant(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            ServiceError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::WeakPassword(violations) => AppError::BadRequest(anyhow::anyhow!(
                "Password does not meet requirements: {}",
                violations.join("; ")
            )),
            ServiceError::RateLimited {
                message,
                retry_after,
            } => AppError::TooManyRequests(message, retry_after),
            ServiceError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            ServiceError::Forbidden(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            ServiceError::Notification(msg) => AppError::BadGateway(msg),
            ServiceError::Storage(e) => AppError::DatabaseError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
