use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use service_core::error::AppError;
use std::sync::Arc;

use crate::services::{AccessTokenClaims, JwtService, ServiceError};

/// A way of proving who is calling.
///
/// Each implementation pulls its credential from the request head and either
/// yields an identity, which the `authenticate` middleware stores in request
/// extensions, or an error turned into a response by `reject`.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    type Identity: Clone + Send + Sync + 'static;

    async fn authenticate(&self, parts: &Parts) -> Result<Self::Identity, ServiceError>;

    fn reject(&self, _parts: &Parts, err: ServiceError) -> Response {
        AppError::from(err).into_response()
    }
}

/// Middleware running an `Authenticator` ahead of the wrapped routes.
pub async fn authenticate<A: Authenticator>(
    State(authenticator): State<Arc<A>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    match authenticator.authenticate(&parts).await {
        Ok(identity) => {
            parts.extensions.insert(identity);
            next.run(Request::from_parts(parts, body)).await
        }
        Err(err) => {
            tracing::debug!(error = %err, path = %parts.uri.path(), "Request not authenticated");
            authenticator.reject(&parts, err)
        }
    }
}

/// Token after `Bearer ` in the Authorization header.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// End-user access tokens.
pub struct BearerAuthenticator {
    jwt: JwtService,
}

impl BearerAuthenticator {
    pub fn new(jwt: JwtService) -> Self {
        Self { jwt }
    }
}

#[async_trait]
impl Authenticator for BearerAuthenticator {
    type Identity = AccessTokenClaims;

    async fn authenticate(&self, parts: &Parts) -> Result<AccessTokenClaims, ServiceError> {
        let token = bearer_token(parts).ok_or_else(|| {
            ServiceError::Authentication("Missing or invalid Authorization header".to_string())
        })?;

        self.jwt
            .validate_access_token(token)
            .map_err(|_| ServiceError::Authentication("Invalid or expired token".to_string()))
    }
}

/// Extractor to easily get claims in handlers
pub struct AuthUser(pub AccessTokenClaims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = parts.extensions.get::<AccessTokenClaims>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!("Auth claims missing from request extensions"))
        })?;

        Ok(AuthUser(claims.clone()))
    }
}

impl AuthUser {
    pub fn user_id(&self) -> Result<uuid::Uuid, AppError> {
        self.0
            .user_id()
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Invalid token subject")))
    }
}
