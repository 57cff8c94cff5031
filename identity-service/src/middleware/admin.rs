//! Session guard for the admin console.
//!
//! The admin token is looked up in order: Authorization header, the
//! `admin_token` cookie, then the server-side session named by the
//! `admin_sid` cookie. Failures clear both cookies. API callers get a JSON
//! 401/403 and browsers are redirected to the login page.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde_json::json;
use service_core::error::AppError;

use super::auth::{bearer_token, Authenticator};
use crate::models::User;
use crate::services::{AdminSessionService, ServiceError};

pub const ADMIN_TOKEN_COOKIE: &str = "admin_token";
pub const ADMIN_SID_COOKIE: &str = "admin_sid";
pub const ADMIN_LOGIN_PATH: &str = "/admin/login";

/// Administrator attached to the request by the guard.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

pub struct AdminSessionGuard {
    sessions: AdminSessionService,
}

impl AdminSessionGuard {
    pub fn new(sessions: AdminSessionService) -> Self {
        Self { sessions }
    }

    async fn token(&self, parts: &Parts) -> Option<String> {
        if let Some(token) = bearer_token(parts) {
            return Some(token.to_string());
        }

        let jar = CookieJar::from_headers(&parts.headers);
        if let Some(cookie) = jar.get(ADMIN_TOKEN_COOKIE).filter(|c| !c.value().is_empty()) {
            return Some(cookie.value().to_string());
        }

        match jar.get(ADMIN_SID_COOKIE) {
            Some(sid) => self.sessions.session_token(sid.value()).await,
            None => None,
        }
    }
}

fn wants_json(parts: &Parts) -> bool {
    parts.uri.path().starts_with("/admin/api/")
        || parts
            .headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("application/json"))
}

/// Removal cookies for both admin credentials, for whichever the browser sent.
pub fn clear_admin_cookies(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ADMIN_TOKEN_COOKIE).path("/"))
        .remove(Cookie::build(ADMIN_SID_COOKIE).path("/"))
}

#[async_trait]
impl Authenticator for AdminSessionGuard {
    type Identity = AdminUser;

    async fn authenticate(&self, parts: &Parts) -> Result<AdminUser, ServiceError> {
        let token = self
            .token(parts)
            .await
            .ok_or_else(|| ServiceError::Authentication("Authentication required".to_string()))?;

        let user = self.sessions.authenticate(&token).await?;
        Ok(AdminUser(user))
    }

    fn reject(&self, parts: &Parts, err: ServiceError) -> Response {
        let jar = clear_admin_cookies(CookieJar::from_headers(&parts.headers));

        let (status, message) = match &err {
            ServiceError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ServiceError::Authentication(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            other => {
                tracing::error!(error = %other, "Admin session check failed");
                (StatusCode::UNAUTHORIZED, "Authentication required".to_string())
            }
        };

        if wants_json(parts) {
            let body = Json(json!({
                "success": false,
                "message": message,
                "redirectTo": ADMIN_LOGIN_PATH,
            }));
            return (status, jar, body).into_response();
        }

        let return_url = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/admin");
        let location = format!(
            "{}?returnUrl={}",
            ADMIN_LOGIN_PATH,
            urlencoding::encode(return_url)
        );
        (jar, Redirect::to(&location)).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AdminUser>().cloned().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!("Admin user missing from request extensions"))
        })
    }
}
