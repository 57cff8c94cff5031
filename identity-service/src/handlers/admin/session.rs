use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use service_core::error::AppError;

use crate::{
    config::Environment,
    dtos::{
        admin::{AdminLoginRequest, AdminLoginResponse, AdminStatusResponse},
        auth::MessageResponse,
    },
    middleware::{admin::clear_admin_cookies, AdminUser, ADMIN_SID_COOKIE, ADMIN_TOKEN_COOKIE},
    utils::ValidatedJson,
    AppState,
};

fn session_cookie(name: &'static str, value: String, max_age_seconds: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(max_age_seconds))
        .build()
}

/// Sign in to the admin console
#[utoipa::path(
    post,
    path = "/admin/auth/login",
    request_body = AdminLoginRequest,
    responses(
        (status = 200, description = "Signed in; session cookies set", body = AdminLoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 429, description = "Too many login attempts", body = ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn admin_login(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<AdminLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.admin_sessions.login(&req.email, &req.password).await?;
    let secure = state.config.environment == Environment::Prod;

    let jar = jar
        .add(session_cookie(
            ADMIN_TOKEN_COOKIE,
            session.access_token.clone(),
            session.expires_in,
            secure,
        ))
        .add(session_cookie(
            ADMIN_SID_COOKIE,
            session.session_id.clone(),
            session.expires_in,
            secure,
        ));

    Ok((
        StatusCode::OK,
        jar,
        Json(AdminLoginResponse {
            success: true,
            user: session.user.sanitized(),
            access_token: session.access_token,
            expires_in: session.expires_in,
            redirect_to: "/admin".to_string(),
        }),
    ))
}

/// Sign out of the admin console
#[utoipa::path(
    post,
    path = "/admin/auth/logout",
    responses(
        (status = 200, description = "Signed out; session cookies cleared", body = MessageResponse)
    ),
    tag = "Admin"
)]
pub async fn admin_logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let sid = jar.get(ADMIN_SID_COOKIE).map(|c| c.value().to_string());
    state.admin_sessions.logout(sid.as_deref()).await;

    (
        StatusCode::OK,
        clear_admin_cookies(jar),
        Json(MessageResponse::new("Logged out successfully")),
    )
}

/// Current admin session
#[utoipa::path(
    get,
    path = "/admin/auth/status",
    responses(
        (status = 200, description = "Session is valid", body = AdminStatusResponse),
        (status = 401, description = "No valid session")
    ),
    tag = "Admin",
    security(("bearer_auth" = []), ("admin_session" = []))
)]
pub async fn admin_status(AdminUser(user): AdminUser) -> Json<AdminStatusResponse> {
    Json(AdminStatusResponse {
        authenticated: true,
        user: user.sanitized(),
    })
}
