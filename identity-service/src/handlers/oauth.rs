//! Provider sign-in handlers (GitHub and Google).
//!
//! The browser flow is redirect, provider consent, callback. The callback never
//! answers with an error body: it redirects to the frontend either with a token
//! pair or with an error code.

use service_core::{
    axum::{
        extract::{Path, Query, State},
        http::StatusCode,
        response::{IntoResponse, Redirect},
        Json,
    },
    error::AppError,
};

use crate::{
    dtos::auth::{
        MessageResponse, OAuthAccountsResponse, OAuthCallbackQuery, OAuthLinkRequest,
        OAuthRedirectQuery,
    },
    middleware::AuthUser,
    models::OAuthProviderKind,
    services::{oauth::parse_state, ServiceError, TokenPair},
    utils::ValidatedJson,
    AppState,
};

fn provider_kind(provider: &str) -> Result<OAuthProviderKind, AppError> {
    provider
        .parse::<OAuthProviderKind>()
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))
}

/// Start provider sign-in
#[utoipa::path(
    get,
    path = "/auth/oauth/{provider}",
    params(
        ("provider" = String, Path, description = "github or google"),
        OAuthRedirectQuery
    ),
    responses(
        (status = 303, description = "Redirect to the provider consent page"),
        (status = 400, description = "Unsupported provider", body = ErrorResponse)
    ),
    tag = "OAuth"
)]
pub async fn oauth_redirect(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthRedirectQuery>,
) -> Result<Redirect, AppError> {
    let provider = provider_kind(&provider)?;
    let url = state.oauth_linker.authorization_url(provider, query.tenant_id);
    Ok(Redirect::to(&url))
}

/// Provider callback
#[utoipa::path(
    get,
    path = "/auth/oauth/{provider}/callback",
    params(
        ("provider" = String, Path, description = "github or google"),
        OAuthCallbackQuery
    ),
    responses(
        (status = 303, description = "Redirect to the frontend with tokens or an error code")
    ),
    tag = "OAuth"
)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Redirect {
    let frontend = state.oauth_linker.frontend_url().trim_end_matches('/').to_string();

    match complete_sign_in(&state, &provider, query).await {
        Ok(tokens) => Redirect::to(&format!(
            "{}/auth/callback?access_token={}&refresh_token={}",
            frontend,
            urlencoding::encode(&tokens.access_token),
            urlencoding::encode(&tokens.refresh_token),
        )),
        Err(e) => {
            tracing::warn!(provider = %provider, error = %e, "OAuth callback failed");
            Redirect::to(&format!("{}/auth/error?error=oauth_callback_failed", frontend))
        }
    }
}

async fn complete_sign_in(
    state: &AppState,
    provider: &str,
    query: OAuthCallbackQuery,
) -> Result<TokenPair, ServiceError> {
    if let Some(error) = query.error {
        return Err(ServiceError::Validation(format!("Provider returned error: {}", error)));
    }

    let provider = provider
        .parse::<OAuthProviderKind>()
        .map_err(ServiceError::Validation)?;
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ServiceError::Validation("Missing authorization code".to_string()))?;
    let oauth_state = parse_state(query.state.as_deref().unwrap_or_default())?;

    let identity = state
        .oauth_provider
        .exchange_code(provider, &code)
        .await
        .map_err(|e| ServiceError::Authentication(format!("Code exchange failed: {}", e)))?;

    let (_, tokens) = state
        .oauth_linker
        .handle_login(identity, oauth_state.tenant_id)
        .await?;
    Ok(tokens)
}

/// Linked provider accounts of the current user
#[utoipa::path(
    get,
    path = "/auth/oauth/accounts",
    responses(
        (status = 200, description = "Linked accounts", body = OAuthAccountsResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "OAuth",
    security(("bearer_auth" = []))
)]
pub async fn list_accounts(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<OAuthAccountsResponse>, AppError> {
    let accounts = state.oauth_linker.list_accounts(user.user_id()?).await?;
    Ok(Json(OAuthAccountsResponse { accounts }))
}

/// Link a provider account to the current user
#[utoipa::path(
    post,
    path = "/auth/oauth/{provider}/link",
    params(("provider" = String, Path, description = "github or google")),
    request_body = OAuthLinkRequest,
    responses(
        (status = 201, description = "Account linked", body = OAuthAccountsResponse),
        (status = 401, description = "Invalid token or code", body = ErrorResponse),
        (status = 409, description = "Provider already linked or identity claimed", body = ErrorResponse)
    ),
    tag = "OAuth",
    security(("bearer_auth" = []))
)]
pub async fn link_account(
    State(state): State<AppState>,
    user: AuthUser,
    Path(provider): Path<String>,
    ValidatedJson(req): ValidatedJson<OAuthLinkRequest>,
) -> Result<impl IntoResponse, AppError> {
    let provider = provider_kind(&provider)?;
    let user_id = user.user_id()?;

    let identity = state
        .oauth_provider
        .exchange_code(provider, &req.code)
        .await
        .map_err(|e| {
            tracing::warn!(provider = provider.as_str(), error = %e, "OAuth code exchange failed");
            AppError::AuthError(anyhow::anyhow!("Invalid authorization code"))
        })?;

    state.oauth_linker.link(user_id, &identity).await?;
    let accounts = state.oauth_linker.list_accounts(user_id).await?;
    Ok((StatusCode::CREATED, Json(OAuthAccountsResponse { accounts })))
}

/// Unlink a provider account from the current user
#[utoipa::path(
    delete,
    path = "/auth/oauth/{provider}",
    params(("provider" = String, Path, description = "github or google")),
    responses(
        (status = 200, description = "Account unlinked", body = MessageResponse),
        (status = 404, description = "No linked account for provider", body = ErrorResponse)
    ),
    tag = "OAuth",
    security(("bearer_auth" = []))
)]
pub async fn unlink_account(
    State(state): State<AppState>,
    user: AuthUser,
    Path(provider): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let provider = provider_kind(&provider)?;
    state.oauth_linker.unlink(user.user_id()?, provider).await?;
    Ok(Json(MessageResponse::new(format!(
        "{} account unlinked",
        provider.as_str()
    ))))
}
