pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod services;
pub mod utils;

use service_core::axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};
use service_core::middleware::{
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{Environment, IdentityConfig, SwaggerMode};
use crate::middleware::{
    authenticate, AdminSessionGuard, ApiKeyAuthenticator, BearerAuthenticator,
};
use crate::repository::Repositories;
use crate::services::{
    AdminSessionService, AuditSink, AuthService, CacheStore, EmailProvider, JwtService,
    LoginAttemptTracker, OAuthLinker, OAuthProvider, SmsProvider, TenantResolver, TenantService,
    TokenIssuer, UserAdminService, VerificationCodeService, VerificationSettings,
};
use service_core::error::AppError;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::session::login,
        handlers::auth::session::refresh,
        handlers::auth::session::logout,
        handlers::auth::session::profile,
        handlers::auth::session::change_password,
        handlers::auth::registration::register,
        handlers::auth::registration::register_with_code,
        handlers::auth::password::request_password_reset,
        handlers::auth::password::reset_password,
        handlers::auth::codes::send_verification_code,
        handlers::auth::codes::verify_code,
        handlers::auth::codes::send_sms_code,
        handlers::auth::codes::verify_sms_code,
        handlers::oauth::oauth_redirect,
        handlers::oauth::oauth_callback,
        handlers::oauth::list_accounts,
        handlers::oauth::link_account,
        handlers::oauth::unlink_account,
        handlers::admin::session::admin_login,
        handlers::admin::session::admin_logout,
        handlers::admin::session::admin_status,
        handlers::admin::tenants::create_tenant,
        handlers::admin::tenants::list_tenants,
        handlers::admin::tenants::get_tenant,
        handlers::admin::tenants::update_tenant,
        handlers::admin::tenants::delete_tenant,
        handlers::admin::tenants::suspend_tenant,
        handlers::admin::tenants::activate_tenant,
        handlers::admin::tenants::create_api_key,
        handlers::admin::tenants::list_api_keys,
        handlers::admin::tenants::delete_api_key,
        handlers::admin::users::list_tenant_users,
        handlers::admin::users::get_user,
        handlers::admin::users::suspend_user,
        handlers::admin::users::activate_user,
        handlers::admin::users::revoke_user_sessions,
        handlers::admin::users::delete_user,
        handlers::tenant::current_tenant,
        handlers::tenant::get_own_tenant,
        handlers::tenant::create_tenant,
        handlers::tenant::list_own_api_keys,
        handlers::tenant::create_own_api_key,
        handlers::tenant::delete_own_api_key,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::auth::RegisterRequest,
            dtos::auth::RegisterWithCodeRequest,
            dtos::auth::LoginRequest,
            dtos::auth::AuthResponse,
            dtos::auth::RefreshRequest,
            dtos::auth::SendEmailCodeRequest,
            dtos::auth::SendSmsCodeRequest,
            dtos::auth::CodeSentResponse,
            dtos::auth::VerifyCodeRequest,
            dtos::auth::VerifyCodeResponse,
            dtos::auth::PasswordResetRequest,
            dtos::auth::PasswordResetConfirm,
            dtos::auth::ChangePasswordRequest,
            dtos::auth::MessageResponse,
            dtos::auth::OAuthLinkRequest,
            dtos::auth::OAuthAccountsResponse,
            dtos::admin::AdminLoginRequest,
            dtos::admin::AdminLoginResponse,
            dtos::admin::AdminStatusResponse,
            dtos::admin::CreateTenantRequest,
            dtos::admin::UpdateTenantRequest,
            dtos::admin::CreateApiKeyRequest,
            services::TokenPair,
            models::UserResponse,
            models::TenantResponse,
            models::ApiKeyResponse,
            models::CreatedApiKeyResponse,
            models::OAuthAccountResponse,
            models::OAuthProviderKind,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Credentials, registration and token lifecycle"),
        (name = "Verification", description = "One-time email and SMS codes"),
        (name = "OAuth", description = "GitHub and Google sign-in and account linking"),
        (name = "User", description = "Signed-in user operations"),
        (name = "Admin", description = "Admin console session, tenant and user administration"),
        (name = "Tenant", description = "Tenant self-service through its API keys"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-api-key"))),
            );
            components.add_security_scheme(
                "admin_session",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new("admin_sid"))),
            );
        }
    }
}

/// External collaborators the service is wired with.
#[derive(Clone)]
pub struct Providers {
    pub cache: Arc<dyn CacheStore>,
    pub email: Arc<dyn EmailProvider>,
    pub sms: Arc<dyn SmsProvider>,
    pub oauth: Arc<dyn OAuthProvider>,
    pub audit: Arc<dyn AuditSink>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub repos: Repositories,
    pub cache: Arc<dyn CacheStore>,
    pub jwt: JwtService,
    pub auth_service: AuthService,
    pub tenant_service: TenantService,
    pub tenant_resolver: TenantResolver,
    pub admin_sessions: AdminSessionService,
    pub user_admin: UserAdminService,
    pub oauth_linker: OAuthLinker,
    pub oauth_provider: Arc<dyn OAuthProvider>,
    pub verification: VerificationCodeService,
    pub auth_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Composition root: every service gets its collaborators here and nowhere else.
    pub fn new(
        config: IdentityConfig,
        repos: Repositories,
        providers: Providers,
    ) -> Result<Self, AppError> {
        let jwt = JwtService::new(&config.jwt).map_err(AppError::ConfigError)?;

        let tokens = TokenIssuer::new(jwt.clone(), repos.users.clone(), repos.tenants.clone());
        let attempts = LoginAttemptTracker::new(
            providers.cache.clone(),
            config.rate_limit.login_max_attempts,
            config.rate_limit.login_window_seconds,
        );

        let verification = VerificationCodeService::new(
            providers.cache.clone(),
            repos.codes.clone(),
            providers.email.clone(),
            providers.sms.clone(),
            VerificationSettings {
                code_ttl_seconds: config.verification.code_ttl_seconds,
                reset_ttl_seconds: config.verification.reset_ttl_seconds,
                resend_interval_seconds: config.rate_limit.code_resend_interval_seconds,
                frontend_url: config.oauth.frontend_url.clone(),
            },
        );

        let auth_service = AuthService::new(
            repos.tenants.clone(),
            repos.users.clone(),
            tokens.clone(),
            attempts.clone(),
            verification.clone(),
            providers.email.clone(),
            providers.audit.clone(),
        );

        let tenant_service = TenantService::new(
            repos.tenants.clone(),
            repos.api_keys.clone(),
            providers.audit.clone(),
        );
        let tenant_resolver = TenantResolver::new(repos.tenants.clone(), repos.api_keys.clone());

        let admin_sessions = AdminSessionService::new(
            repos.tenants.clone(),
            repos.users.clone(),
            jwt.clone(),
            providers.cache.clone(),
            attempts,
            providers.audit.clone(),
        );

        let user_admin = UserAdminService::new(
            repos.tenants.clone(),
            repos.users.clone(),
            tokens.clone(),
            providers.audit.clone(),
        );

        let oauth_linker = OAuthLinker::new(
            repos.tenants.clone(),
            repos.users.clone(),
            repos.oauth_accounts.clone(),
            tokens,
            providers.audit.clone(),
            config.oauth.clone(),
        );

        let auth_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.ip_auth_limit,
            config.rate_limit.ip_auth_window_seconds,
        );
        let ip_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        );

        Ok(Self {
            config,
            repos,
            cache: providers.cache,
            jwt,
            auth_service,
            tenant_service,
            tenant_resolver,
            admin_sessions,
            user_admin,
            oauth_linker,
            oauth_provider: providers.oauth,
            verification,
            auth_rate_limiter,
            ip_rate_limiter,
        })
    }
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Database unreachable")
    ),
    tag = "Observability"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.repos.health.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            "down"
        }
    };
    let cache = match state.cache.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::warn!(error = %e, "Cache health check failed");
            "down"
        }
    };

    // The cache is optional for correctness, the database is not.
    let (status, label) = match (database, cache) {
        ("up", "up") => (StatusCode::OK, "healthy"),
        ("up", _) => (StatusCode::OK, "degraded"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };

    (
        status,
        Json(serde_json::json!({
            "status": label,
            "service": state.config.service_name,
            "version": state.config.service_version,
            "checks": { "database": database, "cache": cache },
        })),
    )
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let api_keys = Arc::new(ApiKeyAuthenticator::new(state.tenant_resolver.clone()));
    let bearer = Arc::new(BearerAuthenticator::new(state.jwt.clone()));
    let admin_guard = Arc::new(AdminSessionGuard::new(state.admin_sessions.clone()));
    let auth_limiter = state.auth_rate_limiter.clone();

    // Tenant-scoped routes, rate limited per IP
    let tenant_routes = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/register-with-code", post(handlers::auth::register_with_code))
        .route(
            "/auth/request-password-reset",
            post(handlers::auth::request_password_reset),
        )
        .route_layer(from_fn_with_state(api_keys, authenticate::<ApiKeyAuthenticator>))
        .route_layer(from_fn_with_state(auth_limiter.clone(), ip_rate_limit_middleware));

    // Code sends cost an email or SMS each
    let code_routes = Router::new()
        .route(
            "/auth/send-verification-code",
            post(handlers::auth::send_verification_code),
        )
        .route("/auth/sms/send-code", post(handlers::auth::send_sms_code))
        .route("/admin/auth/login", post(handlers::admin::admin_login))
        .route_layer(from_fn_with_state(auth_limiter, ip_rate_limit_middleware));

    let user_routes = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/profile", get(handlers::auth::profile))
        .route("/auth/change-password", patch(handlers::auth::change_password))
        .route("/auth/oauth/accounts", get(handlers::list_accounts))
        .route("/auth/oauth/:provider/link", post(handlers::link_account))
        .route("/auth/oauth/:provider", delete(handlers::unlink_account))
        .route_layer(from_fn_with_state(bearer, authenticate::<BearerAuthenticator>));

    // Tenant self-service, one authenticator per required permission
    let tenant_read = Arc::new(
        ApiKeyAuthenticator::new(state.tenant_resolver.clone()).requiring(&["tenant:read"]),
    );
    let tenant_manage = Arc::new(
        ApiKeyAuthenticator::new(state.tenant_resolver.clone()).requiring(&["tenant:manage"]),
    );
    let tenant_create = Arc::new(
        ApiKeyAuthenticator::new(state.tenant_resolver.clone()).requiring(&["tenant:create"]),
    );

    let tenant_read_routes = Router::new()
        .route("/tenant", get(handlers::tenant::current_tenant))
        .route("/tenant/api-keys", get(handlers::tenant::list_own_api_keys))
        .route("/tenant/:tenant_id", get(handlers::tenant::get_own_tenant))
        .route_layer(from_fn_with_state(tenant_read, authenticate::<ApiKeyAuthenticator>));

    let tenant_manage_routes = Router::new()
        .route("/tenant/api-keys", post(handlers::tenant::create_own_api_key))
        .route(
            "/tenant/api-keys/:key_id",
            delete(handlers::tenant::delete_own_api_key),
        )
        .route_layer(from_fn_with_state(tenant_manage, authenticate::<ApiKeyAuthenticator>));

    let tenant_create_routes = Router::new()
        .route("/tenant", post(handlers::tenant::create_tenant))
        .route_layer(from_fn_with_state(tenant_create, authenticate::<ApiKeyAuthenticator>));

    let admin_routes = Router::new()
        .route("/admin/auth/status", get(handlers::admin::admin_status))
        .route(
            "/admin/api/tenants",
            get(handlers::admin::list_tenants).post(handlers::admin::create_tenant),
        )
        .route(
            "/admin/api/tenants/:tenant_id",
            get(handlers::admin::get_tenant)
                .patch(handlers::admin::update_tenant)
                .delete(handlers::admin::delete_tenant),
        )
        .route(
            "/admin/api/tenants/:tenant_id/suspend",
            post(handlers::admin::suspend_tenant),
        )
        .route(
            "/admin/api/tenants/:tenant_id/activate",
            post(handlers::admin::activate_tenant),
        )
        .route(
            "/admin/api/tenants/:tenant_id/api-keys",
            get(handlers::admin::list_api_keys).post(handlers::admin::create_api_key),
        )
        .route(
            "/admin/api/tenants/:tenant_id/api-keys/:key_id",
            delete(handlers::admin::delete_api_key),
        )
        .route(
            "/admin/api/tenants/:tenant_id/users",
            get(handlers::admin::list_tenant_users),
        )
        .route(
            "/admin/api/users/:user_id",
            get(handlers::admin::get_user).delete(handlers::admin::delete_user),
        )
        .route(
            "/admin/api/users/:user_id/suspend",
            post(handlers::admin::suspend_user),
        )
        .route(
            "/admin/api/users/:user_id/activate",
            post(handlers::admin::activate_user),
        )
        .route(
            "/admin/api/users/:user_id/revoke-sessions",
            post(handlers::admin::revoke_user_sessions),
        )
        .route_layer(from_fn_with_state(admin_guard, authenticate::<AdminSessionGuard>));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/auth/verify-code", post(handlers::auth::verify_code))
        .route("/auth/sms/verify-code", post(handlers::auth::verify_sms_code))
        .route("/auth/reset-password", post(handlers::auth::reset_password))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/oauth/:provider", get(handlers::oauth_redirect))
        .route("/auth/oauth/:provider/callback", get(handlers::oauth_callback))
        .route("/admin/auth/logout", post(handlers::admin::admin_logout));

    let swagger_enabled = match state.config.environment {
        Environment::Dev => true,
        Environment::Prod => state.config.swagger.enabled == SwaggerMode::Public,
    };

    if swagger_enabled {
        app = app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    }

    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .security
                .allowed_origins
                .iter()
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                        None
                    }
                })
                .collect::<Vec<HeaderValue>>(),
        )
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ]);

    let ip_limiter = state.ip_rate_limiter.clone();

    let app = app
        .merge(tenant_routes)
        .merge(code_routes)
        .merge(user_routes)
        .merge(tenant_read_routes)
        .merge(tenant_manage_routes)
        .merge(tenant_create_routes)
        .merge(admin_routes)
        .with_state(state)
        // Global IP rate limiting
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(cors);

    Ok(app)
}
