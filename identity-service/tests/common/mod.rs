//! Shared setup for identity-service integration tests.
//!
//! Every test gets its own router wired to an in-memory store and mock
//! providers, and drives it with `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use identity_service::{
    build_router,
    config::{
        AdminConfig, DatabaseConfig, Environment, IdentityConfig, JwtConfig, OAuthClientConfig, OAuthConfig,
        RateLimitConfig, RedisConfig, SecurityConfig, SmsConfig, SmtpConfig, SwaggerConfig,
        SwaggerMode, TelemetryConfig, VerificationConfig,
    },
    models::{Tenant, User, UserRole},
    repository::{InMemoryStore, Repositories, TenantRepository, UserRepository},
    services::{MockAuditSink, MockCache, MockEmailService, MockOAuthProvider, MockSmsProvider},
    utils::password::{hash_password, Password},
    AppState, Providers,
};
use secrecy::Secret;
use serde_json::Value;
use service_core::axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use std::sync::Arc;
use tower::ServiceExt;

pub const PASSWORD: &str = "Secure123!";
pub const FRONTEND_URL: &str = "http://app.test";

pub fn test_config() -> IdentityConfig {
    IdentityConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "identity-service".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://unused".to_string(),
        },
        jwt: JwtConfig {
            access_secret: Secret::new("test-access-secret".to_string()),
            refresh_secret: Secret::new("test-refresh-secret".to_string()),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 2525,
            user: String::new(),
            password: Secret::new(String::new()),
            from: "no-reply@identity.test".to_string(),
        },
        sms: SmsConfig {
            api_key: String::new(),
            api_secret: Secret::new(String::new()),
            from: "Identity".to_string(),
        },
        oauth: OAuthConfig {
            github: OAuthClientConfig {
                client_id: "gh-client".to_string(),
                client_secret: Secret::new("gh-secret".to_string()),
            },
            google: OAuthClientConfig {
                client_id: "google-client".to_string(),
                client_secret: Secret::new("google-secret".to_string()),
            },
            public_base_url: "http://identity.test".to_string(),
            frontend_url: FRONTEND_URL.to_string(),
        },
        security: SecurityConfig {
            allowed_origins: vec![FRONTEND_URL.to_string()],
        },
        swagger: SwaggerConfig {
            enabled: SwaggerMode::Disabled,
        },
        rate_limit: RateLimitConfig {
            login_max_attempts: 5,
            login_window_seconds: 900,
            code_resend_interval_seconds: 60,
            ip_auth_limit: 10_000,
            ip_auth_window_seconds: 60,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
        verification: VerificationConfig {
            code_ttl_seconds: 600,
            reset_ttl_seconds: 3600,
            cleanup_interval_seconds: 300,
        },
        telemetry: TelemetryConfig::default(),
        admin: AdminConfig {
            email: "admin@identity.test".to_string(),
            password: Some(Secret::new(PASSWORD.to_string())),
        },
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect()
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub cache: Arc<MockCache>,
    pub email: Arc<MockEmailService>,
    pub sms: Arc<MockSmsProvider>,
    pub oauth: Arc<MockOAuthProvider>,
    pub audit: Arc<MockAuditSink>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: IdentityConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(MockCache::new());
        let email = Arc::new(MockEmailService::new());
        let sms = Arc::new(MockSmsProvider::new());
        let oauth = Arc::new(MockOAuthProvider::new());
        let audit = Arc::new(MockAuditSink::new());

        let providers = Providers {
            cache: cache.clone(),
            email: email.clone(),
            sms: sms.clone(),
            oauth: oauth.clone(),
            audit: audit.clone(),
        };

        let state = AppState::new(config, Repositories::from_store(store.clone()), providers)
            .expect("Failed to build app state");
        let router = build_router(state.clone())
            .await
            .expect("Failed to build router");

        Self {
            router,
            state,
            store,
            cache,
            email,
            sms,
            oauth,
            audit,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("Failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Router is infallible");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn post(&self, uri: &str, headers: &[(&str, &str)], body: Value) -> TestResponse {
        self.request(Method::POST, uri, headers, Some(body)).await
    }

    pub async fn get(&self, uri: &str, headers: &[(&str, &str)]) -> TestResponse {
        self.request(Method::GET, uri, headers, None).await
    }

    pub async fn create_tenant(&self, name: &str) -> Tenant {
        let tenant = Tenant::new(name.to_string(), None);
        TenantRepository::insert(self.store.as_ref(), &tenant)
            .await
            .expect("Failed to insert tenant");
        tenant
    }

    /// Tenant-less system administrator.
    pub async fn create_admin(&self, email: &str) -> User {
        let hash = hash_password(&Password::new(PASSWORD.to_string()))
            .expect("Failed to hash password");
        let mut user = User::new(uuid::Uuid::new_v4(), email, hash.into_string());
        user.tenant_id = None;
        user.is_system_admin = true;
        user.role_code = UserRole::SuperAdmin.as_str().to_string();
        UserRepository::insert(self.store.as_ref(), &user)
            .await
            .expect("Failed to insert admin");
        user
    }

    /// Register through the API and return the response body.
    pub async fn register(&self, tenant: &Tenant, email: &str) -> TestResponse {
        self.post(
            "/auth/register",
            &[("x-api-key", tenant.primary_api_key.as_str())],
            register_body(email),
        )
        .await
    }

    pub async fn login(&self, tenant: &Tenant, email: &str, password: &str) -> TestResponse {
        self.post(
            "/auth/login",
            &[("x-api-key", tenant.primary_api_key.as_str())],
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    /// Sign in to the admin console and return the `Cookie` header value.
    pub async fn admin_cookie(&self, email: &str) -> String {
        let response = self
            .post(
                "/admin/auth/login",
                &[],
                serde_json::json!({ "email": email, "password": PASSWORD }),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "admin login: {}", response.body);
        response
            .set_cookies()
            .iter()
            .filter_map(|c| c.split(';').next().map(str::to_string))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub fn register_body(email: &str) -> Value {
    serde_json::json!({
        "email": email,
        "password": PASSWORD,
        "first_name": "Ada",
        "last_name": "Lovelace",
    })
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}
