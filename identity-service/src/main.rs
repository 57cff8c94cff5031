use identity_service::{
    build_router,
    config::{Environment, IdentityConfig},
    db,
    repository::{Database, Repositories},
    services::{EmailService, HttpOAuthClient, RedisCache, TracingAuditSink, VonageSmsProvider},
    AppState, Providers,
};
use secrecy::ExposeSecret;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.telemetry.otlp_endpoint.as_deref(),
    )?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;
    let repos = Repositories::from_store(Arc::new(Database::new(pool)));
    tracing::info!("Database initialized successfully");

    let cache = RedisCache::new(&config.redis)
        .await
        .map_err(service_core::error::AppError::InternalError)?;
    tracing::info!("Redis cache initialized");

    let email = EmailService::new(&config.smtp)?;
    tracing::info!("Email service initialized");

    let providers = Providers {
        cache: Arc::new(cache),
        email: Arc::new(email),
        sms: Arc::new(VonageSmsProvider::new(&config.sms)),
        oauth: Arc::new(HttpOAuthClient::new(config.oauth.clone())),
        audit: Arc::new(TracingAuditSink),
    };

    let state = AppState::new(config.clone(), repos, providers)?;

    ensure_default_admin(&state).await;

    spawn_code_cleanup(
        state.clone(),
        Duration::from_secs(config.verification.cleanup_interval_seconds.max(1)),
    );

    let app = build_router(state).await?;

    let addr = config.common.bind_address();

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

/// Create the console administrator on first start. Failure is logged, not fatal.
async fn ensure_default_admin(state: &AppState) {
    let admin = &state.config.admin;
    if admin.password.is_none() && state.config.environment == Environment::Prod {
        tracing::warn!("ADMIN_PASSWORD is not set; skipping default admin creation");
        return;
    }

    match state
        .user_admin
        .ensure_default_admin(&admin.email, admin.password.as_ref())
        .await
    {
        Ok(outcome) => {
            if let Some(password) = outcome.generated_password {
                tracing::warn!(
                    email = %outcome.email,
                    password = %password.expose_secret(),
                    "Default admin created with a generated password; change it now"
                );
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to ensure default admin"),
    }
}

/// Periodically drop expired verification codes from durable storage.
fn spawn_code_cleanup(state: AppState, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = state.verification.cleanup_expired().await {
                tracing::warn!(error = %e, "Verification code cleanup failed");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
