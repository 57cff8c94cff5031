use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub smtp: SmtpConfig,
    pub sms: SmsConfig,
    pub oauth: OAuthConfig,
    pub security: SecurityConfig,
    pub swagger: SwaggerConfig,
    pub rate_limit: RateLimitConfig,
    pub verification: VerificationConfig,
    pub telemetry: TelemetryConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub access_secret: Secret<String>,
    pub refresh_secret: Secret<String>,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from: String,
}

/// Vonage SMS credentials.
#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub api_key: String,
    pub api_secret: Secret<String>,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub github: OAuthClientConfig,
    pub google: OAuthClientConfig,
    /// Public base URL of this service; provider callbacks are built from it.
    pub public_base_url: String,
    /// Where the browser lands after an OAuth login.
    pub frontend_url: String,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwaggerMode {
    Public,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_max_attempts: i64,
    pub login_window_seconds: u64,
    pub code_resend_interval_seconds: u64,
    pub ip_auth_limit: u32,
    pub ip_auth_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct VerificationConfig {
    pub code_ttl_seconds: i64,
    pub reset_ttl_seconds: i64,
    pub cleanup_interval_seconds: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
}

/// Console account created at startup when missing.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub email: String,
    /// Unset means a random password is generated, outside production only.
    pub password: Option<Secret<String>>,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = IdentityConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://127.0.0.1:6379"), is_prod)?,
            },
            jwt: JwtConfig {
                access_secret: Secret::new(get_env("JWT_SECRET", None, is_prod)?),
                refresh_secret: Secret::new(get_env("JWT_REFRESH_SECRET", None, is_prod)?),
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "15",
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env("JWT_REFRESH_TOKEN_EXPIRY_DAYS", "7", is_prod)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), is_prod)?,
                port: parse_env("SMTP_PORT", "587", is_prod)?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: Secret::new(get_env("SMTP_PASSWORD", Some(""), is_prod)?),
                from: get_env("SMTP_FROM", Some("no-reply@localhost"), is_prod)?,
            },
            sms: SmsConfig {
                api_key: get_env("VONAGE_API_KEY", Some(""), is_prod)?,
                api_secret: Secret::new(get_env("VONAGE_API_SECRET", Some(""), is_prod)?),
                from: get_env("VONAGE_FROM", Some("Identity"), is_prod)?,
            },
            oauth: OAuthConfig {
                github: OAuthClientConfig {
                    client_id: get_env("GITHUB_CLIENT_ID", Some(""), is_prod)?,
                    client_secret: Secret::new(get_env("GITHUB_CLIENT_SECRET", Some(""), is_prod)?),
                },
                google: OAuthClientConfig {
                    client_id: get_env("GOOGLE_CLIENT_ID", Some(""), is_prod)?,
                    client_secret: Secret::new(get_env("GOOGLE_CLIENT_SECRET", Some(""), is_prod)?),
                },
                public_base_url: get_env("PUBLIC_BASE_URL", Some("http://localhost:8080"), is_prod)?,
                frontend_url: get_env("FRONTEND_URL", Some("http://localhost:3000"), is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            swagger: SwaggerConfig {
                enabled: get_env("ENABLE_SWAGGER", Some("public"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            rate_limit: RateLimitConfig {
                login_max_attempts: parse_env("LOGIN_MAX_ATTEMPTS", "5", is_prod)?,
                login_window_seconds: parse_env("LOGIN_WINDOW_SECONDS", "900", is_prod)?,
                code_resend_interval_seconds: parse_env("CODE_RESEND_INTERVAL_SECONDS", "60", is_prod)?,
                ip_auth_limit: parse_env("RATE_LIMIT_IP_AUTH_LIMIT", "20", is_prod)?,
                ip_auth_window_seconds: parse_env("RATE_LIMIT_IP_AUTH_WINDOW_SECONDS", "60", is_prod)?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", "100", is_prod)?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    "60",
                    is_prod,
                )?,
            },
            verification: VerificationConfig {
                code_ttl_seconds: parse_env("VERIFICATION_CODE_TTL_SECONDS", "600", is_prod)?,
                reset_ttl_seconds: parse_env("PASSWORD_RESET_TTL_SECONDS", "3600", is_prod)?,
                cleanup_interval_seconds: parse_env("CODE_CLEANUP_INTERVAL_SECONDS", "300", is_prod)?,
            },
            // Optional in every environment.
            telemetry: TelemetryConfig {
                otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                    .ok()
                    .filter(|s| !s.is_empty()),
            },
            admin: AdminConfig {
                email: get_env("ADMIN_EMAIL", Some("admin@identity.local"), false)?,
                password: env::var("ADMIN_PASSWORD")
                    .ok()
                    .filter(|s| !s.is_empty())
                    .map(Secret::new),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"
            )));
        }

        if self.jwt.access_secret.expose_secret().is_empty()
            || self.jwt.access_secret.expose_secret() == self.jwt.refresh_secret.expose_secret()
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET and JWT_REFRESH_SECRET must be set and distinct"
            )));
        }

        if self.verification.code_ttl_seconds <= 0 || self.verification.reset_ttl_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Verification TTLs must be positive"
            )));
        }

        if self.rate_limit.login_max_attempts <= 0 || self.rate_limit.login_window_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Login rate limit must be positive"
            )));
        }

        if self.environment == Environment::Prod
            && self.security.allowed_origins.iter().any(|o| o == "*")
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Wildcard CORS origin not allowed in production"
            )));
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(SwaggerMode::Public),
            "disabled" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_case_insensitively() {
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Prod));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn missing_value_is_an_error_in_prod_even_with_default() {
        let result = get_env("IDENTITY_TEST_SURELY_UNSET", Some("x"), true);
        assert!(result.is_err());
        let result = get_env("IDENTITY_TEST_SURELY_UNSET", Some("x"), false);
        assert_eq!(result.unwrap(), "x");
    }

    #[test]
    fn parse_env_reports_the_key() {
        let err = parse_env::<u16>("IDENTITY_TEST_SURELY_UNSET", "not-a-number", false).unwrap_err();
        assert!(err.to_string().contains("IDENTITY_TEST_SURELY_UNSET"));
    }
}
