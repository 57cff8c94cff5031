use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::User;

const REFRESH_TOKEN_TYPE: &str = "refresh";

/// JWT service for token generation and validation.
///
/// Access and refresh tokens are HS256 tokens signed with distinct secrets, so
/// neither kind validates as the other.
#[derive(Clone)]
pub struct JwtService {
    access_encoding_key: EncodingKey,
    access_decoding_key: DecodingKey,
    refresh_encoding_key: EncodingKey,
    refresh_decoding_key: DecodingKey,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
}

/// Claims for access tokens (short-lived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Tenant ID, absent for system administrators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    pub email: String,
    pub role: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    pub jti: String,
}

impl AccessTokenClaims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        self.tid.as_deref().and_then(|t| Uuid::parse_str(t).ok())
    }
}

/// Claims for refresh tokens (long-lived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Unique per token so two rotations in the same second never collide
    pub jti: String,
    pub typ: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let access_secret = config.access_secret.expose_secret().as_bytes();
        let refresh_secret = config.refresh_secret.expose_secret().as_bytes();

        if access_secret.is_empty() || refresh_secret.is_empty() {
            return Err(anyhow::anyhow!("JWT secrets must not be empty"));
        }
        if access_secret == refresh_secret {
            return Err(anyhow::anyhow!("Access and refresh secrets must differ"));
        }

        tracing::info!("JWT service initialized with HS256 secrets");

        Ok(Self {
            access_encoding_key: EncodingKey::from_secret(access_secret),
            access_decoding_key: DecodingKey::from_secret(access_secret),
            refresh_encoding_key: EncodingKey::from_secret(refresh_secret),
            refresh_decoding_key: DecodingKey::from_secret(refresh_secret),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
        })
    }

    /// Generate an access token for a user
    pub fn generate_access_token(&self, user: &User) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: user.user_id.to_string(),
            tid: user.tenant_id.map(|t| t.to_string()),
            email: user.email.clone(),
            role: user.role_code.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.access_encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))
    }

    /// Generate a refresh token for a user
    pub fn generate_refresh_token(&self, user_id: Uuid) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let exp = now + Duration::days(self.refresh_token_expiry_days);

        let claims = RefreshTokenClaims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            typ: REFRESH_TOKEN_TYPE.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.refresh_encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode refresh token: {}", e))
    }

    /// Validate and decode an access token
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, anyhow::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let token_data = decode::<AccessTokenClaims>(token, &self.access_decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!("Invalid access token: {}", e))?;

        Ok(token_data.claims)
    }

    /// Validate and decode a refresh token
    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshTokenClaims, anyhow::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let token_data =
            decode::<RefreshTokenClaims>(token, &self.refresh_decoding_key, &validation)
                .map_err(|e| anyhow::anyhow!("Invalid refresh token: {}", e))?;

        if token_data.claims.typ != REFRESH_TOKEN_TYPE {
            return Err(anyhow::anyhow!("Invalid refresh token: wrong type"));
        }

        Ok(token_data.claims)
    }

    /// Get access token expiry in seconds (for client info)
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn test_config() -> JwtConfig {
        JwtConfig {
            access_secret: Secret::new("test-access-secret".to_string()),
            refresh_secret: Secret::new("test-refresh-secret".to_string()),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        }
    }

    #[test]
    fn identical_secrets_are_rejected() {
        let mut config = test_config();
        config.refresh_secret = Secret::new("test-access-secret".to_string());
        assert!(JwtService::new(&config).is_err());
    }

    #[test]
    fn access_token_carries_user_and_tenant() -> Result<(), anyhow::Error> {
        let service = JwtService::new(&test_config())?;
        let user = User::new(Uuid::new_v4(), "test@example.com", "hash".to_string());

        let token = service.generate_access_token(&user)?;
        let claims = service.validate_access_token(&token)?;

        assert_eq!(claims.user_id(), Some(user.user_id));
        assert_eq!(claims.tenant_id(), user.tenant_id);
        assert_eq!(claims.email, "test@example.com");
        assert_eq!(claims.exp - claims.iat, 15 * 60);
        Ok(())
    }

    #[test]
    fn refresh_tokens_are_unique_and_typed() -> Result<(), anyhow::Error> {
        let service = JwtService::new(&test_config())?;
        let user_id = Uuid::new_v4();

        let first = service.generate_refresh_token(user_id)?;
        let second = service.generate_refresh_token(user_id)?;
        assert_ne!(first, second);

        let claims = service.validate_refresh_token(&first)?;
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.typ, "refresh");
        Ok(())
    }

    #[test]
    fn token_kinds_do_not_cross_validate() -> Result<(), anyhow::Error> {
        let service = JwtService::new(&test_config())?;
        let user = User::new(Uuid::new_v4(), "test@example.com", "hash".to_string());

        let access = service.generate_access_token(&user)?;
        let refresh = service.generate_refresh_token(user.user_id)?;

        assert!(service.validate_refresh_token(&access).is_err());
        assert!(service.validate_access_token(&refresh).is_err());
        Ok(())
    }
}
