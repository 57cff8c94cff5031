//! Services layer for the identity service.
//!
//! Business logic for authentication, verification codes, tenants and
//! provider sign-in. Everything here talks to storage through the repository
//! traits and to the outside world through the provider traits.

pub mod admin;
pub mod audit;
pub mod auth;
pub mod cache;
pub mod email;
pub mod error;
pub mod jwt;
pub mod login_attempts;
pub mod oauth;
pub mod sms;
pub mod tenant;
pub mod token;
pub mod users;
pub mod verification;

pub use admin::{AdminSession, AdminSessionService};
pub use audit::{AuditSink, MockAuditSink, TracingAuditSink};
pub use auth::AuthService;
pub use cache::{CacheStore, MockCache, RedisCache};
pub use email::{EmailProvider, EmailService, MockEmailService};
pub use error::ServiceError;
pub use jwt::{AccessTokenClaims, JwtService, RefreshTokenClaims};
pub use login_attempts::LoginAttemptTracker;
pub use oauth::{HttpOAuthClient, MockOAuthProvider, OAuthLinker, OAuthProvider};
pub use sms::{MockSmsProvider, SmsProvider, VonageSmsProvider};
pub use tenant::{TenantContext, TenantResolver, TenantService, TenantUpdate};
pub use token::{TokenIssuer, TokenPair};
pub use users::{DefaultAdmin, UserAdminService};
pub use verification::{IssuedCode, Redemption, VerificationCodeService, VerificationSettings};
