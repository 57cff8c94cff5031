pub mod admin;
pub mod auth;
pub mod tenant;

pub use admin::{AdminSessionGuard, AdminUser, ADMIN_SID_COOKIE, ADMIN_TOKEN_COOKIE};
pub use auth::{authenticate, AuthUser, Authenticator, BearerAuthenticator};
pub use tenant::{ApiKeyAuthenticator, CurrentTenant};
