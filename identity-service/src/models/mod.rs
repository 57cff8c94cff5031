pub mod api_key;
pub mod audit_event;
pub mod oauth_account;
pub mod tenant;
pub mod user;
pub mod verification_code;

pub use api_key::{ApiKeyRecord, ApiKeyResponse, CreatedApiKeyResponse};
pub use audit_event::{AuditAction, AuditEvent};
pub use oauth_account::{OAuthAccount, OAuthAccountResponse, OAuthIdentity, OAuthProviderKind};
pub use tenant::{Tenant, TenantResponse, DEFAULT_TENANT_NAME, SYSTEM_TENANT_NAME};
pub use user::{User, UserResponse, UserRole};
pub use verification_code::{
    CodeChannel, CodePurpose, VerificationCode, PASSWORD_RESET_SENTINEL,
};
