pub mod session;
pub mod tenants;
pub mod users;

pub use session::{admin_login, admin_logout, admin_status};
pub use tenants::{
    activate_tenant, create_api_key, create_tenant, delete_api_key, delete_tenant, get_tenant,
    list_api_keys, list_tenants, suspend_tenant, update_tenant,
};
pub use users::{
    activate_user, delete_user, get_user, list_tenant_users, revoke_user_sessions, suspend_user,
};
