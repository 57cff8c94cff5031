pub mod codes;
pub mod password;
pub mod registration;
pub mod session;

pub use codes::{send_sms_code, send_verification_code, verify_code, verify_sms_code};
pub use password::{request_password_reset, reset_password};
pub use registration::{register, register_with_code};
pub use session::{change_password, login, logout, profile, refresh};
