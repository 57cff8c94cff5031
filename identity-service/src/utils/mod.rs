pub mod password;
pub mod validation;

pub use password::{
    check_strength, generate_random_password, hash_password, hash_password_blocking,
    verify_password, verify_password_blocking, Password, PasswordHashString, PasswordStrength,
};
pub use validation::ValidatedJson;
