use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::Rng;

/// Symbols accepted by the strength check.
const SPECIAL_CHARACTERS: &str = "!@#$%^&*(),.?\":{}|<>";

const RANDOM_PASSWORD_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*";

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Newtype for password to prevent accidental logging
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Newtype for password hash
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Outcome of [`check_strength`]. `violations` is empty when `valid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordStrength {
    pub valid: bool,
    pub violations: Vec<String>,
}

/// Hash a password using Argon2id with a random salt.
pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let argon2 = Argon2::default();
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = argon2
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(PasswordHashString::new(password_hash))
}

/// Verify a password against a stored hash. A malformed hash never matches.
pub fn verify_password(password: &Password, password_hash: &PasswordHashString) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(password_hash.as_str()) else {
        tracing::warn!("Stored password hash is malformed");
        return false;
    };

    Argon2::default()
        .verify_password(password.as_str().as_bytes(), &parsed_hash)
        .is_ok()
}

pub fn check_strength(password: &str) -> PasswordStrength {
    let mut violations = Vec::new();

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        violations.push(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LENGTH
        ));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        violations.push("Password must contain at least one uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        violations.push("Password must contain at least one lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push("Password must contain at least one number".to_string());
    }
    if !password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)) {
        violations.push("Password must contain at least one special character".to_string());
    }

    PasswordStrength {
        valid: violations.is_empty(),
        violations,
    }
}

pub fn generate_random_password(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..RANDOM_PASSWORD_CHARSET.len());
            RANDOM_PASSWORD_CHARSET[idx] as char
        })
        .collect()
}

/// Run [`hash_password`] on the blocking pool.
pub async fn hash_password_blocking(password: Password) -> Result<PasswordHashString, anyhow::Error> {
    tokio::task::spawn_blocking(move || hash_password(&password)).await?
}

/// Run [`verify_password`] on the blocking pool. A join failure counts as a mismatch.
pub async fn verify_password_blocking(password: Password, password_hash: String) -> bool {
    tokio::task::spawn_blocking(move || {
        verify_password(&password, &PasswordHashString::new(password_hash))
    })
    .await
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_argon2_and_salted() {
        let password = Password::new("Secure123!".to_string());
        let hash1 = hash_password(&password).expect("Failed to hash password");
        let hash2 = hash_password(&password).expect("Failed to hash password");

        assert!(hash1.as_str().starts_with("$argon2"));
        assert_ne!(hash1.as_str(), hash2.as_str());
        assert!(verify_password(&password, &hash1));
        assert!(verify_password(&password, &hash2));
    }

    #[test]
    fn wrong_password_does_not_verify() {
        let hash = hash_password(&Password::new("Secure123!".to_string())).unwrap();
        assert!(!verify_password(&Password::new("Secure123?".to_string()), &hash));
    }

    #[test]
    fn malformed_hash_is_false_not_error() {
        let hash = PasswordHashString::new("not-a-phc-string".to_string());
        assert!(!verify_password(&Password::new("Secure123!".to_string()), &hash));
    }

    #[test]
    fn strong_password_passes() {
        let strength = check_strength("Secure123!");
        assert!(strength.valid);
        assert!(strength.violations.is_empty());
    }

    #[test]
    fn weak_password_lists_every_violation() {
        let strength = check_strength("abc");
        assert!(!strength.valid);
        assert_eq!(strength.violations.len(), 4);
        assert!(strength.violations[0].contains("at least 8"));
    }

    #[test]
    fn random_password_has_requested_length_and_charset() {
        let generated = generate_random_password(32);
        assert_eq!(generated.len(), 32);
        assert!(generated
            .bytes()
            .all(|b| RANDOM_PASSWORD_CHARSET.contains(&b)));
        assert_ne!(generated, generate_random_password(32));
    }

    #[tokio::test]
    async fn blocking_helpers_round_trip() {
        let hash = hash_password_blocking(Password::new("Secure123!".to_string()))
            .await
            .unwrap();
        assert!(verify_password_blocking(Password::new("Secure123!".to_string()), hash.into_string()).await);
    }
}
