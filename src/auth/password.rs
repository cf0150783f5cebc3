// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Password hashing and password policy.
//!
//! Hashes are Argon2id PHC strings. Cost parameters are embedded in every
//! hash, so raising the configured cost never invalidates stored hashes;
//! [`CredentialHasher::needs_rehash`] reports hashes produced with other
//! parameters so they can be upgraded after a successful login.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use super::error::{AuthError, AuthResult};
use crate::config::HashingConfig;

/// Minimum password length in characters.
pub const MIN_PASSWORD_LENGTH: usize = 8;
/// Maximum password length in characters.
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// A password policy rule that a candidate password failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordRule {
    TooShort,
    TooLong,
    MissingLetter,
    MissingDigit,
}

impl std::fmt::Display for PasswordRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PasswordRule::TooShort => write!(
                f,
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            ),
            PasswordRule::TooLong => write!(
                f,
                "password must be at most {MAX_PASSWORD_LENGTH} characters"
            ),
            PasswordRule::MissingLetter => {
                write!(f, "password must contain at least one letter")
            }
            PasswordRule::MissingDigit => write!(f, "password must contain at least one digit"),
        }
    }
}

/// Check a new password against the policy.
///
/// Applied to every password the system is asked to store: registration,
/// reset confirmation and password change.
pub fn validate_password(password: &str) -> Result<(), PasswordRule> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        return Err(PasswordRule::TooShort);
    }
    if length > MAX_PASSWORD_LENGTH {
        return Err(PasswordRule::TooLong);
    }
    if !password.chars().any(char::is_alphabetic) {
        return Err(PasswordRule::MissingLetter);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(PasswordRule::MissingDigit);
    }
    Ok(())
}

/// Argon2id password hasher with configured cost parameters.
#[derive(Clone)]
pub struct CredentialHasher {
    params: Params,
}

impl CredentialHasher {
    /// Create a hasher from configured cost parameters.
    pub fn new(config: HashingConfig) -> AuthResult<Self> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| AuthError::Internal(format!("invalid argon2 parameters: {e}")))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password with a fresh random salt.
    pub fn hash(&self, password: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Internal(format!("password hashing failed: {e}")))
    }

    /// Verify a password. A malformed hash verifies as `false`.
    ///
    /// Parameters are read from the stored hash, not from this hasher.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Whether a stored hash was produced with different parameters.
    pub fn needs_rehash(&self, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return true;
        };
        if parsed.algorithm.as_str() != "argon2id" {
            return true;
        }
        match Params::try_from(&parsed) {
            Ok(stored) => {
                stored.m_cost() != self.params.m_cost()
                    || stored.t_cost() != self.params.t_cost()
                    || stored.p_cost() != self.params.p_cost()
            }
            Err(_) => true,
        }
    }

    /// [`hash`](Self::hash) on the blocking thread pool.
    pub async fn hash_blocking(&self, password: String) -> AuthResult<String> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("hashing task failed: {e}")))?
    }

    /// [`verify`](Self::verify) on the blocking thread pool.
    pub async fn verify_blocking(&self, password: String, hash: String) -> bool {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher() -> CredentialHasher {
        CredentialHasher::new(HashingConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap()
    }

    #[test]
    fn hash_then_verify() {
        let hasher = fast_hasher();
        let hash = hasher.hash("Valid123").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("Valid123", &hash));
        assert!(!hasher.verify("Valid124", &hash));
        assert!(!hasher.verify("", &hash));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let hasher = fast_hasher();
        let a = hasher.hash("Valid123").unwrap();
        let b = hasher.hash("Valid123").unwrap();
        assert_ne!(a, b);
        assert!(hasher.verify("Valid123", &a));
        assert!(hasher.verify("Valid123", &b));
    }

    #[test]
    fn malformed_hash_is_false() {
        let hasher = fast_hasher();
        assert!(!hasher.verify("Valid123", "not-a-hash"));
        assert!(!hasher.verify("Valid123", ""));
        assert!(!hasher.verify("Valid123", "$2b$12$abcdefghijklmnopqrstuv"));
    }

    #[test]
    fn old_cost_hashes_still_verify_and_need_rehash() {
        let old = fast_hasher();
        let hash = old.hash("Valid123").unwrap();

        let new = CredentialHasher::new(HashingConfig {
            memory_kib: 2048,
            iterations: 2,
            parallelism: 1,
        })
        .unwrap();
        assert!(new.verify("Valid123", &hash));
        assert!(new.needs_rehash(&hash));
        assert!(!old.needs_rehash(&hash));
    }

    #[test]
    fn invalid_params_rejected() {
        let result = CredentialHasher::new(HashingConfig {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        });
        assert!(matches!(result, Err(AuthError::Internal(_))));
    }

    #[tokio::test]
    async fn blocking_variants_agree() {
        let hasher = fast_hasher();
        let hash = hasher.hash_blocking("Valid123".into()).await.unwrap();
        assert!(hasher.verify_blocking("Valid123".into(), hash.clone()).await);
        assert!(!hasher.verify_blocking("nope".into(), hash).await);
    }

    #[test]
    fn policy_samples() {
        assert_eq!(validate_password("short1"), Err(PasswordRule::TooShort));
        assert_eq!(
            validate_password("alllettersnoDigits"),
            Err(PasswordRule::MissingDigit)
        );
        assert_eq!(validate_password("12345678"), Err(PasswordRule::MissingLetter));
        assert_eq!(validate_password("Valid123"), Ok(()));
    }

    #[test]
    fn policy_length_bounds() {
        let max = format!("a1{}", "b".repeat(MAX_PASSWORD_LENGTH - 2));
        assert_eq!(validate_password(&max), Ok(()));
        let over = format!("{max}c");
        assert_eq!(validate_password(&over), Err(PasswordRule::TooLong));
        // Counted in characters, not bytes
        assert_eq!(validate_password("ééééééé1"), Ok(()));
    }
}
