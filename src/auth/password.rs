//! Password hashing and password policy.
//!
//! New digests are Argon2id. Legacy bcrypt digests (`$2y$`, `$2b$`, `$2a$`) written by a
//! Laravel application are still accepted by [`PasswordHasher::verify`].

use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(argon2::password_hash::Error),

    #[error("stored password digest is malformed")]
    Malformed,
}

/// Argon2id hasher with a fixed cost.
///
/// Production cost is 64 MiB and 3 passes, roughly 100ms on commodity hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordHasher {
    memory_kib: u32,
    iterations: u32,
}

impl PasswordHasher {
    pub const MEMORY_COST_KIB: u32 = 1 << 16;
    pub const ITERATIONS: u32 = 3;

    pub const fn new() -> Self {
        Self {
            memory_kib: Self::MEMORY_COST_KIB,
            iterations: Self::ITERATIONS,
        }
    }

    /// Minimum Argon2 cost, for test suites only.
    pub const fn for_testing() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
        }
    }

    pub fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
        let params = Params::new(self.memory_kib, self.iterations, 1, None)
            .map_err(|e| PasswordError::Hash(e.into()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let salt = SaltString::generate(&mut OsRng);

        argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|digest| digest.to_string())
            .map_err(PasswordError::Hash)
    }

    /// Mismatch is `Ok(false)`; only an unreadable digest is an error.
    pub fn verify(&self, plaintext: &str, digest: &str) -> Result<bool, PasswordError> {
        if is_bcrypt(digest) {
            return bcrypt::verify(plaintext, digest).map_err(|_| PasswordError::Malformed);
        }

        let parsed = PasswordHash::new(digest).map_err(|_| PasswordError::Malformed)?;
        match Argon2::default().verify_password(plaintext.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(_) => Err(PasswordError::Malformed),
        }
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

fn is_bcrypt(digest: &str) -> bool {
    ["$2y$", "$2b$", "$2a$"]
        .iter()
        .any(|prefix| digest.starts_with(prefix))
}

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::basic(8)
    }
}

impl PasswordPolicy {
    pub fn basic(min_length: usize) -> Self {
        Self {
            min_length,
            require_uppercase: false,
            require_lowercase: false,
            require_digit: false,
            require_special: false,
        }
    }

    pub fn complex(min_length: usize) -> Self {
        Self {
            min_length,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
        }
    }

    pub fn validate(&self, password: &str) -> Result<(), PolicyViolation> {
        if password.chars().count() < self.min_length {
            return Err(PolicyViolation::TooShort {
                min_length: self.min_length,
            });
        }

        let checks: [(bool, PolicyViolation, fn(char) -> bool); 4] = [
            (
                self.require_uppercase,
                PolicyViolation::MissingUppercase,
                |c: char| c.is_uppercase(),
            ),
            (
                self.require_lowercase,
                PolicyViolation::MissingLowercase,
                |c: char| c.is_lowercase(),
            ),
            (
                self.require_digit,
                PolicyViolation::MissingDigit,
                |c: char| c.is_ascii_digit(),
            ),
            (
                self.require_special,
                PolicyViolation::MissingSpecial,
                |c: char| !c.is_alphanumeric(),
            ),
        ];

        for (required, violation, test) in checks {
            if required && !password.chars().any(test) {
                return Err(violation);
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error("The password must be at least {min_length} characters.")]
    TooShort { min_length: usize },
    #[error("The password must contain at least one uppercase letter.")]
    MissingUppercase,
    #[error("The password must contain at least one lowercase letter.")]
    MissingLowercase,
    #[error("The password must contain at least one digit.")]
    MissingDigit,
    #[error("The password must contain at least one special character.")]
    MissingSpecial,
}
