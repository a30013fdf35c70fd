//! Credentials: password hashing, opaque access tokens and the authenticated request context.

pub mod context;
pub mod password;
pub mod token;

pub use context::AuthContext;
pub use password::{PasswordHasher, PasswordPolicy};
pub use token::{IssuedToken, TokenError, TokenRef, TokenService, VerifiedToken};
