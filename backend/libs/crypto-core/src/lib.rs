//! Shared credential primitives for campus services.
//!
//! - `jwt`: bearer token issuing, strict validation, and expiry-tolerant
//!   identity extraction
//! - `password`: bcrypt hashing, verification, and hash classification

pub mod jwt;
pub mod password;

pub use jwt::{usable_identity, Claims, JwtKeys, TokenStatus};
pub use password::{hash_password, is_password_hash, verify_password, PasswordError};
