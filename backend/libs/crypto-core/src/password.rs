/// Password hashing and verification using bcrypt
///
/// Hashes are stored in modular crypt format: a 4-character scheme prefix
/// (`$2a$`, `$2b$` or `$2y$`), the cost, the salt and the digest, 60 characters
/// in total. [`is_password_hash`] relies on exactly that shape to tell stored
/// hashes apart from legacy plaintext credentials.
use thiserror::Error;

/// Scheme prefixes accepted as "already hashed"
pub const BCRYPT_PREFIXES: [&str; 3] = ["$2a$", "$2b$", "$2y$"];

/// Length of every bcrypt hash string
pub const BCRYPT_HASH_LEN: usize = 60;

pub const DEFAULT_COST: u32 = 10;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("bcrypt cost {0} out of range (4..=31)")]
    InvalidCost(u32),
}

/// Hash a password with a fresh random salt
pub fn hash_password(password: &str, cost: u32) -> Result<String, PasswordError> {
    if !(4..=31).contains(&cost) {
        return Err(PasswordError::InvalidCost(cost));
    }
    Ok(bcrypt::hash(password, cost)?)
}

/// Verify a password against a stored bcrypt hash
///
/// Returns `Ok(false)` on mismatch and `Err` when the stored value is not a
/// parseable hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    Ok(bcrypt::verify(password, hash)?)
}

/// Whether a stored credential already is a bcrypt hash
pub fn is_password_hash(credential: &str) -> bool {
    credential.len() >= BCRYPT_HASH_LEN
        && BCRYPT_PREFIXES
            .iter()
            .any(|prefix| credential.starts_with(prefix))
}
