//! bcrypt work moved off the async executor

use crate::error::{AppError, AppResult};

pub async fn hash_password(password: &str, cost: u32) -> AppResult<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || crypto_core::hash_password(&password, cost))
        .await
        .map_err(|e| AppError::Credential(format!("hashing task failed: {e}")))?
        .map_err(AppError::from)
}

/// `false` for stored values that are not bcrypt hashes
pub async fn verify_password(password: &str, stored: &str) -> AppResult<bool> {
    if !crypto_core::is_password_hash(stored) {
        return Ok(false);
    }

    let password = password.to_string();
    let stored = stored.to_string();
    tokio::task::spawn_blocking(move || crypto_core::verify_password(&password, &stored))
        .await
        .map_err(|e| AppError::Credential(format!("verification task failed: {e}")))?
        .map_err(AppError::from)
}
