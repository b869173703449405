/// Password hashing and verification.
///
/// bcrypt with DEFAULT_COST (12): deliberately slow and salted so stolen
/// digests resist offline brute force. Verification goes through bcrypt's
/// own comparison; callers are responsible for presenting one uniform error
/// for "unknown user" and "wrong password".
use bcrypt::{hash, verify, DEFAULT_COST};

use crate::error::AppError;

/// Hash a plaintext password.
///
/// Fails only on underlying entropy/resource failure; input validation is
/// the caller's concern.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    hash(password, DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a plaintext password against a stored bcrypt digest.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    verify(password, hash)
        .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
}
