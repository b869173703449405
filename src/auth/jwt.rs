/// Access token signing and verification.
///
/// Tokens are HMAC-SHA256 signed with a single symmetric secret taken from
/// `JwtSettings`. Verification pins the algorithm to HS256, so "alg: none"
/// and asymmetric-key confusion tokens fail as invalid regardless of their
/// payload.
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::Claims;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

/// Sign a new access token for a user.
///
/// Sets `exp = now + access_token_expiry`, `iat = nbf = now`, and stamps the
/// configured issuer. The caller supplies the freshest known email and role;
/// nothing here reads from storage.
pub fn generate_access_token(
    user_id: Uuid,
    email: &str,
    role: &str,
    config: &JwtSettings,
) -> Result<String, AppError> {
    let claims = Claims::new(
        user_id,
        email.to_string(),
        role.to_string(),
        config.access_token_expiry,
        config.issuer.clone(),
    );

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
}

/// Verify a token and extract its claims.
///
/// Expiry is reported distinctly (`TokenExpired`) so clients can attempt a
/// refresh; every other failure (bad signature, malformed token, wrong
/// algorithm, wrong issuer, not-yet-valid) collapses to `TokenInvalid`.
pub fn validate_access_token(token: &str, config: &JwtSettings) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&config.issuer]);
    validation.validate_nbf = true;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AppError::Auth(AuthError::TokenExpired),
        _ => AppError::Auth(AuthError::TokenInvalid),
    })
}
