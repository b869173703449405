/// Refresh token generation and persistence.
///
/// Refresh tokens are opaque 64-character random secrets. Only their SHA-256
/// hex digest is ever persisted; the raw secret is handed to the client once
/// at issuance. A stored record is usable exactly when
/// `revoked_at IS NULL AND expires_at > now` - that one predicate is the
/// single source of truth for "active", and revocation is monotonic.
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

/// Informational client metadata recorded with each session.
#[derive(Debug, Clone, Default)]
pub struct ClientMetadata {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// Generate a new refresh token secret: 64 alphanumeric characters from a
/// CSPRNG (~380 bits of entropy). Returned in plaintext for the client;
/// the server keeps only the digest.
pub fn generate_refresh_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

/// SHA-256 hex digest of a refresh token secret.
///
/// Deterministic and unsalted so the digest computed at lookup time matches
/// the one stored at issuance, across process restarts.
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Persist a new active refresh token record for a user.
pub async fn save_refresh_token(
    pool: &PgPool,
    user_id: Uuid,
    token: &str,
    expiry_seconds: i64,
    metadata: &ClientMetadata,
) -> Result<(), AppError> {
    let token_hash = hash_refresh_token(token);
    let expires_at = Utc::now() + Duration::seconds(expiry_seconds);

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at, user_agent, ip_address)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(token_hash)
    .bind(expires_at)
    .bind(Utc::now())
    .bind(metadata.user_agent.as_deref())
    .bind(metadata.ip_address.as_deref())
    .execute(pool)
    .await?;

    Ok(())
}

/// Look up an active (non-revoked, non-expired) record by digest.
///
/// Returns the owner and expiry, or None. Unknown, revoked, and expired
/// digests are indistinguishable here on purpose.
pub async fn find_active_by_digest(
    pool: &PgPool,
    token_hash: &str,
) -> Result<Option<(Uuid, DateTime<Utc>)>, AppError> {
    let row = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
        r#"
        SELECT user_id, expires_at
        FROM refresh_tokens
        WHERE token_hash = $1 AND revoked_at IS NULL AND expires_at > $2
        "#,
    )
    .bind(token_hash)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Atomically claim and revoke an active record, returning its owner.
///
/// The UPDATE's WHERE clause is the same active predicate as the lookup, so
/// of N concurrent callers presenting the same digest exactly one gets the
/// row back; the rest see None. Already-revoked and unknown digests also
/// yield None rather than an error, which makes revocation idempotent and a
/// replayed secret indistinguishable from a fabricated one.
pub async fn revoke_active_by_digest(
    pool: &PgPool,
    token_hash: &str,
) -> Result<Option<Uuid>, AppError> {
    let user_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        UPDATE refresh_tokens
        SET revoked_at = $1
        WHERE token_hash = $2 AND revoked_at IS NULL AND expires_at > $1
        RETURNING user_id
        "#,
    )
    .bind(Utc::now())
    .bind(token_hash)
    .fetch_optional(pool)
    .await?;

    Ok(user_id)
}

/// Revoke every active refresh token a user holds (logout on all devices).
pub async fn revoke_all_for_user(pool: &PgPool, user_id: Uuid) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE refresh_tokens
        SET revoked_at = $1
        WHERE user_id = $2 AND revoked_at IS NULL
        "#,
    )
    .bind(Utc::now())
    .bind(user_id)
    .execute(pool)
    .await?;

    tracing::info!(user_id = %user_id, "All refresh tokens revoked for user");
    Ok(())
}
