/// Session orchestration: register, login, refresh, logout.
///
/// HTTP handlers stay thin; every decision about credentials, rotation, and
/// revocation lives here. All session truth is in the backing store - there
/// is no in-memory session state to share between workers.
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::password::{hash_password, verify_password};
use crate::auth::refresh_token::{
    generate_refresh_token, hash_refresh_token, revoke_active_by_digest, revoke_all_for_user,
    save_refresh_token, ClientMetadata,
};
use crate::auth::{generate_access_token, Claims};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ValidationError};
use crate::validators::{validate_email, validate_name, validate_password};

/// A well-formed bcrypt digest belonging to no account. When a login names
/// an unknown email we still run one bcrypt verification against it (result
/// discarded), so the unknown-email and wrong-password paths cost comparable
/// work and return the identical error.
const PHANTOM_PASSWORD_HASH: &str = "$2a$12$R9h/cIPz0gi.URNNX3kh2OPST9/PgBkqquzi.Ss7KIUgO2t0jWMUW";

/// User data safe to return to clients. Never carries the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The token pair handed to a client. The refresh token is the raw secret,
/// disclosed exactly once; only its digest is stored.
#[derive(Debug, Serialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: String,
    role: String,
    password_hash: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        UserRecord {
            id: row.id,
            email: row.email,
            name: row.name,
            role: row.role,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

async fn fetch_user_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRow>, AppError> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, email, name, role, password_hash, created_at, updated_at
        FROM users
        WHERE email = $1
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

async fn fetch_user_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<UserRow>, AppError> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, email, name, role, password_hash, created_at, updated_at
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Register a new user.
///
/// The email is trimmed and lowercased before storage so lookups are
/// case-insensitive; duplicates surface as a conflict distinct from other
/// failures via the unique-violation mapping in `error`.
pub async fn register(
    pool: &PgPool,
    email: &str,
    name: &str,
    password: &str,
) -> Result<UserRecord, AppError> {
    let email = validate_email(email)?;
    let name = validate_name(name)?;
    validate_password(password)?;

    let password_hash = hash_password(password)?;
    let now = Utc::now();

    let user = sqlx::query_as::<_, UserRow>(
        r#"
        INSERT INTO users (id, email, name, password_hash, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $5)
        RETURNING id, email, name, role, password_hash, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&email)
    .bind(&name)
    .bind(&password_hash)
    .bind(now)
    .fetch_one(pool)
    .await?;

    tracing::info!(user_id = %user.id, "User registered");
    Ok(user.into())
}

/// Authenticate a user and open a new session.
///
/// Unknown email and wrong password both return `InvalidCredentials`, and
/// both paths perform one bcrypt verification.
pub async fn login(
    pool: &PgPool,
    jwt: &JwtSettings,
    email: &str,
    password: &str,
    metadata: &ClientMetadata,
) -> Result<(SessionTokens, UserRecord), AppError> {
    let email = validate_email(email)?;
    if password.is_empty() {
        return Err(ValidationError::EmptyField("password").into());
    }

    let user = match fetch_user_by_email(pool, &email).await? {
        Some(user) => user,
        None => {
            // Comparable work to the have-a-user path; result discarded.
            let _ = verify_password(password, PHANTOM_PASSWORD_HASH);
            return Err(AuthError::InvalidCredentials.into());
        }
    };

    if !verify_password(password, &user.password_hash)? {
        return Err(AuthError::InvalidCredentials.into());
    }

    let tokens = issue_session(pool, jwt, &user, metadata).await?;

    tracing::info!(user_id = %user.id, "User logged in");
    Ok((tokens, user.into()))
}

/// Exchange a refresh token for a new access/refresh pair.
///
/// The presented secret is consumed first: its record is revoked by an
/// atomic conditional update before any replacement exists, which makes
/// every refresh token single-use. A replay after rotation, an expired
/// token, and a token that never existed all fail with the same
/// `InvalidRefreshToken`. The owning user is re-read from storage so the
/// fresh access token reflects the current email and role.
pub async fn refresh(
    pool: &PgPool,
    jwt: &JwtSettings,
    raw_token: &str,
    metadata: &ClientMetadata,
) -> Result<SessionTokens, AppError> {
    let raw_token = raw_token.trim();
    if raw_token.is_empty() {
        return Err(ValidationError::EmptyField("refresh_token").into());
    }

    let digest = hash_refresh_token(raw_token);
    let user_id = revoke_active_by_digest(pool, &digest)
        .await?
        .ok_or(AppError::Auth(AuthError::InvalidRefreshToken))?;

    // The token was active moments ago; a missing owner means the user was
    // deleted out from under the session.
    let user = fetch_user_by_id(pool, user_id)
        .await?
        .ok_or(AppError::Auth(AuthError::InvalidRefreshToken))?;

    let tokens = issue_session(pool, jwt, &user, metadata).await?;

    tracing::info!(user_id = %user.id, "Session refreshed");
    Ok(tokens)
}

/// Revoke every active session the user holds.
///
/// Already-issued access tokens stay valid until their natural expiry; the
/// residual window equals the access token TTL.
pub async fn logout(pool: &PgPool, user_id: Uuid) -> Result<(), AppError> {
    revoke_all_for_user(pool, user_id).await
}

/// Resolve the authenticated user behind a set of verified claims, reading
/// fresh data rather than trusting the token snapshot.
pub async fn current_user(pool: &PgPool, claims: &Claims) -> Result<UserRecord, AppError> {
    let user_id = claims.user_id()?;
    let user = fetch_user_by_id(pool, user_id)
        .await?
        .ok_or(AppError::Auth(AuthError::TokenInvalid))?;
    Ok(user.into())
}

async fn issue_session(
    pool: &PgPool,
    jwt: &JwtSettings,
    user: &UserRow,
    metadata: &ClientMetadata,
) -> Result<SessionTokens, AppError> {
    let access_token = generate_access_token(user.id, &user.email, &user.role, jwt)?;
    let refresh_token = generate_refresh_token();

    save_refresh_token(
        pool,
        user.id,
        &refresh_token,
        jwt.refresh_token_expiry,
        metadata,
    )
    .await?;

    Ok(SessionTokens {
        access_token,
        refresh_token,
        expires_in: jwt.access_token_expiry,
    })
}
