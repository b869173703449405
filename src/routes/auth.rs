/// Authentication endpoints.
///
/// Handlers stay thin: parse the request, collect client metadata, delegate
/// to `auth::session`, shape the response. Status mapping lives on
/// `AppError`.
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::auth::refresh_token::ClientMetadata;
use crate::auth::{session, Claims};
use crate::configuration::JwtSettings;
use crate::error::AppError;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenResponse,
    pub user: session::UserRecord,
}

impl From<session::SessionTokens> for TokenResponse {
    fn from(tokens: session::SessionTokens) -> Self {
        TokenResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: tokens.expires_in,
        }
    }
}

fn client_metadata(req: &HttpRequest) -> ClientMetadata {
    let user_agent = req
        .headers()
        .get(actix_web::http::header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(ToString::to_string);
    let ip_address = req
        .connection_info()
        .realip_remote_addr()
        .map(ToString::to_string);

    ClientMetadata {
        user_agent,
        ip_address,
    }
}

/// POST /auth/register
///
/// 201 with the created user (never the password hash); 409 on a duplicate
/// email; 400 on validation failure.
pub async fn register(
    form: web::Json<RegisterRequest>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let user = session::register(pool.get_ref(), &form.email, &form.name, &form.password).await?;
    Ok(HttpResponse::Created().json(user))
}

/// POST /auth/login
///
/// 200 with a token pair and the user snapshot. Unknown email and wrong
/// password return the identical 401.
pub async fn login(
    form: web::Json<LoginRequest>,
    req: HttpRequest,
    pool: web::Data<PgPool>,
    jwt_config: web::Data<JwtSettings>,
) -> Result<HttpResponse, AppError> {
    let metadata = client_metadata(&req);
    let (tokens, user) = session::login(
        pool.get_ref(),
        jwt_config.get_ref(),
        &form.email,
        &form.password,
        &metadata,
    )
    .await?;

    Ok(HttpResponse::Ok().json(LoginResponse {
        tokens: tokens.into(),
        user,
    }))
}

/// POST /auth/refresh
///
/// Rotates the presented refresh token: the old one is dead after this call
/// whether or not the response is ever received. 401 for unknown, expired,
/// revoked, and replayed tokens alike.
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    req: HttpRequest,
    pool: web::Data<PgPool>,
    jwt_config: web::Data<JwtSettings>,
) -> Result<HttpResponse, AppError> {
    let metadata = client_metadata(&req);
    let tokens = session::refresh(
        pool.get_ref(),
        jwt_config.get_ref(),
        &form.refresh_token,
        &metadata,
    )
    .await?;

    Ok(HttpResponse::Ok().json(TokenResponse::from(tokens)))
}

/// POST /auth/logout (authenticated)
///
/// Revokes every active session of the caller. The current access token
/// stays valid until it expires.
pub async fn logout(
    claims: web::ReqData<Claims>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let user_id = claims.user_id()?;
    session::logout(pool.get_ref(), user_id).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Logged out" })))
}

/// GET /auth/me (authenticated)
///
/// Returns fresh user data for the token's subject.
pub async fn get_current_user(
    claims: web::ReqData<Claims>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let user = session::current_user(pool.get_ref(), &claims).await?;
    Ok(HttpResponse::Ok().json(user))
}
