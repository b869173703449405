/// Access token gate.
///
/// Verifies the `Authorization: Bearer <token>` header on every request it
/// wraps and injects the parsed claims into request extensions for the
/// handlers downstream. Nothing is attached on failure. The three rejection
/// cases are observably distinct so clients can react without being told
/// cryptographic detail: missing header, expired token (refresh and retry),
/// and everything else (re-login).
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::{InternalError, ResponseError},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::auth::validate_access_token;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

pub struct JwtMiddleware {
    jwt_config: JwtSettings,
}

impl JwtMiddleware {
    pub fn new(jwt_config: JwtSettings) -> Self {
        Self { jwt_config }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
            jwt_config: self.jwt_config.clone(),
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
    jwt_config: JwtSettings,
}

/// Pull the token out of `Authorization: Bearer <token>`.
///
/// The header is split on the first space and the scheme matched
/// case-insensitively, so `bearer` and `BEARER` are accepted.
fn extract_bearer_token(req: &ServiceRequest) -> Result<String, AuthError> {
    let header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    match header.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("Bearer") && !token.is_empty() => {
            Ok(token.to_string())
        }
        _ => Err(AuthError::TokenInvalid),
    }
}

fn reject<R: 'static>(err: AuthError) -> LocalBoxFuture<'static, Result<R, Error>> {
    let app_err = AppError::Auth(err.clone());
    let response = app_err.error_response();
    Box::pin(async move { Err(InternalError::from_response(err.to_string(), response).into()) })
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = match extract_bearer_token(&req) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected request at auth gate");
                return reject(e);
            }
        };

        match validate_access_token(&token, &self.jwt_config) {
            Ok(claims) => {
                tracing::debug!(user_id = %claims.sub, "Access token verified");
                req.extensions_mut().insert(claims);

                let service = self.service.clone();
                Box::pin(async move { service.call(req).await })
            }
            Err(AppError::Auth(e @ AuthError::TokenExpired)) => {
                tracing::debug!("Rejected expired access token");
                reject(e)
            }
            Err(_) => {
                tracing::warn!("Rejected invalid access token");
                reject(AuthError::TokenInvalid)
            }
        }
    }
}
