// Authentication middleware for Transcribe API
//
// This module provides a bearer-token gate in front of the API. When enabled,
// a request must carry `Authorization: Bearer <token>` with one of the
// configured tokens. OPTIONS requests are always allowed to support CORS
// pre-flight requests.

use std::rc::Rc;

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ErrorUnauthorized,
    http::{header, Method},
    Error,
};
use futures::future::{ok, LocalBoxFuture, Ready};
use log::{debug, info, warn};

use crate::config::AuthConfig;

/// Middleware factory for authentication
pub struct Authentication {
    config: Rc<AuthConfig>,
}

impl Authentication {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config: Rc::new(config),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthenticationMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        if !self.config.enabled {
            info!("Authentication requirement is disabled via configuration");
        } else if self.config.tokens.is_empty() {
            warn!("Authentication is enabled but no tokens are configured, every request will be rejected");
        }
        ok(AuthenticationMiddleware {
            service,
            config: self.config.clone(),
        })
    }
}

/// Authentication middleware implementation
pub struct AuthenticationMiddleware<S> {
    service: S,
    config: Rc<AuthConfig>,
}

impl<S, B> Service<ServiceRequest> for AuthenticationMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if req.method() == Method::OPTIONS {
            debug!("OPTIONS request - bypassing authentication check");
        } else if let Err(error) = authenticate(&req, &self.config) {
            return Box::pin(async move { Err(error) });
        }

        let fut = self.service.call(req);
        Box::pin(fut)
    }
}

/// Authenticate a request by checking the Authorization header
fn authenticate(req: &ServiceRequest, config: &AuthConfig) -> Result<(), Error> {
    if !config.enabled {
        return Ok(());
    }

    let Some(auth_header) = req.headers().get(header::AUTHORIZATION) else {
        warn!("Missing Authorization header");
        return Err(ErrorUnauthorized("Authorization header is required"));
    };

    let Ok(auth_str) = auth_header.to_str() else {
        warn!("Authorization header contains invalid characters");
        return Err(ErrorUnauthorized("Invalid Authorization header"));
    };

    match auth_str.strip_prefix("Bearer ") {
        Some(token) => validate_token(token.trim(), config),
        None => {
            warn!("Invalid Authorization header format, missing 'Bearer' prefix");
            Err(ErrorUnauthorized(
                "Invalid Authorization header format. Must be 'Bearer <token>'",
            ))
        }
    }
}

/// Check `token` against the configured tokens
fn validate_token(token: &str, config: &AuthConfig) -> Result<(), Error> {
    if config.tokens.iter().any(|t| t == token) {
        Ok(())
    } else {
        warn!("Rejected request with unknown bearer token");
        Err(ErrorUnauthorized("Invalid token"))
    }
}
