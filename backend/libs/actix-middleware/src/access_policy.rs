//! Endpoint access policy
//!
//! Authorization is explicit configuration: an [`AccessPolicy`] lists public
//! path prefixes and whether everything else requires a valid bearer token.
//! A valid token on any path attaches an [`AuthenticatedUser`] to the request
//! extensions, so handlers on public paths can still see the caller.

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::InternalError,
    http::header::{HeaderMap, AUTHORIZATION},
    Error, HttpMessage, HttpResponse,
};
use crypto_core::JwtKeys;
use futures::future::{ready, LocalBoxFuture, Ready};
use std::sync::Arc;

/// Which paths need a bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    pub enforce: bool,
    pub public_paths: Vec<String>,
}

impl AccessPolicy {
    pub fn new(enforce: bool, public_paths: Vec<String>) -> Self {
        Self {
            enforce,
            public_paths,
        }
    }

    /// No path requires authentication
    pub fn permit_all() -> Self {
        Self::new(false, Vec::new())
    }

    /// Whether `path` sits under one of the public prefixes.
    ///
    /// Prefixes match on segment boundaries: `/api/auth` covers
    /// `/api/auth/login` but not `/api/authority`. A `/` entry is a catch-all.
    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            prefix.is_empty()
                || path == prefix
                || path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    pub fn requires_auth(&self, path: &str) -> bool {
        self.enforce && !self.is_public(path)
    }
}

/// Caller identity from a valid bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub email: String,
    pub role: Option<String>,
}

/// `Bearer <token>` from the Authorization header, `None` when absent,
/// malformed, or blank
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(parse_bearer)
}

/// Token from an Authorization value. The scheme is case-insensitive.
pub fn parse_bearer(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }
    Some(token.trim()).filter(|t| !t.is_empty())
}

/// Access policy middleware
pub struct AccessPolicyMiddleware {
    policy: Arc<AccessPolicy>,
    keys: Arc<JwtKeys>,
}

impl AccessPolicyMiddleware {
    pub fn new(policy: Arc<AccessPolicy>, keys: Arc<JwtKeys>) -> Self {
        Self { policy, keys }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AccessPolicyMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = AccessPolicyService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AccessPolicyService {
            service,
            policy: self.policy.clone(),
            keys: self.keys.clone(),
        }))
    }
}

pub struct AccessPolicyService<S> {
    service: S,
    policy: Arc<AccessPolicy>,
    keys: Arc<JwtKeys>,
}

impl<S, B> Service<ServiceRequest> for AccessPolicyService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let user = match bearer_token(req.headers()) {
            Some(token) => match self.keys.validate_token(token) {
                Ok(data) => data.claims.identity().map(|email| AuthenticatedUser {
                    email: email.to_string(),
                    role: data.claims.role.clone(),
                }),
                Err(e) => {
                    tracing::debug!(path = %req.path(), "bearer token rejected: {}", e);
                    None
                }
            },
            None => None,
        };

        let authenticated = user.is_some();
        if let Some(user) = user {
            req.extensions_mut().insert(user);
        }

        if self.policy.requires_auth(req.path()) && !authenticated {
            tracing::warn!(
                method = %req.method(),
                path = %req.path(),
                "request rejected by access policy"
            );
            let response = req
                .into_response(unauthorized_response("Authentication required"))
                .map_into_right_body();
            return Box::pin(ready(Ok(response)));
        }

        let fut = self.service.call(req);
        Box::pin(async move { fut.await.map(ServiceResponse::map_into_left_body) })
    }
}

fn unauthorized_response(message: &str) -> HttpResponse {
    HttpResponse::Unauthorized().json(serde_json::json!({
        "error": message,
        "status": 401,
    }))
}

fn unauthorized(message: &'static str) -> Error {
    InternalError::from_response(message, unauthorized_response(message)).into()
}

impl actix_web::FromRequest for AuthenticatedUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(
        req: &actix_web::HttpRequest,
        _payload: &mut actix_web::dev::Payload,
    ) -> Self::Future {
        match req.extensions().get::<AuthenticatedUser>() {
            Some(user) => ready(Ok(user.clone())),
            None => ready(Err(unauthorized("User not authenticated"))),
        }
    }
}
