//! # Actix Middleware Library
//!
//! Shared middleware for campus Actix services
//!
//! ## Modules
//! - `access_policy`: explicit endpoint authorization policy backed by bearer tokens
//! - `logging`: request logging with `X-Request-Id` propagation

pub mod access_policy;
pub mod logging;

pub use access_policy::{
    bearer_token, parse_bearer, AccessPolicy, AccessPolicyMiddleware, AuthenticatedUser,
};
pub use logging::{Logging, RequestId};
