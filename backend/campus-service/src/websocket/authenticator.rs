//! Connection authenticator
//!
//! Decides the principal attached to a socket session when the client sends
//! its STOMP `CONNECT` frame. Connections are never rejected here; a client
//! with no usable identity becomes the anonymous guest.
//!
//! Sources, first match wins:
//! 1. `Authorization: Bearer <token>` whose signature and structure verify.
//!    An expired token still yields its identity.
//! 2. `X-User-Email`, when the token is absent or unusable.
//! 3. Otherwise `anonymous` with `ROLE_GUEST`.
//!
//! Blank header values count as absent. Identities carrying control
//! characters are unusable.

use crate::stomp::Frame;
use actix_middleware::parse_bearer;
use crypto_core::{usable_identity, JwtKeys};
use std::fmt;
use std::sync::Arc;

pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const USER_EMAIL_HEADER: &str = "X-User-Email";
pub const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Guest,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "ROLE_USER",
            Role::Guest => "ROLE_GUEST",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity attached to one connection for its lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: vec![Role::User],
        }
    }

    pub fn anonymous() -> Self {
        Self {
            name: ANONYMOUS.to_string(),
            roles: vec![Role::Guest],
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.roles.contains(&Role::Guest)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Where a resolved identity came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// Bearer token; `expired` is set when `exp` had already passed
    Token { expired: bool },
    /// `X-User-Email` header
    Header,
}

impl IdentitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentitySource::Token { expired: false } => "token",
            IdentitySource::Token { expired: true } => "expired_token",
            IdentitySource::Header => "header",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityResolution {
    Resolved {
        identity: String,
        source: IdentitySource,
    },
    Anonymous,
}

impl IdentityResolution {
    pub fn into_principal(self) -> Principal {
        match self {
            IdentityResolution::Resolved { identity, .. } => Principal::user(identity),
            IdentityResolution::Anonymous => Principal::anonymous(),
        }
    }
}

#[derive(Clone)]
pub struct ConnectionAuthenticator {
    keys: Arc<JwtKeys>,
}

impl ConnectionAuthenticator {
    pub fn new(keys: Arc<JwtKeys>) -> Self {
        Self { keys }
    }

    /// Run the fallback chain over raw header values
    pub fn resolve(
        &self,
        authorization: Option<&str>,
        user_email: Option<&str>,
    ) -> IdentityResolution {
        if let Some(authorization) = non_blank(authorization) {
            if let Some(resolved) = self.identity_from_authorization(authorization) {
                return resolved;
            }
        }

        match user_email.and_then(usable_identity) {
            Some(email) => IdentityResolution::Resolved {
                identity: email.to_string(),
                source: IdentitySource::Header,
            },
            None => IdentityResolution::Anonymous,
        }
    }

    /// Resolve the principal for a `CONNECT` frame
    pub fn authenticate(&self, connect: &Frame) -> Principal {
        let resolution = self.resolve(
            header_ignore_case(connect, AUTHORIZATION_HEADER),
            header_ignore_case(connect, USER_EMAIL_HEADER),
        );

        match &resolution {
            IdentityResolution::Resolved { identity, source } => tracing::info!(
                identity = %identity,
                source = source.as_str(),
                "socket principal resolved"
            ),
            IdentityResolution::Anonymous => {
                tracing::info!("socket principal resolved as anonymous")
            }
        }

        resolution.into_principal()
    }

    fn identity_from_authorization(&self, authorization: &str) -> Option<IdentityResolution> {
        let Some(token) = parse_bearer(authorization) else {
            tracing::debug!("authorization header is not a bearer credential");
            return None;
        };

        let status = match self.keys.inspect_token(token) {
            Ok(status) => status,
            Err(e) => {
                tracing::debug!(error = %e, "bearer token unusable, trying fallback header");
                return None;
            }
        };

        let expired = status.is_expired();
        status
            .claims()
            .identity()
            .map(|identity| IdentityResolution::Resolved {
                identity: identity.to_string(),
                source: IdentitySource::Token { expired },
            })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn header_ignore_case<'a>(frame: &'a Frame, name: &str) -> Option<&'a str> {
    frame
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
