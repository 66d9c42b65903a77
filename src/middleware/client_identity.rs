use std::fmt;
use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::ConnectInfo,
    http::{Extensions, HeaderMap},
};

use super::auth::AuthenticatedIdentity;
use crate::error::AppError;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// What the rate limiter knows about a request, captured once per request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub identity: Option<AuthenticatedIdentity>,
    /// First value of the forwarded-address header, if any.
    pub forwarded_for: Option<String>,
    pub peer: Option<SocketAddr>,
}

impl RequestContext {
    pub fn from_parts(headers: &HeaderMap, extensions: &Extensions) -> Self {
        Self {
            identity: extensions.get::<AuthenticatedIdentity>().cloned(),
            forwarded_for: headers
                .get_all(X_FORWARDED_FOR)
                .iter()
                .next()
                .and_then(|h| h.to_str().ok())
                .map(str::to_string),
            peer: extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}

/// Subject of a rate limit counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    User(String),
    Address(String),
}

impl ClientKey {
    /// Authenticated username first, then the first forwarded address, then the peer.
    pub fn resolve(ctx: &RequestContext) -> Result<Self, AppError> {
        if let Some(identity) = &ctx.identity {
            return Ok(ClientKey::User(identity.username().to_string()));
        }

        ctx.forwarded_for
            .as_deref()
            .and_then(|list| list.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(normalize_address)
            .or_else(|| ctx.peer.map(|addr| addr.ip().to_canonical().to_string()))
            .map(ClientKey::Address)
            .ok_or_else(|| {
                AppError::Internal(
                    "An error occurred when checking the request: IP cannot be retrieved".into(),
                )
            })
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKey::User(name) => write!(f, "user:{}", name),
            ClientKey::Address(ip) => write!(f, "ip:{}", ip),
        }
    }
}

// "::ffff:10.0.0.1" 与 "10.0.0.1" 视为同一个客户端
fn normalize_address(raw: &str) -> String {
    match raw.parse::<IpAddr>() {
        Ok(ip) => ip.to_canonical().to_string(),
        Err(_) => raw.to_string(),
    }
}
