mod auth;
mod client_identity;
mod error_handler;
mod rate_limit;

pub use auth::{AuthenticatedIdentity, BasicAuthGate, auth_middleware};
pub use client_identity::{ClientKey, RequestContext};
pub use error_handler::log_errors;
pub use rate_limit::{Decision, RateLimiter, rate_limit};
