use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, header},
    middleware::Next,
    response::Response,
};
use base64::{Engine, engine::general_purpose::STANDARD};

use crate::{config::Config, error::AppError};

const BASIC: &str = "Basic";

/// Username taken from an accepted `Authorization: Basic` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity(String);

impl AuthenticatedIdentity {
    pub fn new(username: impl Into<String>) -> Self {
        Self(username.into())
    }

    pub fn username(&self) -> &str {
        &self.0
    }
}

/// Gate for private routes: a single shared Basic token is accepted.
///
/// The presented base64 token is compared as a whole against the configured
/// credential; there is no per-user lookup.
pub struct BasicAuthGate {
    credential: String,
}

impl BasicAuthGate {
    pub fn new(config: &Config) -> Self {
        Self {
            credential: config.auth_token.clone(),
        }
    }

    /// Whether the configured credential decodes to a `user:password` pair.
    /// A credential that does not can never authenticate anyone.
    pub fn credential_is_decodable(&self) -> bool {
        decode_username(&self.credential).is_ok()
    }

    pub fn authenticate(
        &self,
        header: Option<&HeaderValue>,
    ) -> Result<AuthenticatedIdentity, AppError> {
        let value = header.and_then(|h| h.to_str().ok()).unwrap_or_default();
        let mut parts = value.split(' ');
        let scheme = parts.next().unwrap_or_default();
        let token = parts.next().unwrap_or_default();

        if scheme != BASIC || token != self.credential {
            return Err(AppError::Unauthorized);
        }

        decode_username(token).map(AuthenticatedIdentity)
    }
}

fn decode_username(token: &str) -> Result<String, AppError> {
    let decoded = STANDARD
        .decode(token)
        .map_err(|e| auth_failure(e.to_string()))?;
    let credentials = String::from_utf8(decoded).map_err(|e| auth_failure(e.to_string()))?;
    let username = credentials.split(':').next().unwrap_or_default();
    Ok(username.to_string())
}

fn auth_failure(cause: String) -> AppError {
    AppError::Internal(format!(
        "An error occurred when checking the authentication of the request: {}",
        cause
    ))
}

pub async fn auth_middleware(
    State(gate): State<Arc<BasicAuthGate>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let identity = gate.authenticate(req.headers().get(header::AUTHORIZATION))?;
    tracing::info!("User is authenticated as {}", identity.username());
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    // "alice:wonderland"
    const TOKEN: &str = "YWxpY2U6d29uZGVybGFuZA==";

    fn gate(credential: &str) -> BasicAuthGate {
        BasicAuthGate {
            credential: credential.to_string(),
        }
    }

    fn header(value: &str) -> HeaderValue {
        HeaderValue::from_str(value).unwrap()
    }

    #[test]
    fn accepts_matching_token() {
        let identity = gate(TOKEN)
            .authenticate(Some(&header(&format!("Basic {}", TOKEN))))
            .unwrap();
        assert_eq!(identity.username(), "alice");
    }

    #[test]
    fn username_without_password() {
        let token = STANDARD.encode("bob");
        let identity = gate(&token)
            .authenticate(Some(&header(&format!("Basic {}", token))))
            .unwrap();
        assert_eq!(identity.username(), "bob");
    }

    #[test]
    fn rejects_missing_wrong_scheme_and_mismatch() {
        let gate = gate(TOKEN);
        let bearer = format!("Bearer {}", TOKEN);
        let lowercase = format!("basic {}", TOKEN);
        let other = format!("Basic {}", STANDARD.encode("alice:guess"));

        assert!(matches!(gate.authenticate(None), Err(AppError::Unauthorized)));
        for value in ["", "Basic", "Basic ", bearer.as_str(), lowercase.as_str(), other.as_str()] {
            assert!(
                matches!(gate.authenticate(Some(&header(value))), Err(AppError::Unauthorized)),
                "{:?} should be rejected",
                value
            );
        }
    }

    #[test]
    fn non_ascii_header_is_unauthorized() {
        let value = HeaderValue::from_bytes(b"Basic \xff\xfe").unwrap();
        assert!(matches!(
            gate(TOKEN).authenticate(Some(&value)),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn undecodable_credential_is_internal() {
        let gate = gate("not-base64!");
        assert!(!gate.credential_is_decodable());
        match gate.authenticate(Some(&header("Basic not-base64!"))) {
            Err(AppError::Internal(message)) => {
                assert!(message.starts_with("An error occurred when checking the authentication"))
            }
            other => panic!("expected internal error, got {:?}", other),
        }
    }

    #[test]
    fn non_utf8_payload_is_internal() {
        let token = STANDARD.encode([0xff, 0xfe, b':', b'x']);
        let gate = gate(&token);
        assert!(matches!(
            gate.authenticate(Some(&header(&format!("Basic {}", token)))),
            Err(AppError::Internal(_))
        ));
    }
}
