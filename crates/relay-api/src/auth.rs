//! Bearer token gate
//!
//! Validates `Authorization: Bearer <token>` on every request except
//! `/health`. The gate fails closed: with no secret configured nothing is
//! approved.

use axum::{body::Body, extract::Request, middleware::Next, response::Response};
use relay_core::{GatewayError, Secret};
use tracing::warn;

use crate::error::ApiError;

const BEARER_PREFIX: &str = "Bearer ";

/// Approves or rejects inbound credentials against one shared secret
#[derive(Clone, Debug)]
pub struct AuthGate {
    secret: Option<Secret>,
}

impl AuthGate {
    /// An empty secret counts as no secret
    pub fn new(secret: Option<Secret>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    /// Gate that rejects everything
    pub fn closed() -> Self {
        Self { secret: None }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Check a raw `Authorization` header value
    pub fn check(&self, header: Option<&str>) -> Result<(), GatewayError> {
        let Some(expected) = &self.secret else {
            return Err(GatewayError::AuthRejected);
        };

        match header.and_then(|h| h.strip_prefix(BEARER_PREFIX)) {
            Some(provided) if provided == expected.expose() => Ok(()),
            _ => Err(GatewayError::AuthRejected),
        }
    }

    pub fn approve(&self, header: Option<&str>) -> bool {
        self.check(header).is_ok()
    }
}

/// Axum middleware applying the [`AuthGate`] from the request extensions.
///
/// Skips `/health`. Rejections are 401 with a fixed body.
pub async fn auth_middleware(
    gate: axum::extract::Extension<AuthGate>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match gate.check(header) {
        Ok(()) => Ok(next.run(request).await),
        Err(_) => {
            if !gate.is_configured() {
                warn!(path = %request.uri().path(), "Rejecting request, no auth token configured");
            } else {
                warn!(path = %request.uri().path(), "Missing or invalid bearer token");
            }
            Err(ApiError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(secret: &str) -> AuthGate {
        AuthGate::new(Some(Secret::new(secret)))
    }

    #[test]
    fn test_exact_token_approved() {
        assert!(gate("s3cret").approve(Some("Bearer s3cret")));
    }

    #[test]
    fn test_wrong_token_rejected() {
        let gate = gate("s3cret");
        assert!(!gate.approve(Some("Bearer s3cre")));
        assert!(!gate.approve(Some("Bearer s3cret ")));
        assert!(!gate.approve(Some("Bearer ")));
    }

    #[test]
    fn test_other_schemes_rejected() {
        let gate = gate("s3cret");
        assert!(!gate.approve(Some("Basic s3cret")));
        assert!(!gate.approve(Some("bearer s3cret")));
        assert!(!gate.approve(Some("s3cret")));
        assert!(!gate.approve(None));
    }

    #[test]
    fn test_no_secret_rejects_everything() {
        for gate in [AuthGate::closed(), AuthGate::new(None), AuthGate::new(Some(Secret::new("")))] {
            assert!(!gate.is_configured());
            assert!(!gate.approve(Some("Bearer anything-at-all")));
            assert!(!gate.approve(Some("Bearer ")));
            assert!(!gate.approve(None));
        }
    }

    #[test]
    fn test_debug_hides_secret() {
        let rendered = format!("{:?}", gate("s3cret"));
        assert!(!rendered.contains("s3cret"));
    }
}
