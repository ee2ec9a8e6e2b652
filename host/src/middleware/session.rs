use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Header carrying the session key
pub const SESSION_KEY_HEADER: &str = "x-session-api-key";

/// Session key material, wiped from memory on drop
#[derive(Zeroize, ZeroizeOnDrop)]
struct SessionKey(String);

/// Session key check that extensions attach to their own routes
///
/// With no key configured the guard lets every request through, so
/// extensions can protect routes unconditionally and leave the decision
/// to the host's configuration.
#[derive(Clone, Default)]
pub struct SessionGuard {
    expected: Option<Arc<SessionKey>>,
}

/// Rejection produced by [`SessionGuard`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    #[error("Missing X-Session-API-Key header")]
    MissingKey,

    #[error("Invalid session API key")]
    InvalidKey,
}

impl GuardError {
    fn code(&self) -> &'static str {
        match self {
            GuardError::MissingKey => "missing_session_key",
            GuardError::InvalidKey => "invalid_session_key",
        }
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));
        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}

impl SessionGuard {
    /// Guard requiring `key`; `None` or an empty key disables the check
    pub fn new(key: Option<&str>) -> Self {
        Self {
            expected: key
                .filter(|k| !k.is_empty())
                .map(|k| Arc::new(SessionKey(k.to_string()))),
        }
    }

    /// Guard that lets every request through
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.expected.is_some()
    }

    /// Check a presented key
    pub fn verify(&self, provided: Option<&[u8]>) -> Result<(), GuardError> {
        let Some(expected) = &self.expected else {
            return Ok(());
        };
        let provided = provided.ok_or(GuardError::MissingKey)?;

        if bool::from(expected.0.as_bytes().ct_eq(provided)) {
            Ok(())
        } else {
            Err(GuardError::InvalidKey)
        }
    }

    /// Require the session key on every route of `router`
    ///
    /// Applied as a route layer, so unmatched paths still yield 404.
    pub fn protect(&self, router: Router) -> Router {
        router.route_layer(middleware::from_fn_with_state(
            self.clone(),
            require_session_key,
        ))
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Middleware validating the `X-Session-API-Key` header
///
/// Passes the request through when no key is configured; otherwise returns
/// 401 if the header is missing or does not match.
pub async fn require_session_key(
    State(guard): State<SessionGuard>,
    request: Request,
    next: Next,
) -> Result<Response, GuardError> {
    if !guard.is_enabled() {
        return Ok(next.run(request).await);
    }

    let verdict = guard.verify(
        request
            .headers()
            .get(SESSION_KEY_HEADER)
            .map(|value| value.as_bytes()),
    );

    if let Err(e) = verdict {
        tracing::warn!(
            method = %request.method(),
            path = %request.uri().path(),
            reason = %e,
            "Session key rejected"
        );
        return Err(e);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest, routing::get};
    use tower::util::ServiceExt;

    fn guarded(guard: &SessionGuard) -> Router {
        guard.protect(Router::new().route("/secure", get(|| async { "ok" })))
    }

    fn request(key: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri("/secure");
        if let Some(key) = key {
            builder = builder.header("X-Session-API-Key", key);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_verify() {
        let guard = SessionGuard::new(Some("secret"));
        assert!(guard.is_enabled());
        assert_eq!(guard.verify(Some(b"secret".as_slice())), Ok(()));
        assert_eq!(guard.verify(Some(b"wrong".as_slice())), Err(GuardError::InvalidKey));
        assert_eq!(guard.verify(Some(b"secret-but-longer".as_slice())), Err(GuardError::InvalidKey));
        assert_eq!(guard.verify(None), Err(GuardError::MissingKey));
    }

    #[test]
    fn test_empty_key_disables_guard() {
        assert!(!SessionGuard::new(Some("")).is_enabled());
        assert!(!SessionGuard::new(None).is_enabled());
        assert_eq!(SessionGuard::disabled().verify(None), Ok(()));
    }

    #[tokio::test]
    async fn test_middleware_accepts_matching_key() {
        let app = guarded(&SessionGuard::new(Some("secret")));
        let response = app.oneshot(request(Some("secret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_middleware_rejects_mismatch_and_missing() {
        let guard = SessionGuard::new(Some("secret"));

        let response = guarded(&guard).oneshot(request(Some("nope"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = guarded(&guard).oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_middleware_passes_through_when_disabled() {
        let app = guarded(&SessionGuard::disabled());
        let response = app.oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
