use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::debug;

/// Shared-secret bearer authentication for the admin endpoints.
#[derive(Clone, Debug, Default)]
pub struct AdminAuth {
    token: Option<Arc<str>>,
}

impl AdminAuth {
    /// `None` disables the check.
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.map(Arc::from),
        }
    }

    pub fn is_enforced(&self) -> bool {
        self.token.is_some()
    }

    fn permits(&self, headers: &HeaderMap) -> Result<(), StatusCode> {
        let Some(expected) = self.token.as_deref() else {
            return Ok(());
        };

        let presented = extract_bearer(headers)?;
        if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

pub async fn admin_auth_middleware(
    State(auth): State<AdminAuth>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Err(status) = auth.permits(req.headers()) {
        debug!(path = %req.uri().path(), "admin request rejected");
        return Err(status);
    }

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::AUTHORIZATION, HeaderValue};

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn open_when_no_token_configured() {
        let auth = AdminAuth::new(None);
        assert!(!auth.is_enforced());
        assert!(auth.permits(&HeaderMap::new()).is_ok());
    }

    #[test]
    fn requires_matching_bearer() {
        let auth = AdminAuth::new(Some("s3cret".to_string()));
        assert_eq!(auth.permits(&HeaderMap::new()), Err(StatusCode::UNAUTHORIZED));
        assert_eq!(auth.permits(&headers("Bearer nope")), Err(StatusCode::UNAUTHORIZED));
        assert_eq!(auth.permits(&headers("Basic s3cret")), Err(StatusCode::UNAUTHORIZED));
        assert_eq!(auth.permits(&headers("Bearer    ")), Err(StatusCode::UNAUTHORIZED));
        assert!(auth.permits(&headers("Bearer s3cret")).is_ok());
    }
}
