//! Header parsing and error mapping shared by the auth handlers.

use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
};
use std::net::SocketAddr;
use tracing::error;

use crate::auth::AuthError;

const UNKNOWN_CLIENT_IP: &str = "unknown";

/// Extract a client IP for rate limiting from common proxy headers.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// How the rate-limit key of a request is derived.
///
/// By default only the peer address counts. Proxy headers are honored only when
/// enabled, since any client can set them.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClientIpPolicy {
    trust_proxy_headers: bool,
}

impl ClientIpPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `x-forwarded-for` / `x-real-ip` before the peer address. Enable only
    /// behind a proxy that overwrites those headers.
    #[must_use]
    pub fn with_trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    #[must_use]
    pub fn trusts_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }

    /// Requests without a usable source share one rate-limit bucket.
    #[must_use]
    pub fn resolve(&self, headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
        let forwarded = if self.trust_proxy_headers {
            extract_client_ip(headers)
        } else {
            None
        };
        forwarded
            .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
            .unwrap_or_else(|| UNKNOWN_CLIENT_IP.to_string())
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Map an auth failure to a status and a client-safe message. Internal errors
/// are logged here and never echoed.
pub fn auth_error_response(err: &AuthError) -> (StatusCode, String) {
    let status = match err {
        AuthError::InvalidCredentials | AuthError::InvalidToken | AuthError::SessionExpired => {
            StatusCode::UNAUTHORIZED
        }
        AuthError::UserDisabled | AuthError::UserNotActivated => StatusCode::FORBIDDEN,
        AuthError::AlreadyLoggedIn | AuthError::UserAlreadyExists => StatusCode::CONFLICT,
        AuthError::RateLimitExceeded | AuthError::ConcurrentLogin | AuthError::UserLocked => {
            StatusCode::TOO_MANY_REQUESTS
        }
        AuthError::Internal(inner) => {
            error!("Auth operation failed: {inner:#}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            );
        }
    };
    (status, err.to_string())
}
