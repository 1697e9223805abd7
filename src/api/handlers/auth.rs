//! Login, registration, logout and token refresh endpoints.

use axum::{
    Json,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
};
use secrecy::SecretString;
use std::{net::SocketAddr, sync::Arc};
use tracing::error;

use super::{
    types::{LoginRequest, LoginResponse, RegisterRequest, TokenResponse, UserResponse},
    utils::{ClientIpPolicy, auth_error_response, extract_bearer_token, user_agent},
    valid_email,
};
use crate::auth::{AuthError, AuthService, LoginInput, RegisterInput, user::normalize_email};

const MIN_PASSWORD_LENGTH: usize = 8;
const REMAINING_ATTEMPTS_HEADER: &str = "x-login-attempts-remaining";

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 409, description = "Email already registered", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Extension(client_ip): Extension<ClientIpPolicy>,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let request: RegisterRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }
    if request.password.chars().count() < MIN_PASSWORD_LENGTH {
        return (
            StatusCode::BAD_REQUEST,
            format!("Password must be at least {MIN_PASSWORD_LENGTH} characters long"),
        )
            .into_response();
    }

    let input = RegisterInput {
        email,
        password: SecretString::from(request.password),
        name: request.name,
        ip: client_ip.resolve(&headers, peer.as_ref()),
    };

    match service.register(input).await {
        Ok(user) => (StatusCode::CREATED, Json(UserResponse::from(&user))).into_response(),
        Err(err) => auth_error_response(&err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session created", body = LoginResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Invalid email or password", body = String),
        (status = 403, description = "Account disabled or not activated", body = String),
        (status = 409, description = "Already logged in", body = String),
        (status = 429, description = "Rate limited, locked out or concurrent login", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Extension(client_ip): Extension<ClientIpPolicy>,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }
    if request.password.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing password".to_string()).into_response();
    }

    let input = LoginInput {
        email: email.clone(),
        password: SecretString::from(request.password),
        ip: client_ip.resolve(&headers, peer.as_ref()),
        user_agent: user_agent(&headers),
        existing_token: extract_bearer_token(&headers),
    };

    match service.login(input).await {
        Ok(output) => {
            let response = LoginResponse {
                token: output.token,
                expires_at: output.session.expires_at,
                user: UserResponse::from(&output.user),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err @ AuthError::InvalidCredentials) => {
            let mut response_headers = HeaderMap::new();
            match service.remaining_login_attempts(&email).await {
                Ok(remaining) => {
                    response_headers.insert(REMAINING_ATTEMPTS_HEADER, HeaderValue::from(remaining));
                }
                Err(lookup) => error!("Failed to read remaining login attempts: {lookup}"),
            }
            (response_headers, auth_error_response(&err)).into_response()
        }
        Err(err) => auth_error_response(&err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session ended (or was already gone)"),
        (status = 401, description = "Missing or malformed bearer token", body = String)
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, service: Extension<Arc<AuthService>>) -> impl IntoResponse {
    let Some(token) = extract_bearer_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, "Missing bearer token".to_string()).into_response();
    };

    match service.logout(&token).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => auth_error_response(&err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    responses(
        (status = 200, description = "Session rotated; the old token no longer works", body = TokenResponse),
        (status = 401, description = "Token invalid or session expired", body = String)
    ),
    tag = "auth"
)]
pub async fn refresh(headers: HeaderMap, service: Extension<Arc<AuthService>>) -> impl IntoResponse {
    let Some(token) = extract_bearer_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, "Missing bearer token".to_string()).into_response();
    };

    match service.refresh(&token).await {
        Ok(token) => (StatusCode::OK, Json(TokenResponse { token })).into_response(),
        Err(err) => auth_error_response(&err).into_response(),
    }
}
