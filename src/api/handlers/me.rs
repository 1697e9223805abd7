//! Endpoints acting on the authenticated user and their sessions.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::{
    types::{SessionSummary, UserResponse},
    utils::{auth_error_response, extract_bearer_token},
};
use crate::auth::{AuthService, Session, User};

async fn authenticate(
    headers: &HeaderMap,
    service: &AuthService,
) -> Result<(User, Session), Response> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err((StatusCode::UNAUTHORIZED, "Missing bearer token".to_string()).into_response());
    };
    service
        .current_user(&token)
        .await
        .map_err(|err| auth_error_response(&err).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    responses(
        (status = 200, description = "Authenticated user", body = UserResponse),
        (status = 401, description = "Token invalid or session expired", body = String)
    ),
    tag = "auth"
)]
pub async fn me(headers: HeaderMap, service: Extension<Arc<AuthService>>) -> impl IntoResponse {
    match authenticate(&headers, &service).await {
        Ok((user, _)) => (StatusCode::OK, Json(UserResponse::from(&user))).into_response(),
        Err(response) => response,
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/sessions",
    responses(
        (status = 200, description = "Live sessions of the authenticated user", body = [SessionSummary]),
        (status = 401, description = "Token invalid or session expired", body = String)
    ),
    tag = "auth"
)]
pub async fn sessions(headers: HeaderMap, service: Extension<Arc<AuthService>>) -> impl IntoResponse {
    let (user, current) = match authenticate(&headers, &service).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    match service.list_user_sessions(&user.id).await {
        Ok(sessions) => {
            let summaries: Vec<SessionSummary> = sessions
                .iter()
                .map(|session| SessionSummary::new(session, &current))
                .collect();
            (StatusCode::OK, Json(summaries)).into_response()
        }
        Err(err) => auth_error_response(&err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/sessions/revoke-all",
    responses(
        (status = 204, description = "Every session of the user was revoked"),
        (status = 401, description = "Token invalid or session expired", body = String)
    ),
    tag = "auth"
)]
pub async fn revoke_all_sessions(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
) -> impl IntoResponse {
    let (user, _) = match authenticate(&headers, &service).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    match service.revoke_all_for_user(&user.id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => auth_error_response(&err).into_response(),
    }
}
