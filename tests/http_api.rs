//! End-to-end tests of the HTTP surface.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot` over an
//! in-memory store and user repository, so no database or socket is needed.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use dashmap::DashMap;
use gatehouse::{
    api,
    auth::{
        AuthService, BackgroundTasks, CreateUserOutcome, Hasher, MemoryStore, NewUser,
        RateLimitConfig, SessionConfig, User, UserRepository,
    },
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tower::ServiceExt;

struct ReversingHasher;

impl Hasher for ReversingHasher {
    fn hash(&self, plain: &str) -> Result<String> {
        Ok(plain.chars().rev().collect())
    }

    fn verify(&self, plain: &str, hash: &str) -> bool {
        plain.chars().rev().eq(hash.chars())
    }
}

#[derive(Default)]
struct Users {
    by_id: DashMap<String, User>,
    next_id: AtomicUsize,
}

#[async_trait]
impl UserRepository for Users {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .by_id
            .iter()
            .find(|user| user.email == email)
            .map(|user| user.value().clone()))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        Ok(self.by_id.get(id).map(|user| user.clone()))
    }

    async fn email_exists(&self, email: &str) -> Result<bool> {
        Ok(self.by_id.iter().any(|user| user.email == email))
    }

    async fn create(&self, new: NewUser) -> Result<CreateUserOutcome> {
        if self.email_exists(&new.email).await? {
            return Ok(CreateUserOutcome::Conflict);
        }
        let now = Utc::now();
        let user = User {
            id: format!("u{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            email: new.email,
            name: new.name,
            password_hash: new.password_hash,
            status: new.status,
            last_ip: new.ip,
            created_at: now,
            updated_at: now,
        };
        self.by_id.insert(user.id.clone(), user.clone());
        Ok(CreateUserOutcome::Created(user))
    }

    async fn update_last_ip(&self, id: &str, ip: &str) -> Result<()> {
        let mut user = self
            .by_id
            .get_mut(id)
            .ok_or_else(|| anyhow!("no user {id}"))?;
        user.last_ip = Some(ip.to_string());
        Ok(())
    }
}

fn test_app() -> Router {
    app_with(api::ClientIpPolicy::new())
}

fn app_with(client_ip: api::ClientIpPolicy) -> Router {
    let service = AuthService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(Users::default()),
        Arc::new(ReversingHasher),
        SessionConfig::new(),
        RateLimitConfig::new(),
        BackgroundTasks::new(),
    );
    api::app(Arc::new(service), None, Duration::from_secs(5), client_ip)
}

fn peer(ip: &str) -> Result<ConnectInfo<SocketAddr>> {
    let ip: IpAddr = ip.parse()?;
    Ok(ConnectInfo(SocketAddr::new(ip, 40000)))
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    ip: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, Option<String>, Value)> {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let mut request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => request.body(Body::empty())?,
    };
    request.extensions_mut().insert(peer(ip)?);
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> Result<(StatusCode, Option<String>, Value)> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let remaining = response
        .headers()
        .get("x-login-attempts-remaining")
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    let bytes = response.into_body().collect().await?.to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    Ok((status, remaining, value))
}

/// A failed login for `email` from `peer_ip` that claims to come from `forwarded_for`.
async fn forwarded_login(
    app: &Router,
    email: &str,
    peer_ip: &str,
    forwarded_for: &str,
) -> Result<(StatusCode, Value)> {
    let body = json!({ "email": email, "password": "wrong-password" });
    let mut request = Request::builder()
        .method("POST")
        .uri("/v1/auth/login")
        .header("x-forwarded-for", forwarded_for)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body)?))?;
    request.extensions_mut().insert(peer(peer_ip)?);
    let (status, _, body) = send(app, request).await?;
    Ok((status, body))
}

async fn register(app: &Router, email: &str, password: &str) -> Result<StatusCode> {
    let (status, _, _) = call(
        app,
        "POST",
        "/v1/auth/register",
        "198.51.100.1",
        None,
        Some(json!({ "email": email, "password": password, "name": "Ada" })),
    )
    .await?;
    Ok(status)
}

async fn login(app: &Router, email: &str, password: &str, ip: &str) -> Result<(StatusCode, Option<String>, Value)> {
    call(
        app,
        "POST",
        "/v1/auth/login",
        ip,
        None,
        Some(json!({ "email": email, "password": password })),
    )
    .await
}

fn token_of(body: &Value) -> Result<String> {
    body["token"]
        .as_str()
        .map(ToString::to_string)
        .context("response has no token")
}

#[tokio::test]
async fn health_reports_missing_database() -> Result<()> {
    let app = test_app();
    let (status, _, body) = call(&app, "GET", "/health", "192.0.2.1", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "gatehouse");
    assert_eq!(body["database"], "not configured");
    Ok(())
}

#[tokio::test]
async fn session_lifecycle() -> Result<()> {
    let app = test_app();
    assert_eq!(register(&app, "Ada@Example.com", "hunter2hunter2").await?, StatusCode::CREATED);

    let (status, _, body) = login(&app, "ada@example.com", "hunter2hunter2", "192.0.2.10").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "ada@example.com");
    let token = token_of(&body)?;

    let (status, _, me) = call(&app, "GET", "/v1/auth/me", "192.0.2.10", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["name"], "Ada");
    assert!(me.get("password_hash").is_none());

    let (status, _, sessions) =
        call(&app, "GET", "/v1/auth/sessions", "192.0.2.10", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let sessions = sessions.as_array().context("sessions is not a list")?;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["current"], true);
    assert_eq!(sessions[0]["ip"], "192.0.2.10");
    assert!(sessions[0].get("token").is_none());

    let (status, _, body) =
        call(&app, "POST", "/v1/auth/refresh", "192.0.2.10", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let rotated = token_of(&body)?;
    assert_ne!(rotated, token);

    let (status, _, _) = call(&app, "GET", "/v1/auth/me", "192.0.2.10", Some(&token), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) =
        call(&app, "POST", "/v1/auth/logout", "192.0.2.10", Some(&rotated), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) =
        call(&app, "POST", "/v1/auth/logout", "192.0.2.10", Some(&rotated), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = call(&app, "GET", "/v1/auth/me", "192.0.2.10", Some(&rotated), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn register_validates_and_rejects_duplicates() -> Result<()> {
    let app = test_app();
    assert_eq!(register(&app, "not-an-email", "hunter2hunter2").await?, StatusCode::BAD_REQUEST);
    assert_eq!(register(&app, "ada@example.com", "short").await?, StatusCode::BAD_REQUEST);
    assert_eq!(register(&app, "ada@example.com", "hunter2hunter2").await?, StatusCode::CREATED);
    assert_eq!(register(&app, "ADA@example.com", "hunter2hunter2").await?, StatusCode::CONFLICT);

    let (status, _, _) = call(&app, "POST", "/v1/auth/register", "192.0.2.1", None, None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn wrong_password_reports_remaining_attempts() -> Result<()> {
    let app = test_app();
    register(&app, "ada@example.com", "hunter2hunter2").await?;

    let (status, remaining, body) = login(&app, "ada@example.com", "wrong-password", "192.0.2.20").await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(remaining.as_deref(), Some("4"));
    assert_eq!(body, "invalid email or password");

    let (status, _, unknown) = login(&app, "nobody@example.com", "wrong-password", "192.0.2.21").await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown, body);
    Ok(())
}

#[tokio::test]
async fn repeated_failures_lock_the_account() -> Result<()> {
    let app = test_app();
    register(&app, "ada@example.com", "hunter2hunter2").await?;

    for attempt in 0..5 {
        let ip = format!("203.0.113.{attempt}");
        let (status, _, _) = login(&app, "ada@example.com", "wrong-password", &ip).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, _, body) = login(&app, "ada@example.com", "hunter2hunter2", "203.0.113.99").await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, "account temporarily locked after too many failed logins");
    Ok(())
}

#[tokio::test]
async fn ip_limit_applies_across_accounts() -> Result<()> {
    let app = test_app();
    for n in 0..5 {
        let (status, _, _) = login(&app, &format!("user{n}@example.com"), "whatever", "192.0.2.30").await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, _, body) = login(&app, "user9@example.com", "whatever", "192.0.2.30").await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, "too many requests, please try again later");
    Ok(())
}

#[tokio::test]
async fn login_with_live_session_conflicts() -> Result<()> {
    let app = test_app();
    register(&app, "ada@example.com", "hunter2hunter2").await?;
    let (_, _, body) = login(&app, "ada@example.com", "hunter2hunter2", "192.0.2.40").await?;
    let token = token_of(&body)?;

    let (status, _, _) = call(
        &app,
        "POST",
        "/v1/auth/login",
        "192.0.2.40",
        Some(&token),
        Some(json!({ "email": "ada@example.com", "password": "hunter2hunter2" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn revoke_all_ends_every_session() -> Result<()> {
    let app = test_app();
    register(&app, "ada@example.com", "hunter2hunter2").await?;
    let (_, _, first) = login(&app, "ada@example.com", "hunter2hunter2", "192.0.2.50").await?;
    let (_, _, second) = login(&app, "ada@example.com", "hunter2hunter2", "192.0.2.51").await?;
    let first = token_of(&first)?;
    let second = token_of(&second)?;

    let (status, _, sessions) =
        call(&app, "GET", "/v1/auth/sessions", "192.0.2.50", Some(&first), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sessions.as_array().map(Vec::len), Some(2));

    let (status, _, _) = call(
        &app,
        "POST",
        "/v1/auth/sessions/revoke-all",
        "192.0.2.50",
        Some(&first),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    for token in [&first, &second] {
        let (status, _, _) = call(&app, "GET", "/v1/auth/me", "192.0.2.50", Some(token), None).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

#[tokio::test]
async fn bearer_token_is_required() -> Result<()> {
    let app = test_app();
    for (method, uri) in [
        ("GET", "/v1/auth/me"),
        ("GET", "/v1/auth/sessions"),
        ("POST", "/v1/auth/logout"),
        ("POST", "/v1/auth/refresh"),
    ] {
        let (status, _, _) = call(&app, method, uri, "192.0.2.60", None, None).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
    }

    let (status, _, _) = call(&app, "GET", "/v1/auth/me", "192.0.2.60", Some("garbage"), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn responses_carry_a_request_id() -> Result<()> {
    let app = test_app();
    let request = Request::builder().uri("/health").body(Body::empty())?;
    let response = app.oneshot(request).await?;
    assert!(response.headers().contains_key("x-request-id"));
    Ok(())
}

#[tokio::test]
async fn spoofed_forwarded_for_does_not_escape_the_ip_limit() -> Result<()> {
    let app = test_app();
    for n in 0..5 {
        let (status, _) = forwarded_login(
            &app,
            &format!("user{n}@example.com"),
            "192.0.2.70",
            &format!("10.0.0.{n}"),
        )
        .await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, body) =
        forwarded_login(&app, "user9@example.com", "192.0.2.70", "10.0.0.99").await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, "too many requests, please try again later");
    Ok(())
}

#[tokio::test]
async fn trusted_proxy_headers_key_the_ip_limit() -> Result<()> {
    let app = app_with(api::ClientIpPolicy::new().with_trust_proxy_headers(true));
    for n in 0..5 {
        let (status, _) = forwarded_login(
            &app,
            &format!("user{n}@example.com"),
            "192.0.2.80",
            "198.51.100.7",
        )
        .await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, body) =
        forwarded_login(&app, "user8@example.com", "192.0.2.80", "198.51.100.7").await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, "too many requests, please try again later");

    let (status, _) =
        forwarded_login(&app, "user9@example.com", "192.0.2.80", "198.51.100.8").await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}
