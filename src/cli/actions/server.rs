use crate::{
    api::{self, ClientIpPolicy},
    auth::{
        Argon2Hasher, AuthService, BackgroundTasks, MemoryStore, PgUserRepository,
        RateLimitConfig, SessionConfig,
    },
};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const DB_MAX_CONNECTIONS: u32 = 10;
const DB_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub request_timeout_seconds: u64,
    pub trust_proxy_headers: bool,
    pub sweep_interval_seconds: u64,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("port", &self.port)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .field("sweep_interval_seconds", &self.sweep_interval_seconds)
            .field("session", &self.session)
            .field("rate_limit", &self.rate_limit)
            .finish_non_exhaustive()
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Server args: {args:?}");

    let pool = PgPoolOptions::new()
        .max_connections(DB_MAX_CONNECTIONS)
        .acquire_timeout(DB_ACQUIRE_TIMEOUT)
        .connect(&args.dsn)
        .await
        .context("Failed to connect to database")?;

    let store = Arc::new(MemoryStore::new());
    let tasks = BackgroundTasks::new();
    let sweeper = CancellationToken::new();
    tasks.spawn_sweeper(
        Arc::clone(&store),
        Duration::from_secs(args.sweep_interval_seconds),
        sweeper.clone(),
    );

    let service = Arc::new(AuthService::new(
        store,
        Arc::new(PgUserRepository::new(pool.clone())),
        Arc::new(Argon2Hasher),
        args.session,
        args.rate_limit,
        tasks.clone(),
    ));

    let app = api::app(
        service,
        Some(pool.clone()),
        Duration::from_secs(args.request_timeout_seconds),
        ClientIpPolicy::new().with_trust_proxy_headers(args.trust_proxy_headers),
    );

    let served = api::serve(args.port, app).await;

    info!("Waiting for background tasks");
    sweeper.cancel();
    tasks.shutdown().await;
    pool.close().await;

    served
}
