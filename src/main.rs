use axum::extract::DefaultBodyLimit;
use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lms_backend::auth::JwtKeys;
use lms_backend::cache::{MemoryCache, RedisCache, SharedCache};
use lms_backend::channels::{Channels, EmailChannel, SmsChannel, TelegramChannel};
use lms_backend::clock::{SharedClock, SystemClock};
use lms_backend::config::{Config, StoreBackend};
use lms_backend::db::{self, Db, PgStore};
use lms_backend::hub::{Hub, WebSocketChannel};
use lms_backend::routes;
use lms_backend::scheduler::DeadlineScheduler;
use lms_backend::state::{AppState, Deps};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "lms_backend=info,axum=info".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let clock: SharedClock = Arc::new(SystemClock);

    let db = match (config.store_backend, config.database_url.as_deref()) {
        (StoreBackend::Postgres, Some(url)) => {
            let pool = db::postgres::connect(url).await?;
            Db::new(Arc::new(PgStore::new(pool)))
        }
        _ => {
            tracing::warn!("running on the in-memory store, data is lost on restart");
            Db::memory()
        }
    };

    let cache: SharedCache = match config.redis_url.as_deref() {
        Some(url) => Arc::new(RedisCache::connect(url).await?),
        None => Arc::new(MemoryCache::new(clock.clone())),
    };

    let hub = Hub::new();
    let http = reqwest::Client::new();
    let mut channels = Channels::new().with(Arc::new(WebSocketChannel::new(hub.clone())));
    if let Some(email) = config.email.clone() {
        channels = channels.with(Arc::new(EmailChannel::new(http.clone(), email)));
    }
    if let Some(telegram) = config.telegram.clone() {
        channels = channels.with(Arc::new(TelegramChannel::new(http.clone(), telegram)));
    }
    if let Some(sms) = config.sms.clone() {
        channels = channels.with(Arc::new(SmsChannel::new(http.clone(), sms)));
    }
    tracing::info!(channels = ?channels.kinds(), "notification channels registered");

    let state = AppState::new(Deps {
        db: db.clone(),
        cache,
        channels,
        hub,
        clock: clock.clone(),
        jwt: JwtKeys::new(&config.jwt_secret, config.jwt_ttl),
        dedup_ttl: config.dedup_ttl,
    });

    let scheduler = DeadlineScheduler::new(
        db,
        state.notifications.clone(),
        clock,
        config.deadline_scan_interval,
    );
    tokio::spawn(scheduler.run());

    let app = routes::router(state)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on http://0.0.0.0:{}", config.port);

    axum::serve(listener, app).await?;
    Ok(())
}
