//! # tourbook-server
//!
//! Backend of the tour booking site.
//!
//! This binary provides:
//! - **Tour catalog** REST API (axum) with admin-only writes
//! - **Image uploads** transcoded to size-bounded WebP and served from a
//!   local object store under `/uploads`
//! - **Booking notifications** fanned out to Telegram subscribers, plus the
//!   bot that manages subscriptions
//! - **Per-IP rate limiting** on bookings and admin login

mod api;
mod auth;
mod blob_store;
mod bookings;
mod catalog;
mod config;
mod error;
mod rate_limit;
mod uploads;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tourbook_media::ImageTranscoder;
use tourbook_notify::{
    BotHandle, BroadcastDispatcher, DeliveryTransport, SqliteDirectory, SubscriberDirectory,
    TelegramTransport,
};
use tourbook_store::Database;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::auth::AdminAuth;
use crate::blob_store::FsObjectStore;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Environment and tracing (respects RUST_LOG)
    // -----------------------------------------------------------------------
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,tourbook_server=debug,tourbook_notify=debug")
        }))
        .init();

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded .env");
    }
    info!("Starting tourbook server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.admin_password.is_none() {
        warn!("ADMIN_PASSWORD is not set; admin endpoints are disabled");
    }

    // -----------------------------------------------------------------------
    // 3. Storage
    // -----------------------------------------------------------------------
    let db = Arc::new(Mutex::new(Database::open_at(&config.database_path)?));
    let urls = config.url_mapper();
    let objects = FsObjectStore::new(config.blob_storage_path.clone(), urls.clone()).await?;
    info!(path = %objects.base_path().display(), "Serving uploads under /uploads");
    let directory: Arc<dyn SubscriberDirectory> = Arc::new(SqliteDirectory::new(db.clone()));

    // -----------------------------------------------------------------------
    // 4. Notifications
    // -----------------------------------------------------------------------
    let telegram = match config.telegram_token() {
        Some(token) => Some(TelegramTransport::new(&config.telegram_api_base, token)?),
        None => {
            info!("Telegram disabled (TELEGRAM_ENABLE=false or no TELEGRAM_BOT_TOKEN)");
            None
        }
    };

    let delivery = telegram
        .clone()
        .map(|t| Arc::new(t) as Arc<dyn DeliveryTransport>);
    let dispatcher = BroadcastDispatcher::new(delivery, directory.clone());
    let bot = telegram.map(|t| BotHandle::spawn(t, directory.clone()));

    // -----------------------------------------------------------------------
    // 5. Background tasks
    // -----------------------------------------------------------------------
    let booking_limiter = RateLimiter::for_bookings().trust_proxy(config.trust_proxy);
    let login_limiter = RateLimiter::for_login().trust_proxy(config.trust_proxy);

    // Every 5 minutes, evict buckets idle for more than 10
    let limiters = [booking_limiter.clone(), login_limiter.clone()];
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            for limiter in &limiters {
                limiter.purge_stale(600.0).await;
            }
        }
    });

    // -----------------------------------------------------------------------
    // 6. HTTP API (blocks until shutdown)
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    let state = AppState {
        db,
        objects: Arc::new(objects),
        transcoder: Arc::new(ImageTranscoder::default()),
        dispatcher: Arc::new(dispatcher),
        urls: Arc::new(urls),
        auth: Arc::new(AdminAuth::new(config.admin_password.as_deref())),
        config: Arc::new(config),
        booking_limiter,
        login_limiter,
    };

    let served = api::serve(state, http_addr, shutdown_signal()).await;

    if let Some(bot) = bot {
        bot.stop().await;
    }
    if let Err(e) = &served {
        tracing::error!(error = %e, "HTTP server failed");
    }
    info!("Shutdown complete");
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
