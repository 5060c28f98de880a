use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tourbook_media::{ImageTranscoder, PublicUrlMapper};
use tourbook_notify::BroadcastDispatcher;
use tourbook_store::Database;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{self, AdminAuth};
use crate::blob_store::ObjectStore;
use crate::bookings;
use crate::catalog;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::uploads::{self, MAX_FILES_PER_REQUEST};

/// Largest JSON body accepted outside the upload route.
const JSON_BODY_LIMIT: usize = 10 * 1024 * 1024;

const IMMUTABLE_CACHE: &str = "public, max-age=31536000, immutable";

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub objects: Arc<dyn ObjectStore>,
    pub transcoder: Arc<ImageTranscoder>,
    pub dispatcher: Arc<BroadcastDispatcher>,
    pub urls: Arc<PublicUrlMapper>,
    pub auth: Arc<AdminAuth>,
    pub config: Arc<ServerConfig>,
    pub booking_limiter: RateLimiter,
    pub login_limiter: RateLimiter,
}

pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_size.saturating_mul(MAX_FILES_PER_REQUEST);

    let api = Router::new()
        .route("/health", get(health_check))
        .route("/admin/ping", get(admin_ping))
        .route(
            "/admin/login",
            post(auth::login).layer(middleware::from_fn_with_state(
                state.login_limiter.clone(),
                rate_limit_middleware,
            )),
        )
        .route(
            "/admin/upload",
            post(uploads::upload_images).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/tours", get(catalog::list_tours).post(catalog::create_tour))
        .route(
            "/tours/bookings",
            post(bookings::submit_booking).layer(middleware::from_fn_with_state(
                state.booking_limiter.clone(),
                rate_limit_middleware,
            )),
        )
        .route(
            "/tours/{id}",
            get(catalog::get_tour)
                .put(catalog::update_tour)
                .delete(catalog::delete_tour),
        )
        .route("/ping-telegram", get(bookings::ping_telegram))
        .fallback(api_not_found);

    let static_files = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static(IMMUTABLE_CACHE),
        ))
        .service(ServeDir::new(&state.config.blob_storage_path));

    Router::new()
        .nest("/api", api)
        .nest_service("/uploads", static_files)
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
        .layer(cors_layer(&state.config.origin_whitelist))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Any origin when no whitelist is configured; otherwise only the listed
/// origins, with credentials.
fn cors_layer(whitelist: &[String]) -> CorsLayer {
    if whitelist.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = whitelist
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn admin_ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

async fn api_not_found() -> ServerError {
    ServerError::NotFound("API route not found".to_string())
}

pub async fn serve(
    state: AppState,
    addr: std::net::SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}
