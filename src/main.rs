use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Extension, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use tavola_api::config;
use tavola_api::database::manager::DatabaseManager;
use tavola_api::handlers;
use tavola_api::live::{transport::RedisTransport, LiveUpdateBroker};
use tavola_api::middleware::{jwt_auth_middleware, resolve_tenant_middleware};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, REDIS_URL, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    let config = config::config();
    tracing::info!("Starting Tavola API in {:?} mode", config.environment);

    // Registry DDL is idempotent; a missing database only degrades /health
    if let Err(e) = DatabaseManager::ensure_master_schema().await {
        tracing::warn!("Master schema not applied at startup: {}", e);
    }

    let broker = build_broker(&config.live).await;
    let app = app(broker);

    // Allow tests or deployments to override port via env
    let port = std::env::var("TAVOLA_API_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!("Tavola API listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// The Redis publisher/subscriber pair is created at most once per process,
/// here. A failed connection falls back to local-only delivery rather than
/// refusing to start.
async fn build_broker(live: &config::LiveConfig) -> Arc<LiveUpdateBroker> {
    match &live.redis_url {
        Some(url) => match RedisTransport::connect(url).await {
            Ok((transport, inbound)) => {
                let broker = LiveUpdateBroker::new(live.channel_capacity, Some(transport));
                broker.spawn_inbound(inbound);
                broker
            }
            Err(e) => {
                tracing::warn!(
                    "Redis unavailable, live updates are process-local only: {}",
                    e
                );
                LiveUpdateBroker::new(live.channel_capacity, None)
            }
        },
        None => LiveUpdateBroker::new(live.channel_capacity, None),
    }
}

fn app(broker: Arc<LiveUpdateBroker>) -> Router {
    Router::new()
        // Tenant-agnostic routes
        .route("/", get(root))
        .route("/health", get(health))
        .route("/signup", post(handlers::signup::signup_post))
        // Registry administration
        .merge(admin_routes())
        // Tenant-scoped API
        .merge(api_routes())
        // Global middleware
        .layer(Extension(broker))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router {
    // JWT decode runs before tenant resolution so the token claim can act
    // as the identifier of last resort
    let session = Router::new()
        .route(
            "/api/session/modules",
            get(handlers::session::session_modules),
        )
        .layer(axum_middleware::from_fn(resolve_tenant_middleware))
        .layer(axum_middleware::from_fn(jwt_auth_middleware));

    let live = Router::new()
        .route("/api/live/stream", get(handlers::live_stream::live_stream))
        .layer(axum_middleware::from_fn(resolve_tenant_middleware));

    session.merge(live)
}

fn admin_routes() -> Router {
    Router::new().route(
        "/admin/tenants/:restaurant_id/plan",
        post(handlers::admin::assign_plan_post),
    )
}

async fn root() -> axum::response::Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    axum::response::Json(json!({
        "success": true,
        "data": {
            "name": "Tavola API",
            "version": version,
            "description": "Multi-tenant restaurant POS backend (Axum)",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "signup": "/signup (public - tenant provisioning)",
                "admin": "/admin/tenants/:restaurant_id/plan (registry administration)",
                "session": "/api/session/modules (tenant-scoped, JWT)",
                "live": "/api/live/stream (tenant-scoped, SSE)",
            }
        }
    }))
}

async fn health() -> impl axum::response::IntoResponse {
    let now = chrono::Utc::now();

    match DatabaseManager::health_check().await {
        Ok(_) => (
            axum::http::StatusCode::OK,
            axum::response::Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok",
                    "pools": DatabaseManager::pools_created(),
                }
            })),
        ),
        Err(e) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            axum::response::Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string()
                }
            })),
        ),
    }
}
