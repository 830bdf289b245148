//! Towermap Service - HTTP microservice for cell tower area search.
//!
//! Answers tower searches from a local SQLite cache, topping it up from
//! OpenCelliD within a daily call quota.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `OPENCELLID_API_KEY` | OpenCelliD API key; unset = cache-only | None |
//! | `OPENCELLID_BASE_URL` | OpenCelliD base URL | `https://opencellid.org/cell` |
//! | `TOWERMAP_DB` | SQLite database path | `towermap.db` |
//! | `TOWERMAP_DAILY_LIMIT` | Provider calls per UTC day | 1000 |
//! | `TOWERMAP_CACHE_HOURS` | Freshness window in hours | 24 |
//! | `TOWERMAP_TILE_KM` | Tile side in km | 1.5 |
//! | `TOWERMAP_FETCH_WORKERS` | Concurrent tile fetches | 1 |
//! | `TOWERMAP_PORT` | HTTP server port | 5001 |
//! | `RUST_LOG` | Log level (e.g., "info", "debug") | "info" |
//!
//! ## Endpoints
//!
//! - `POST /api/towers/search` - Search towers around a point
//! - `GET /api/towers/{id}` - Get a cached tower
//! - `GET /api/status` - Quota usage and tower counts
//! - `GET /api/stats` - Search counters
//! - `GET /health` - Health check
//! - `GET /docs` - OpenAPI documentation (Swagger UI)

use std::net::SocketAddr;
use std::sync::Arc;

use towermap::AreaSearchCacheBuilder;
use towermap_service::{handlers, router, AppState};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

const DEFAULT_DB_PATH: &str = "towermap.db";

/// OpenAPI documentation for the Towermap service.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Towermap Service",
        version = "0.1.0",
        description = "Cached, quota-aware cell tower search over OpenCelliD.",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    paths(
        handlers::search_towers,
        handlers::get_tower,
        handlers::get_status,
        handlers::get_stats,
        handlers::health_check,
    ),
    components(
        schemas(
            handlers::SearchRequest,
            handlers::SearchResponse,
            handlers::TowerResponse,
            handlers::StatusResponse,
            handlers::StatsResponse,
            handlers::ErrorResponse,
            handlers::ValidationErrorResponse,
            handlers::HealthResponse,
        )
    ),
    tags(
        (name = "towers", description = "Tower search and lookup"),
        (name = "system", description = "System and health endpoints")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "towermap=info,towermap_service=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load port from environment (service-specific config)
    let port: u16 = std::env::var("TOWERMAP_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5001);

    // The service always persists; the library defaults to memory otherwise
    let db_path = std::env::var("TOWERMAP_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

    // The blocking HTTP client must not be created on an async worker
    let cache = tokio::task::spawn_blocking(move || {
        AreaSearchCacheBuilder::from_env().database(db_path).build()
    })
    .await??;

    let config = cache.config();
    tracing::info!(
        daily_limit = config.daily_limit,
        freshness_hours = config.freshness.num_hours(),
        tile_km = config.tile_km,
        fetch_workers = config.fetch_workers,
        api_key_configured = cache.has_provider(),
        port = port,
        "Starting Towermap service"
    );
    if !cache.has_provider() {
        tracing::warn!("OPENCELLID_API_KEY not set, serving cached data only");
    }

    let state = Arc::new(AppState { cache });

    // Build router
    let app = router(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
