mod address_extractor;
mod cache_validator;
mod cep_enrichment;
mod circuit_breaker;
mod cities_cache;
mod config;
mod db;
mod db_storage;
mod discovery;
mod errors;
mod geolocation;
mod geolocation_domain;
mod handlers;
mod models;
mod notifier;
mod services;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::address_extractor::AddressExtractor;
use crate::cities_cache::build_cities_memory_cache;
use crate::config::Config;
use crate::db::Database;
use crate::geolocation::ReferencePoint;
use crate::services::{NominatimService, ViaCepService};

/// Main entry point for the application.
///
/// Initializes logging, configuration, the database pool, the municipality
/// cache, the optional progress notifier and, once per process lifetime,
/// the reference point every distance is measured against. Then starts the
/// Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_geoleads_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    // Municipality cache: no TTL, invalidated manually
    let cities_memory = build_cities_memory_cache();
    tracing::info!("Municipality cache initialized");

    // Geocoder client is shared so its circuit breaker state is shared
    let nominatim = match NominatimService::new(&config) {
        Ok(client) => client,
        Err(e) => {
            anyhow::bail!("Failed to initialize geocoder client: {}", e);
        }
    };

    // Optional real-time progress channel
    let progress_notifier = match config.notifier_url.clone() {
        Some(url) => match notifier::ProgressNotifier::new(url.clone()) {
            Ok(client) => {
                tracing::info!("Progress notifier initialized: {}", url);
                Some(client)
            }
            Err(e) => {
                tracing::error!("Failed to initialize progress notifier: {}", e);
                None
            }
        },
        None => None,
    };

    // Resolve the reference point once; falls back to the city centroid
    // rather than refusing to start
    let viacep = ViaCepService::new(&config);
    let reference = ReferencePoint::resolve(&viacep, &nominatim, &config.reference_cep).await;
    tracing::info!(
        "Reference point: ({}, {}){}",
        reference.lat,
        reference.lon,
        if reference.from_fallback {
            " [fallback centroid]"
        } else {
            ""
        }
    );

    // Build application state
    let app_state = Arc::new(handlers::AppState {
        db: db.pool.clone(),
        config: config.clone(),
        reference,
        nominatim,
        notifier: progress_notifier,
        cities_memory,
        extractor: AddressExtractor::new(),
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap(),
    );

    // Build protected routes with security layers
    let protected_routes = Router::new()
        // Geolocation task queue
        .route(
            "/api/v1/geolocation/tasks",
            get(handlers::get_geolocation_tasks),
        )
        .route(
            "/api/v1/geolocation/process",
            post(handlers::process_geolocation_batch),
        )
        .route(
            "/api/v1/geolocation/tasks/:id/process",
            post(handlers::process_geolocation_task),
        )
        // CEP enrichment task queue
        .route("/api/v1/cep/tasks", get(handlers::get_cep_tasks))
        .route("/api/v1/cep/process", post(handlers::process_cep_batch))
        // Geographic discovery
        .route("/api/v1/discovery/run", post(handlers::run_discovery))
        // Address extraction for the scraping collaborator
        .route(
            "/api/v1/addresses/extract",
            post(handlers::extract_address),
        )
        // Manual municipality-cache invalidation
        .route(
            "/api/v1/cache/cities/:uf/invalidate",
            post(handlers::invalidate_cities_cache),
        )
        .layer(
            ServiceBuilder::new()
                // Request size limit: 5MB max payload (scraped pages get big)
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Build final app with health check (bypasses rate limiting)
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
