use crate::address_extractor::AddressExtractor;
use crate::cep_enrichment::{AddressEnrichmentService, CepTaskProcessor};
use crate::cities_cache::{CitiesCacheService, CitiesMemoryCache};
use crate::config::Config;
use crate::db_storage::{CitiesCacheStore, LocationCatalog, TaskStorage};
use crate::discovery::DynamicGeographicDiscoveryService;
use crate::errors::AppError;
use crate::geolocation::{GeolocationService, ReferencePoint};
use crate::geolocation_domain::GeolocationDomainService;
use crate::models::*;
use crate::notifier::ProgressNotifier;
use crate::services::{IbgeService, NominatimService, ViaCepService};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Application configuration.
    pub config: Config,
    /// Reference point resolved once at startup; read-only afterwards.
    pub reference: ReferencePoint,
    /// Geocoder client; clones share one circuit breaker.
    pub nominatim: NominatimService,
    /// Optional real-time progress channel.
    pub notifier: Option<ProgressNotifier>,
    /// In-memory layer of the municipality cache (no TTL).
    pub cities_memory: CitiesMemoryCache,
    /// Compiled extraction pipeline.
    pub extractor: AddressExtractor,
}

impl AppState {
    fn geolocation_service(&self) -> GeolocationService {
        GeolocationService::new(
            ViaCepService::new(&self.config),
            self.nominatim.clone(),
            self.reference.clone(),
            &self.config,
        )
    }

    fn domain_service(&self) -> GeolocationDomainService {
        GeolocationDomainService::new(
            self.geolocation_service(),
            AddressEnrichmentService::new(&self.config),
            TaskStorage::new(self.db.clone()),
            self.notifier.clone(),
        )
    }

    fn cep_processor(&self) -> CepTaskProcessor {
        CepTaskProcessor::new(
            TaskStorage::new(self.db.clone()),
            AddressEnrichmentService::new(&self.config),
            self.notifier.clone(),
        )
    }

    fn cities_cache_service(&self) -> CitiesCacheService {
        CitiesCacheService::new(
            IbgeService::new(&self.config),
            CitiesCacheStore::new(self.db.clone()),
            self.cities_memory.clone(),
            self.config.request_delay_ms,
        )
    }

    fn discovery_service(&self) -> DynamicGeographicDiscoveryService {
        DynamicGeographicDiscoveryService::new(
            ViaCepService::new(&self.config),
            self.geolocation_service(),
            self.cities_cache_service(),
            IbgeService::new(&self.config),
            LocationCatalog::new(self.db.clone()),
            self.notifier.clone(),
            &self.config,
        )
    }
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-geoleads-api",
            "version": "0.1.0"
        })),
    )
}

/// GET /api/v1/geolocation/tasks
///
/// Lists the geolocation tasks still waiting for processing.
pub async fn get_geolocation_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<GeolocationTask>>, AppError> {
    let tasks = TaskStorage::new(state.db.clone())
        .pending_geolocation_tasks()
        .await?;

    Ok(Json(tasks))
}

/// POST /api/v1/geolocation/process
///
/// Runs the geolocation batch over a snapshot of pending tasks. Strictly
/// sequential against the remote geocoder.
pub async fn process_geolocation_batch(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GeolocationBatchSummary>, AppError> {
    tracing::info!("POST /geolocation/process");

    let summary = state.domain_service().process_pending().await?;
    Ok(Json(summary))
}

/// POST /api/v1/geolocation/tasks/:id/process
///
/// Processes one geolocation task through the full state machine.
pub async fn process_geolocation_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<GeolocationOutcome>, AppError> {
    tracing::info!("POST /geolocation/tasks/{}/process", id);

    let task = TaskStorage::new(state.db.clone())
        .get_geolocation_task(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Geolocation task {} not found", id)))?;

    let outcome = state.domain_service().process_single(&task).await?;
    Ok(Json(outcome))
}

/// GET /api/v1/cep/tasks
pub async fn get_cep_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CepEnrichmentTask>>, AppError> {
    let tasks = TaskStorage::new(state.db.clone()).pending_cep_tasks().await?;

    Ok(Json(tasks))
}

/// POST /api/v1/cep/process
///
/// Runs the CEP-enrichment batch over a snapshot of pending tasks.
pub async fn process_cep_batch(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CepBatchSummary>, AppError> {
    tracing::info!("POST /cep/process");

    let summary = state.cep_processor().process_pending().await?;
    Ok(Json(summary))
}

/// POST /api/v1/discovery/run
///
/// Discovers nearby cities and neighborhoods around the reference CEP and
/// upserts them into the location catalog.
pub async fn run_discovery(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DiscoveryResult>, AppError> {
    tracing::info!("POST /discovery/run");

    let result = state.discovery_service().discover_from_config().await?;

    tracing::info!(
        "Discovery returned {} cities / {} neighborhoods around {}",
        result.cities.len(),
        result.neighborhoods.len(),
        result.base_city
    );

    Ok(Json(result))
}

/// POST /api/v1/addresses/extract
///
/// Extraction endpoint for the scraping collaborator: raw markup in,
/// structured address (or null) out. Never fails on malformed input.
pub async fn extract_address(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExtractRequest>,
) -> Json<Option<AddressModel>> {
    let extracted = state.extractor.extract_from_html(request.html.as_deref());

    if let Some(ref address) = extracted {
        tracing::debug!("Extracted address: {}", address.single_line());
    }

    Json(extracted)
}

/// POST /api/v1/cache/cities/:uf/invalidate
///
/// Manual invalidation of one state's municipality cache. The cache has no
/// TTL, so this is the only invalidation path.
pub async fn invalidate_cities_cache(
    State(state): State<Arc<AppState>>,
    Path(uf): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!("POST /cache/cities/{}/invalidate", uf);

    state.cities_cache_service().invalidate(&uf).await?;

    Ok(Json(json!({
        "invalidated": uf.to_uppercase(),
    })))
}
