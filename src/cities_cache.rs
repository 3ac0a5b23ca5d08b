use crate::cache_validator::SealedPayload;
use crate::db_storage::CitiesCacheStore;
use crate::errors::AppError;
use crate::services::IbgeService;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Municipality entry as cached: everything the discovery pass needs to
/// filter cheaply before any geocoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedMunicipality {
    pub ibge_id: i64,
    pub name: String,
    pub state: String,
    pub population: i64,
}

/// In-memory layer shared across requests. No TTL: municipality lists are
/// near-static reference data, invalidated manually.
pub type CitiesMemoryCache = Cache<String, Vec<CachedMunicipality>>;

pub fn build_cities_memory_cache() -> CitiesMemoryCache {
    // 27 federative units
    Cache::builder().max_capacity(64).build()
}

/// Per-state municipality/population cache bounding registry calls.
///
/// Read order: memory, then the checksum-sealed DB row, then two bulk
/// registry calls (municipality list + population aggregate). A row that
/// fails checksum or JSON verification counts as a miss and is refetched.
pub struct CitiesCacheService {
    ibge: IbgeService,
    store: CitiesCacheStore,
    memory: CitiesMemoryCache,
    request_delay: Duration,
}

impl CitiesCacheService {
    pub fn new(
        ibge: IbgeService,
        store: CitiesCacheStore,
        memory: CitiesMemoryCache,
        request_delay_ms: u64,
    ) -> Self {
        Self {
            ibge,
            store,
            memory,
            request_delay: Duration::from_millis(request_delay_ms),
        }
    }

    pub async fn get_state_municipalities(
        &self,
        uf: &str,
    ) -> Result<Vec<CachedMunicipality>, AppError> {
        let uf = uf.trim().to_uppercase();
        if uf.len() != 2 || !uf.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(AppError::Validation(format!(
                "State must be a two-letter abbreviation, got '{}'",
                uf
            )));
        }

        if let Some(cached) = self.memory.get(&uf).await {
            tracing::debug!("Municipality cache hit (memory) for {}", uf);
            return Ok(cached);
        }

        if let Some(sealed) = self.store.load(&uf).await? {
            if let Some(payload) = sealed.into_verified() {
                match serde_json::from_str::<Vec<CachedMunicipality>>(&payload) {
                    Ok(municipalities) => {
                        tracing::debug!("Municipality cache hit (persisted) for {}", uf);
                        self.memory.insert(uf, municipalities.clone()).await;
                        return Ok(municipalities);
                    }
                    Err(e) => {
                        tracing::warn!("Persisted municipality cache for {} unreadable: {}", uf, e);
                    }
                }
            }
            // Sealed row failed verification: fall through and rebuild
        }

        let municipalities = self.fetch_from_registry(&uf).await?;

        let payload = serde_json::to_string(&municipalities)
            .map_err(|e| AppError::InternalError(format!("Failed to encode cache: {}", e)))?;
        self.store.save(&uf, &SealedPayload::seal(payload)).await?;
        self.memory.insert(uf, municipalities.clone()).await;

        Ok(municipalities)
    }

    /// Manual invalidation: drops both the persisted row and the memory
    /// entry. There is no TTL path.
    pub async fn invalidate(&self, uf: &str) -> Result<(), AppError> {
        let uf = uf.trim().to_uppercase();
        self.store.delete(&uf).await?;
        self.memory.invalidate(&uf).await;
        tracing::info!("Municipality cache invalidated for {}", uf);
        Ok(())
    }

    async fn fetch_from_registry(&self, uf: &str) -> Result<Vec<CachedMunicipality>, AppError> {
        tracing::info!("Building municipality cache for {} from registry", uf);

        let state_id = self.ibge.state_id(uf).await?;
        self.pace().await;

        let listed = self.ibge.municipalities(uf).await?;
        self.pace().await;

        let populations = self.ibge.population_by_state(state_id).await?;
        self.pace().await;

        let municipalities: Vec<CachedMunicipality> = listed
            .into_iter()
            .map(|m| CachedMunicipality {
                population: populations.get(&m.id).copied().unwrap_or(0),
                ibge_id: m.id,
                name: m.nome,
                state: uf.to_string(),
            })
            .collect();

        tracing::info!(
            "Cached {} municipalities for {} ({} with population estimates)",
            municipalities.len(),
            uf,
            municipalities.iter().filter(|m| m.population > 0).count()
        );

        Ok(municipalities)
    }

    async fn pace(&self) {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
    }
}
