use crate::cities_cache::{CachedMunicipality, CitiesCacheService};
use crate::config::Config;
use crate::db_storage::LocationCatalog;
use crate::errors::AppError;
use crate::geolocation::GeolocationService;
use crate::models::{AddressModel, City, DiscoveryResult, Neighborhood};
use crate::notifier::{push_progress, ProgressNotifier};
use crate::services::{IbgeService, ViaCepService};
use std::time::Duration;

/// Hard cap on geocoded candidates per run. Geocoding is the expensive,
/// rate-limited step; population filtering happens before this cap applies.
const GEOCODE_CANDIDATE_CAP: usize = 50;

const PROGRESS_EVERY: usize = 10;

/// Discovers which cities and neighborhoods around the reference point
/// should be targeted for search generation.
///
/// Phase 1 keeps nearby municipalities, filtering by estimated population
/// before any geocoding. Phase 2 expands kept cities into their
/// administrative subdivisions, each inheriting the parent city's distance.
pub struct DynamicGeographicDiscoveryService {
    viacep: ViaCepService,
    geolocation: GeolocationService,
    cities_cache: CitiesCacheService,
    ibge: IbgeService,
    catalog: LocationCatalog,
    notifier: Option<ProgressNotifier>,
    radius_km: f64,
    min_population: i64,
    fallback_top_cities: usize,
    request_delay: Duration,
    reference_cep: String,
}

impl DynamicGeographicDiscoveryService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        viacep: ViaCepService,
        geolocation: GeolocationService,
        cities_cache: CitiesCacheService,
        ibge: IbgeService,
        catalog: LocationCatalog,
        notifier: Option<ProgressNotifier>,
        config: &Config,
    ) -> Self {
        Self {
            viacep,
            geolocation,
            cities_cache,
            ibge,
            catalog,
            notifier,
            radius_km: config.discovery_radius_km,
            min_population: config.min_city_population,
            fallback_top_cities: config.discovery_fallback_top_cities,
            request_delay: Duration::from_millis(config.request_delay_ms),
            reference_cep: config.reference_cep.clone(),
        }
    }

    /// Runs both phases against the configured reference CEP and upserts
    /// everything discovered into the location catalog.
    pub async fn discover_from_config(&self) -> Result<DiscoveryResult, AppError> {
        let Some(reference_address) = self.viacep.lookup(&self.reference_cep).await? else {
            return Err(AppError::NotFound(format!(
                "Reference CEP {} is not in the postal directory",
                self.reference_cep
            )));
        };
        let base_city = reference_address.localidade.clone();
        let base_state = reference_address.uf.clone();
        if base_city.trim().is_empty() || base_state.trim().is_empty() {
            return Err(AppError::RemoteUnavailable(
                "Postal directory returned no city/state for the reference CEP".to_string(),
            ));
        }

        tracing::info!(
            "Discovery started around {} - {} (radius {} km, population floor {})",
            base_city,
            base_state,
            self.radius_km,
            self.min_population
        );

        let municipalities = self
            .cities_cache
            .get_state_municipalities(&base_state)
            .await?;

        let (candidates, population_fallback) = select_candidates(
            &municipalities,
            &base_city,
            self.min_population,
            self.fallback_top_cities,
        );

        let cities = self
            .geocode_candidates(candidates, &base_city, &base_state)
            .await;

        for city in &cities {
            if let Err(e) = self.catalog.upsert_city(city).await {
                tracing::error!("Failed to persist city {}: {}", city.name, e);
            }
        }

        let neighborhoods = self.expand_neighborhoods(&cities).await;

        tracing::info!(
            "Discovery finished: {} cities, {} neighborhoods{}",
            cities.len(),
            neighborhoods.len(),
            if population_fallback {
                " (population fallback applied)"
            } else {
                ""
            }
        );

        Ok(DiscoveryResult {
            base_city,
            base_state,
            population_fallback,
            cities,
            neighborhoods,
        })
    }

    /// Geocodes surviving candidates (bounded) and keeps the reference city
    /// plus everything within the radius. One failed lookup never aborts
    /// the run.
    async fn geocode_candidates(
        &self,
        mut candidates: Vec<CachedMunicipality>,
        base_city: &str,
        base_state: &str,
    ) -> Vec<City> {
        if candidates.len() > GEOCODE_CANDIDATE_CAP {
            tracing::warn!(
                "Capping geocoding at {} of {} candidates",
                GEOCODE_CANDIDATE_CAP,
                candidates.len()
            );
            candidates.truncate(GEOCODE_CANDIDATE_CAP);
        }

        let reference = self.geolocation.reference().clone();
        let total = candidates.len();
        let mut kept: Vec<City> = Vec::new();

        for (idx, candidate) in candidates.into_iter().enumerate() {
            if candidate.name.eq_ignore_ascii_case(base_city) {
                // The reference city is kept unconditionally, at the
                // reference coordinates
                kept.push(City {
                    ibge_id: candidate.ibge_id,
                    name: candidate.name,
                    state: base_state.to_string(),
                    population: candidate.population,
                    lat: Some(reference.lat),
                    lon: Some(reference.lon),
                    distance_km: 0.0,
                    is_base: true,
                });
                continue;
            }

            let query_address = AddressModel {
                logradouro: String::new(),
                numero: String::new(),
                complemento: String::new(),
                bairro: String::new(),
                cidade: candidate.name.clone(),
                estado: candidate.state.clone(),
                cep: String::new(),
            };

            match self.geolocation.geocode_address(&query_address).await {
                Ok(Some((lat, lon))) => {
                    let distance_km = self.geolocation.distance_from_reference(lat, lon);
                    if distance_km <= self.radius_km {
                        kept.push(City {
                            ibge_id: candidate.ibge_id,
                            name: candidate.name,
                            state: candidate.state,
                            population: candidate.population,
                            lat: Some(lat),
                            lon: Some(lon),
                            distance_km,
                            is_base: false,
                        });
                    }
                }
                Ok(None) => {
                    tracing::info!("No geocoder match for city {}", candidate.name);
                }
                Err(e) => {
                    tracing::warn!("Skipping city {} after lookup failure: {}", candidate.name, e);
                }
            }

            if (idx + 1) % PROGRESS_EVERY == 0 {
                push_progress(
                    self.notifier.as_ref(),
                    "discovery_cities",
                    idx + 1,
                    total,
                    kept.len(),
                )
                .await;
            }
        }

        // Reference city first, then closest to farthest
        kept.sort_by(|a, b| {
            b.is_base
                .cmp(&a.is_base)
                .then(a.distance_km.total_cmp(&b.distance_km))
        });

        kept
    }

    /// Phase 2: every kept city expands into its administrative
    /// subdivisions. Neighborhoods inherit the parent city's distance
    /// rather than being geocoded individually, which bounds remote-call
    /// volume to one registry call per city.
    async fn expand_neighborhoods(&self, cities: &[City]) -> Vec<Neighborhood> {
        let mut neighborhoods = Vec::new();

        for city in cities {
            let districts = match self.ibge.districts(city.ibge_id).await {
                Ok(districts) => districts,
                Err(e) => {
                    tracing::warn!(
                        "Skipping subdivisions of {} after registry failure: {}",
                        city.name,
                        e
                    );
                    continue;
                }
            };
            self.pace().await;

            for name in districts {
                let neighborhood = Neighborhood {
                    name,
                    city: city.name.clone(),
                    state: city.state.clone(),
                    distance_km: city.distance_km,
                };

                if let Err(e) = self.catalog.upsert_neighborhood(&neighborhood).await {
                    tracing::error!(
                        "Failed to persist neighborhood {}: {}",
                        neighborhood.name,
                        e
                    );
                    continue;
                }
                neighborhoods.push(neighborhood);
            }
        }

        neighborhoods
    }

    async fn pace(&self) {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
    }
}

/// Cheap population filter, applied before any geocoding. When nothing
/// clears the floor the top-N municipalities by population are kept
/// instead, so the result is never empty while municipalities exist; the
/// deviation is surfaced via the returned flag.
fn select_candidates(
    municipalities: &[CachedMunicipality],
    base_city: &str,
    min_population: i64,
    fallback_top_cities: usize,
) -> (Vec<CachedMunicipality>, bool) {
    let mut candidates: Vec<CachedMunicipality> = municipalities
        .iter()
        .filter(|m| m.population >= min_population)
        .cloned()
        .collect();

    let mut population_fallback = false;
    if candidates.is_empty() && !municipalities.is_empty() {
        tracing::warn!(
            "No municipality clears population floor {}, falling back to top {} by population",
            min_population,
            fallback_top_cities
        );
        let mut ranked: Vec<CachedMunicipality> = municipalities.to_vec();
        ranked.sort_by(|a, b| b.population.cmp(&a.population));
        ranked.truncate(fallback_top_cities);
        candidates = ranked;
        population_fallback = true;
    }

    // The reference city always takes part, whatever its population
    if !candidates
        .iter()
        .any(|m| m.name.eq_ignore_ascii_case(base_city))
    {
        if let Some(base) = municipalities
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(base_city))
        {
            candidates.insert(0, base.clone());
        }
    }

    (candidates, population_fallback)
}
