use crate::config::Config;
use crate::errors::AppError;
use crate::models::AddressModel;
use crate::services::{NominatimService, ViaCepService};
use std::time::Duration;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// São Paulo centroid, used when the configured reference CEP cannot be
/// resolved at startup. Startup must not fail over a geocoder hiccup.
const FALLBACK_REFERENCE: (f64, f64) = (-23.5505, -46.6333);

/// The fixed coordinate every distance is measured against.
///
/// Resolved once per process lifetime from the configured reference CEP and
/// injected into the services that need it; read-only thereafter.
#[derive(Debug, Clone)]
pub struct ReferencePoint {
    pub lat: f64,
    pub lon: f64,
    /// True when resolution failed and the hardcoded centroid is in use.
    pub from_fallback: bool,
}

impl ReferencePoint {
    /// Resolves the reference CEP through the directory → geocoder chain.
    /// Any failure falls back to the city centroid with a warning.
    pub async fn resolve(
        viacep: &ViaCepService,
        nominatim: &NominatimService,
        reference_cep: &str,
    ) -> Self {
        match Self::try_resolve(viacep, nominatim, reference_cep).await {
            Ok(Some((lat, lon))) => {
                tracing::info!(
                    "Reference point resolved from CEP {}: ({}, {})",
                    reference_cep,
                    lat,
                    lon
                );
                Self {
                    lat,
                    lon,
                    from_fallback: false,
                }
            }
            Ok(None) => {
                tracing::warn!(
                    "Reference CEP {} has no geocoder match, using city centroid fallback",
                    reference_cep
                );
                Self::fallback()
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to resolve reference CEP {}: {}, using city centroid fallback",
                    reference_cep,
                    e
                );
                Self::fallback()
            }
        }
    }

    async fn try_resolve(
        viacep: &ViaCepService,
        nominatim: &NominatimService,
        reference_cep: &str,
    ) -> Result<Option<(f64, f64)>, AppError> {
        let Some(directory_address) = viacep.lookup(reference_cep).await? else {
            return Ok(None);
        };
        let query = build_address_query(&directory_address.model());
        nominatim.search(&query).await
    }

    pub fn fallback() -> Self {
        Self {
            lat: FALLBACK_REFERENCE.0,
            lon: FALLBACK_REFERENCE.1,
            from_fallback: true,
        }
    }
}

/// Geocodes addresses and postal codes and measures distances against the
/// injected reference point.
///
/// Not safe (or polite) to call concurrently against the shared remote
/// geocoder: callers are expected to serialize calls, and an inter-request
/// pause is awaited after every remote call.
pub struct GeolocationService {
    viacep: ViaCepService,
    nominatim: NominatimService,
    reference: ReferencePoint,
    request_delay: Duration,
}

impl GeolocationService {
    pub fn new(
        viacep: ViaCepService,
        nominatim: NominatimService,
        reference: ReferencePoint,
        config: &Config,
    ) -> Self {
        Self {
            viacep,
            nominatim,
            reference,
            request_delay: Duration::from_millis(config.request_delay_ms),
        }
    }

    pub fn reference(&self) -> &ReferencePoint {
        &self.reference
    }

    /// Geocodes a structured address via a single free-text query.
    ///
    /// City, state and country qualifiers are always appended for precision.
    /// `Ok(None)` means the geocoder had no match.
    pub async fn geocode_address(
        &self,
        address: &AddressModel,
    ) -> Result<Option<(f64, f64)>, AppError> {
        if !address.is_valid() {
            return Err(AppError::Validation(
                "Address has no locatable field to geocode".to_string(),
            ));
        }

        let query = build_address_query(address);
        let result = self.nominatim.search(&query).await;
        self.pace().await;
        result
    }

    /// CEP → directory address → geocode chain.
    pub async fn geocode_postal_code(&self, cep: &str) -> Result<Option<(f64, f64)>, AppError> {
        let lookup = self.viacep.lookup(cep).await;
        self.pace().await;

        let Some(directory_address) = lookup? else {
            return Ok(None);
        };

        self.geocode_address(&directory_address.model()).await
    }

    /// Haversine great-circle distance in km, rounded to 2 decimals.
    pub fn calculate_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        let d_lat = (lat2 - lat1).to_radians();
        let d_lon = (lon2 - lon1).to_radians();

        let a = (d_lat / 2.0).sin().powi(2)
            + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        round2(EARTH_RADIUS_KM * c)
    }

    pub fn distance_from_reference(&self, lat: f64, lon: f64) -> f64 {
        Self::calculate_distance(self.reference.lat, self.reference.lon, lat, lon)
    }

    /// Backpressure between remote calls (~1 req/s rate discipline).
    async fn pace(&self) {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
    }
}

/// Renders the structured address as one geocoder query, always appending
/// the country qualifier.
pub fn build_address_query(address: &AddressModel) -> String {
    let line = address.single_line();
    if line.is_empty() {
        "Brasil".to_string()
    } else {
        format!("{}, Brasil", line)
    }
}

fn round2(km: f64) -> f64 {
    (km * 100.0).round() / 100.0
}
