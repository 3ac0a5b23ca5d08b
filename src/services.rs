use crate::circuit_breaker::{create_geocoder_circuit_breaker, GeocoderCircuitBreaker};
use crate::config::Config;
use crate::errors::AppError;
use crate::models::AddressModel;
use failsafe::futures::CircuitBreaker;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

// ============ ViaCEP (postal-code directory) ============

/// Partial address returned by the postal-code directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViaCepAddress {
    #[serde(default)]
    pub cep: String,
    #[serde(default)]
    pub logradouro: String,
    #[serde(default)]
    pub complemento: String,
    #[serde(default)]
    pub bairro: String,
    #[serde(default)]
    pub localidade: String,
    #[serde(default)]
    pub uf: String,
}

impl ViaCepAddress {
    /// Converts the directory response into the pipeline's address shape.
    /// The directory has no street-number granularity, so `numero` and
    /// `complemento` stay empty.
    pub fn model(&self) -> AddressModel {
        AddressModel {
            logradouro: self.logradouro.clone(),
            numero: String::new(),
            complemento: String::new(),
            bairro: self.bairro.clone(),
            cidade: self.localidade.clone(),
            estado: self.uf.clone(),
            cep: self.cep.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ViaCepService {
    client: Client,
    base_url: String,
}

impl ViaCepService {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.viacep_base_url.clone(),
        }
    }

    /// Looks a CEP up in the directory.
    ///
    /// `Ok(None)` means the directory knows no such CEP; transport and
    /// protocol failures surface as `RemoteUnavailable`. A malformed CEP is
    /// rejected before any remote call.
    pub async fn lookup(&self, cep: &str) -> Result<Option<ViaCepAddress>, AppError> {
        let digits: String = cep.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() != 8 {
            return Err(AppError::Validation(format!(
                "CEP must contain exactly 8 digits, got '{}'",
                cep
            )));
        }

        let url = format!("{}/ws/{}/json/", self.base_url, digits);
        tracing::debug!("ViaCEP lookup for {}", digits);

        let response = self.client.get(&url).send().await.map_err(|e| {
            AppError::RemoteUnavailable(format!("ViaCEP request failed: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::RemoteUnavailable(format!(
                "ViaCEP returned status {}",
                status
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            AppError::RemoteUnavailable(format!("Failed to parse ViaCEP response: {}", e))
        })?;

        // Unknown CEPs come back as 200 with {"erro": true}
        if body.get("erro").is_some() {
            tracing::info!("ViaCEP has no match for {}", digits);
            return Ok(None);
        }

        let address: ViaCepAddress = serde_json::from_value(body).map_err(|e| {
            AppError::RemoteUnavailable(format!("Unexpected ViaCEP payload: {}", e))
        })?;

        Ok(Some(address))
    }
}

// ============ Nominatim (geocoder) ============

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

/// Clones share the underlying circuit breaker state.
#[derive(Clone)]
pub struct NominatimService {
    client: Client,
    base_url: String,
    breaker: GeocoderCircuitBreaker,
}

impl NominatimService {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        // Nominatim's usage policy requires an identifying User-Agent.
        let client = Client::builder()
            .user_agent("rust-geoleads-api/0.1 (lead geolocation pipeline)")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::InternalError(format!("Failed to create geocoder client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.nominatim_base_url.clone(),
            breaker: create_geocoder_circuit_breaker(),
        })
    }

    /// Geocodes a free-text query against the shared remote geocoder.
    ///
    /// `Ok(None)` means no match. Callers must serialize calls to this
    /// method; it is guarded by a circuit breaker, not a request queue.
    pub async fn search(&self, query: &str) -> Result<Option<(f64, f64)>, AppError> {
        if query.trim().is_empty() {
            return Err(AppError::Validation(
                "Geocoding query cannot be empty".to_string(),
            ));
        }

        // Build URL with proper parameter encoding
        let url = Url::parse_with_params(
            &format!("{}/search", self.base_url),
            &[
                ("q", query),
                ("format", "json"),
                ("limit", "1"),
                ("countrycodes", "br"),
            ],
        )
        .map_err(|e| AppError::InternalError(format!("Failed to build URL: {}", e)))?;

        tracing::debug!("Geocoding query: {}", query);

        // Non-success statuses count as breaker failures too, not just
        // transport errors
        let guarded = async {
            let response = self.client.get(url).send().await.map_err(|e| {
                AppError::RemoteUnavailable(format!("Geocoder request failed: {}", e))
            })?;

            if !response.status().is_success() {
                return Err(AppError::RemoteUnavailable(format!(
                    "Geocoder returned status {}",
                    response.status()
                )));
            }

            Ok(response)
        };

        let response = self.breaker.call(guarded).await.map_err(|e| match e {
            failsafe::Error::Inner(err) => err,
            failsafe::Error::Rejected => AppError::RemoteUnavailable(
                "Geocoder circuit breaker open, call rejected".to_string(),
            ),
        })?;

        let places: Vec<NominatimPlace> = response.json().await.map_err(|e| {
            AppError::RemoteUnavailable(format!("Failed to parse geocoder response: {}", e))
        })?;

        let Some(place) = places.first() else {
            tracing::info!("Geocoder has no match for '{}'", query);
            return Ok(None);
        };

        let lat: f64 = place.lat.parse().map_err(|_| {
            AppError::RemoteUnavailable(format!("Geocoder returned bad latitude '{}'", place.lat))
        })?;
        let lon: f64 = place.lon.parse().map_err(|_| {
            AppError::RemoteUnavailable(format!("Geocoder returned bad longitude '{}'", place.lon))
        })?;

        Ok(Some((lat, lon)))
    }
}

// ============ IBGE (administrative-subdivision registry) ============

/// Municipality as listed by the geographic registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbgeMunicipality {
    pub id: i64,
    pub nome: String,
}

#[derive(Clone)]
pub struct IbgeService {
    client: Client,
    base_url: String,
}

impl IbgeService {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.ibge_base_url.clone(),
        }
    }

    /// Resolves a state abbreviation ("SP") to its registry id (35).
    pub async fn state_id(&self, uf: &str) -> Result<i64, AppError> {
        let url = format!("{}/api/v1/localidades/estados/{}", self.base_url, uf);

        let body: Value = self.fetch_json(&url, "state lookup").await?;

        body.get("id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| AppError::NotFound(format!("Unknown state '{}'", uf)))
    }

    /// All municipalities of a state in one bulk call.
    pub async fn municipalities(&self, uf: &str) -> Result<Vec<IbgeMunicipality>, AppError> {
        let url = format!(
            "{}/api/v1/localidades/estados/{}/municipios",
            self.base_url, uf
        );

        tracing::info!("Fetching municipality list for state {}", uf);
        let body: Value = self.fetch_json(&url, "municipality list").await?;

        let municipalities: Vec<IbgeMunicipality> =
            serde_json::from_value(body).map_err(|e| {
                AppError::RemoteUnavailable(format!("Unexpected municipality payload: {}", e))
            })?;

        tracing::info!("Registry listed {} municipalities for {}", municipalities.len(), uf);
        Ok(municipalities)
    }

    /// Latest population estimate for every municipality of a state, one
    /// bulk call against the aggregates API. Keyed by municipality id.
    pub async fn population_by_state(&self, state_id: i64) -> Result<HashMap<i64, i64>, AppError> {
        let url = format!(
            "{}/api/v3/agregados/6579/periodos/-1/variaveis/9324?localidades=N6[N3[{}]]",
            self.base_url, state_id
        );

        tracing::info!("Fetching population estimates for state id {}", state_id);
        let body: Value = self.fetch_json(&url, "population estimates").await?;

        // Aggregate payloads nest as [ { resultados: [ { series: [
        //   { localidade: { id: "3550308" }, serie: { "2024": "11451245" } } ] } ] } ]
        let mut populations = HashMap::new();
        let series = body
            .get(0)
            .and_then(|v| v.get("resultados"))
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("series"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        for entry in &series {
            let id = entry
                .get("localidade")
                .and_then(|l| l.get("id"))
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<i64>().ok());
            let population = entry
                .get("serie")
                .and_then(|s| s.as_object())
                .and_then(|periods| periods.values().last())
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<i64>().ok());

            if let (Some(id), Some(population)) = (id, population) {
                populations.insert(id, population);
            }
        }

        if populations.is_empty() {
            tracing::warn!("Population aggregate returned no usable series");
        }

        Ok(populations)
    }

    /// District names of one municipality.
    pub async fn districts(&self, municipality_id: i64) -> Result<Vec<String>, AppError> {
        let url = format!(
            "{}/api/v1/localidades/municipios/{}/distritos",
            self.base_url, municipality_id
        );

        let body: Value = self.fetch_json(&url, "district list").await?;

        let names = body
            .as_array()
            .map(|districts| {
                districts
                    .iter()
                    .filter_map(|d| d.get("nome").and_then(|v| v.as_str()))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(names)
    }

    async fn fetch_json(&self, url: &str, what: &str) -> Result<Value, AppError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            AppError::RemoteUnavailable(format!("Registry {} request failed: {}", what, e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::RemoteUnavailable(format!(
                "Registry {} returned status {}",
                what, status
            )));
        }

        response.json().await.map_err(|e| {
            AppError::RemoteUnavailable(format!("Failed to parse registry {}: {}", what, e))
        })
    }
}
