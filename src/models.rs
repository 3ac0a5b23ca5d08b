use crate::errors::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============ Address value object ============

/// Structured Brazilian postal address.
///
/// Immutable by convention: enrichment and correction produce new instances
/// instead of mutating in place. Defaults assume the collection area
/// (São Paulo/SP) so partially extracted addresses stay geocodable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressModel {
    #[serde(default)]
    pub logradouro: String,
    #[serde(default)]
    pub numero: String,
    #[serde(default)]
    pub complemento: String,
    #[serde(default)]
    pub bairro: String,
    #[serde(default = "AddressModel::default_cidade")]
    pub cidade: String,
    #[serde(default = "AddressModel::default_estado")]
    pub estado: String,
    #[serde(default)]
    pub cep: String,
}

impl Default for AddressModel {
    fn default() -> Self {
        Self {
            logradouro: String::new(),
            numero: String::new(),
            complemento: String::new(),
            bairro: String::new(),
            cidade: Self::default_cidade(),
            estado: Self::default_estado(),
            cep: String::new(),
        }
    }
}

impl AddressModel {
    fn default_cidade() -> String {
        "São Paulo".to_string()
    }

    fn default_estado() -> String {
        "SP".to_string()
    }

    /// An address is usable when at least one locating field is present.
    pub fn is_valid(&self) -> bool {
        !self.logradouro.trim().is_empty()
            || !self.bairro.trim().is_empty()
            || !self.cidade.trim().is_empty()
    }

    /// CEP reduced to its digits. Empty when no CEP was captured.
    pub fn cep_digits(&self) -> String {
        self.cep.chars().filter(|c| c.is_ascii_digit()).collect()
    }

    pub fn has_cep(&self) -> bool {
        self.cep_digits().len() == 8
    }

    /// Returns a copy with empty `logradouro`, `bairro`, `cidade` and
    /// `estado` filled from `other`. Non-empty fields are preserved verbatim;
    /// `numero` and `complemento` are scrape-observed ground truth and are
    /// never taken from a lookup.
    pub fn filled_with(&self, other: &AddressModel) -> AddressModel {
        fn pick(own: &str, looked_up: &str) -> String {
            if own.trim().is_empty() {
                looked_up.to_string()
            } else {
                own.to_string()
            }
        }

        AddressModel {
            logradouro: pick(&self.logradouro, &other.logradouro),
            numero: self.numero.clone(),
            complemento: self.complemento.clone(),
            bairro: pick(&self.bairro, &other.bairro),
            cidade: pick(&self.cidade, &other.cidade),
            estado: pick(&self.estado, &other.estado),
            cep: self.cep.clone(),
        }
    }

    /// Degraded copy keeping only city/state, used as the last geocoding
    /// fallback when street-level data cannot be resolved.
    pub fn city_only(&self) -> AddressModel {
        AddressModel {
            logradouro: String::new(),
            numero: String::new(),
            complemento: String::new(),
            bairro: String::new(),
            cidade: self.cidade.clone(),
            estado: self.estado.clone(),
            cep: String::new(),
        }
    }

    /// Single-line rendering skipping empty fields, e.g.
    /// "Rua Augusta, 1500, Consolação, São Paulo, SP, 01304-001".
    pub fn single_line(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for field in [
            self.logradouro.as_str(),
            self.numero.as_str(),
            self.bairro.as_str(),
            self.cidade.as_str(),
            self.estado.as_str(),
            self.cep.as_str(),
        ] {
            let trimmed = field.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed);
            }
        }
        parts.join(", ")
    }
}

/// True iff the enrichment measurably improved the address: at least one of
/// `logradouro`, `bairro`, `cidade`, `estado` went from empty to non-empty.
/// Fields that were already present (even if wrong) never count.
pub fn address_was_enriched(original: &AddressModel, enriched: &AddressModel) -> bool {
    fn gained(before: &str, after: &str) -> bool {
        before.trim().is_empty() && !after.trim().is_empty()
    }

    gained(&original.logradouro, &enriched.logradouro)
        || gained(&original.bairro, &enriched.bairro)
        || gained(&original.cidade, &enriched.cidade)
        || gained(&original.estado, &enriched.estado)
}

// ============ Task state machine ============

/// Task lifecycle status. `Done` and `Error` are terminal; tasks are never
/// re-enqueued automatically. Stored as TEXT (`PENDING`/`DONE`/`ERROR`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Done,
    Error,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Done => "DONE",
            TaskStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }

    /// Pure transition check: only PENDING may move, and only to a terminal
    /// state. Everything else (notably ERROR → DONE) is rejected.
    pub fn transition(self, next: TaskStatus) -> Result<TaskStatus, AppError> {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::Done) | (TaskStatus::Pending, TaskStatus::Error) => {
                Ok(next)
            }
            _ => Err(AppError::Validation(format!(
                "Invalid task transition {:?} -> {:?}",
                self, next
            ))),
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        match value.as_str() {
            "PENDING" => Ok(TaskStatus::Pending),
            "DONE" => Ok(TaskStatus::Done),
            "ERROR" => Ok(TaskStatus::Error),
            other => Err(format!("Unknown task status '{}'", other)),
        }
    }
}

/// One geolocation unit of work, created once per company with a valid
/// address.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GeolocationTask {
    pub id: Uuid,
    pub company_id: Uuid,
    pub address_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub distance_km: Option<f64>,
    pub error_message: Option<String>,
    /// Set when the stored address was self-healed during processing.
    pub address_corrected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One CEP-enrichment unit of work.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CepEnrichmentTask {
    pub id: Uuid,
    pub company_id: Uuid,
    pub address_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Address row as persisted by the record store. The pipeline reads and
/// updates it only through `db_storage` operations.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AddressRecord {
    pub id: Uuid,
    pub logradouro: String,
    pub numero: String,
    pub complemento: String,
    pub bairro: String,
    pub cidade: String,
    pub estado: String,
    pub cep: String,
}

impl AddressRecord {
    pub fn model(&self) -> AddressModel {
        AddressModel {
            logradouro: self.logradouro.clone(),
            numero: self.numero.clone(),
            complemento: self.complemento.clone(),
            bairro: self.bairro.clone(),
            cidade: self.cidade.clone(),
            estado: self.estado.clone(),
            cep: self.cep.clone(),
        }
    }
}

// ============ Discovery models ============

/// Municipality kept by the discovery pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct City {
    pub ibge_id: i64,
    pub name: String,
    pub state: String,
    /// Estimated population used for the pre-geocoding filter.
    pub population: i64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub distance_km: f64,
    /// True for the reference city itself.
    pub is_base: bool,
}

/// Administrative subdivision of a kept city. Distance is inherited from the
/// parent city rather than independently geocoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neighborhood {
    pub name: String,
    pub city: String,
    pub state: String,
    pub distance_km: f64,
}

// ============ API request/response models ============

/// Outcome of processing a single geolocation task. `status` is PENDING when
/// the task was skipped because a remote collaborator was unavailable.
#[derive(Debug, Clone, Serialize)]
pub struct GeolocationOutcome {
    pub success: bool,
    pub status: TaskStatus,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub distance_km: Option<f64>,
    pub address_corrected: bool,
    pub error: Option<String>,
}

/// Summary of a geolocation batch run. `processed` counts tasks that reached
/// a terminal state this run; skipped tasks stay PENDING for the next run.
#[derive(Debug, Clone, Serialize)]
pub struct GeolocationBatchSummary {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
}

/// Summary of a CEP-enrichment batch run.
#[derive(Debug, Clone, Serialize)]
pub struct CepBatchSummary {
    pub total: usize,
    pub processed: usize,
    pub enriched: usize,
}

/// Result of a discovery run over the configured reference CEP.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResult {
    pub base_city: String,
    pub base_state: String,
    /// True when no municipality cleared the population floor and the
    /// top-N fallback was applied.
    pub population_fallback: bool,
    pub cities: Vec<City>,
    pub neighborhoods: Vec<Neighborhood>,
}

/// Request body for the extraction endpoint.
#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub html: Option<String>,
}
