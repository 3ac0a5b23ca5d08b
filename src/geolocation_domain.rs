use crate::cep_enrichment::AddressEnrichmentService;
use crate::db_storage::TaskStorage;
use crate::errors::{bounded_reason, AppError};
use crate::geolocation::GeolocationService;
use crate::models::{
    AddressModel, GeolocationBatchSummary, GeolocationOutcome, GeolocationTask, TaskStatus,
};
use crate::notifier::{push_progress, ProgressNotifier};

const PROGRESS_EVERY: usize = 10;

/// How much of the offending address is kept in terminal failure messages.
const REASON_ADDRESS_LEN: usize = 120;

/// Orchestrates the geolocation task queue: geocode, correct-and-retry at
/// most once, or fail terminally.
pub struct GeolocationDomainService {
    geolocation: GeolocationService,
    enrichment: AddressEnrichmentService,
    storage: TaskStorage,
    notifier: Option<ProgressNotifier>,
}

/// What happened to one task, before it is committed to storage.
enum Step {
    /// Geocoded successfully.
    Located {
        lat: f64,
        lon: f64,
        corrected_address: Option<AddressModel>,
    },
    /// Every strategy exhausted; terminal failure with a bounded reason.
    Exhausted { reason: String },
    /// A remote collaborator was unavailable; task stays PENDING.
    Skipped { reason: String },
}

impl GeolocationDomainService {
    pub fn new(
        geolocation: GeolocationService,
        enrichment: AddressEnrichmentService,
        storage: TaskStorage,
        notifier: Option<ProgressNotifier>,
    ) -> Self {
        Self {
            geolocation,
            enrichment,
            storage,
            notifier,
        }
    }

    pub async fn pending_tasks(&self) -> Result<Vec<GeolocationTask>, AppError> {
        self.storage.pending_geolocation_tasks().await
    }

    /// Runs the state machine for one task.
    ///
    /// PENDING → DONE on any geocoding hit (directly or after one
    /// correction), PENDING → ERROR once every strategy is exhausted.
    /// Terminal tasks are rejected, and an unavailable remote leaves the
    /// task PENDING for the next run.
    pub async fn process_single(
        &self,
        task: &GeolocationTask,
    ) -> Result<GeolocationOutcome, AppError> {
        if task.status.is_terminal() {
            return Err(AppError::Validation(format!(
                "Task {} is already {:?} and cannot be reprocessed",
                task.id, task.status
            )));
        }

        let Some(record) = self.storage.get_address(task.address_id).await? else {
            return self
                .commit_error(task, "Falha na geocodificação: endereço não encontrado")
                .await;
        };
        let address = record.model();

        match self.run_strategies(task, &address).await? {
            Step::Located {
                lat,
                lon,
                corrected_address,
            } => {
                let corrected = corrected_address.is_some();
                if let Some(ref fixed) = corrected_address {
                    // Self-healing: persist the corrected address so future
                    // consumers see the fixed version
                    self.storage.update_address(task.address_id, fixed).await?;
                }
                self.commit_done(task, lat, lon, corrected).await
            }
            Step::Exhausted { reason } => self.commit_error(task, &reason).await,
            Step::Skipped { reason } => {
                tracing::warn!("Skipping geolocation task {}: {}", task.id, reason);
                Ok(GeolocationOutcome {
                    success: false,
                    status: TaskStatus::Pending,
                    lat: None,
                    lon: None,
                    distance_km: None,
                    address_corrected: false,
                    error: Some(reason),
                })
            }
        }
    }

    /// Geocode, then at most one correction strategy picked by the shape of
    /// the address.
    async fn run_strategies(
        &self,
        task: &GeolocationTask,
        address: &AddressModel,
    ) -> Result<Step, AppError> {
        if !address.is_valid() {
            return Ok(Step::Exhausted {
                reason: exhausted_reason(address),
            });
        }

        match self.geolocation.geocode_address(address).await {
            Ok(Some((lat, lon))) => {
                return Ok(Step::Located {
                    lat,
                    lon,
                    corrected_address: None,
                })
            }
            Ok(None) => {}
            Err(e) if e.is_remote_unavailable() => {
                return Ok(Step::Skipped {
                    reason: e.to_string(),
                })
            }
            Err(e) => return Err(e),
        }

        // First geocode missed. Correction, at most once.
        if address.has_cep() {
            let corrected = match self.enrichment.try_enrich(address).await {
                Ok(corrected) => corrected,
                Err(e) if e.is_remote_unavailable() => {
                    return Ok(Step::Skipped {
                        reason: e.to_string(),
                    })
                }
                Err(_) => {
                    // Directory has nothing for this CEP: correction failed
                    return Ok(Step::Exhausted {
                        reason: exhausted_reason(address),
                    });
                }
            };
            if &corrected == address {
                tracing::info!(
                    "Task {}: CEP correction changed nothing, giving up",
                    task.id
                );
                return Ok(Step::Exhausted {
                    reason: exhausted_reason(address),
                });
            }

            return match self.geolocation.geocode_address(&corrected).await {
                Ok(Some((lat, lon))) => Ok(Step::Located {
                    lat,
                    lon,
                    corrected_address: Some(corrected),
                }),
                Ok(None) => Ok(Step::Exhausted {
                    reason: exhausted_reason(&corrected),
                }),
                Err(e) if e.is_remote_unavailable() => Ok(Step::Skipped {
                    reason: e.to_string(),
                }),
                Err(e) => Err(e),
            };
        }

        if !address.cidade.trim().is_empty() && !address.estado.trim().is_empty() {
            // Street-level data is unresolvable; degrade to the city centroid
            let degraded = address.city_only();
            return match self.geolocation.geocode_address(&degraded).await {
                Ok(Some((lat, lon))) => Ok(Step::Located {
                    lat,
                    lon,
                    corrected_address: None,
                }),
                Ok(None) => Ok(Step::Exhausted {
                    reason: exhausted_reason(address),
                }),
                Err(e) if e.is_remote_unavailable() => Ok(Step::Skipped {
                    reason: e.to_string(),
                }),
                Err(e) => Err(e),
            };
        }

        Ok(Step::Exhausted {
            reason: exhausted_reason(address),
        })
    }

    async fn commit_done(
        &self,
        task: &GeolocationTask,
        lat: f64,
        lon: f64,
        address_corrected: bool,
    ) -> Result<GeolocationOutcome, AppError> {
        task.status.transition(TaskStatus::Done)?;

        let distance_km = self.geolocation.distance_from_reference(lat, lon);
        self.storage
            .mark_geolocation_done(task.id, lat, lon, distance_km, address_corrected)
            .await?;

        // Denormalized reporting row, refreshed synchronously on every DONE
        self.storage
            .refresh_company_distance(task.company_id, distance_km)
            .await?;

        tracing::info!(
            "Task {} geolocated at ({}, {}), {} km from reference{}",
            task.id,
            lat,
            lon,
            distance_km,
            if address_corrected {
                " (address corrected)"
            } else {
                ""
            }
        );

        Ok(GeolocationOutcome {
            success: true,
            status: TaskStatus::Done,
            lat: Some(lat),
            lon: Some(lon),
            distance_km: Some(distance_km),
            address_corrected,
            error: None,
        })
    }

    async fn commit_error(
        &self,
        task: &GeolocationTask,
        reason: &str,
    ) -> Result<GeolocationOutcome, AppError> {
        task.status.transition(TaskStatus::Error)?;

        self.storage.mark_geolocation_error(task.id, reason).await?;

        Ok(GeolocationOutcome {
            success: false,
            status: TaskStatus::Error,
            lat: None,
            lon: None,
            distance_km: None,
            address_corrected: false,
            error: Some(reason.to_string()),
        })
    }

    /// Processes every pending task from a snapshot taken at batch start.
    /// Individual failures never abort the run.
    pub async fn process_pending(&self) -> Result<GeolocationBatchSummary, AppError> {
        let tasks = self.pending_tasks().await?;
        let total = tasks.len();
        let mut processed = 0usize;
        let mut succeeded = 0usize;

        tracing::info!("Geolocation batch started: {} pending tasks", total);

        for (idx, task) in tasks.iter().enumerate() {
            match self.process_single(task).await {
                Ok(outcome) => {
                    if outcome.status.is_terminal() {
                        processed += 1;
                    }
                    if outcome.success {
                        succeeded += 1;
                    }
                }
                Err(e) => {
                    tracing::error!("Geolocation task {} failed unexpectedly: {}", task.id, e);
                }
            }

            if (idx + 1) % PROGRESS_EVERY == 0 {
                push_progress(
                    self.notifier.as_ref(),
                    "geolocation",
                    idx + 1,
                    total,
                    succeeded,
                )
                .await;
            }
        }

        push_progress(self.notifier.as_ref(), "geolocation", total, total, succeeded).await;

        tracing::info!(
            "Geolocation batch finished: {}/{} processed, {} succeeded",
            processed,
            total,
            succeeded
        );

        Ok(GeolocationBatchSummary {
            total,
            processed,
            succeeded,
        })
    }
}

fn exhausted_reason(address: &AddressModel) -> String {
    format!(
        "Falha na geocodificação: {}",
        bounded_reason(&address.single_line(), REASON_ADDRESS_LEN)
    )
}
