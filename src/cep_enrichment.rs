use crate::config::Config;
use crate::db_storage::TaskStorage;
use crate::errors::AppError;
use crate::models::{address_was_enriched, AddressModel, CepBatchSummary};
use crate::notifier::{push_progress, ProgressNotifier};
use crate::services::ViaCepService;
use std::time::Duration;

/// How often batch progress is pushed to the real-time channel.
const PROGRESS_EVERY: usize = 10;

/// Fills blank address fields from the postal-code directory.
pub struct AddressEnrichmentService {
    viacep: ViaCepService,
    request_delay: Duration,
}

impl AddressEnrichmentService {
    pub fn new(config: &Config) -> Self {
        Self {
            viacep: ViaCepService::new(config),
            request_delay: Duration::from_millis(config.request_delay_ms),
        }
    }

    /// Directory lookup with explicit failure kinds, so batch callers can
    /// tell "no CEP" (fail fast) from "directory has no match" (terminal)
    /// from "directory is down" (skip and retry next run).
    ///
    /// Merging is additive: only empty `logradouro`, `bairro`, `cidade`,
    /// `estado` are filled; `numero` and `complemento` are never overwritten
    /// since the directory has no street-number granularity.
    pub async fn try_enrich(&self, address: &AddressModel) -> Result<AddressModel, AppError> {
        if !address.has_cep() {
            return Err(AppError::Validation("CEP ausente".to_string()));
        }

        let lookup = self.viacep.lookup(&address.cep).await;
        self.pace().await;

        match lookup? {
            Some(directory_address) => Ok(address.filled_with(&directory_address.model())),
            None => Err(AppError::NotFound(format!(
                "CEP {} não encontrado no diretório",
                address.cep_digits()
            ))),
        }
    }

    /// Absorbing variant used by the geolocation correction path: any
    /// failure yields the original address unchanged.
    pub async fn enrich_address_with_cep(&self, address: &AddressModel) -> AddressModel {
        match self.try_enrich(address).await {
            Ok(enriched) => enriched,
            Err(AppError::Validation(_)) => address.clone(),
            Err(e) => {
                tracing::warn!(
                    "CEP enrichment absorbed failure for {}: {}",
                    address.cep_digits(),
                    e
                );
                address.clone()
            }
        }
    }

    async fn pace(&self) {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
    }
}

/// Sequential consumer for the CEP-enrichment task queue.
pub struct CepTaskProcessor {
    storage: TaskStorage,
    enrichment: AddressEnrichmentService,
    notifier: Option<ProgressNotifier>,
}

impl CepTaskProcessor {
    pub fn new(
        storage: TaskStorage,
        enrichment: AddressEnrichmentService,
        notifier: Option<ProgressNotifier>,
    ) -> Self {
        Self {
            storage,
            enrichment,
            notifier,
        }
    }

    /// Processes every pending CEP task from a snapshot taken at batch start.
    ///
    /// A task goes DONE only when the enrichment measurably improved the
    /// stored address. Items that hit an unavailable directory stay PENDING
    /// for the next run; everything else reaches a terminal state.
    pub async fn process_pending(&self) -> Result<CepBatchSummary, AppError> {
        let tasks = self.storage.pending_cep_tasks().await?;
        let total = tasks.len();
        let mut processed = 0usize;
        let mut enriched = 0usize;

        tracing::info!("CEP enrichment batch started: {} pending tasks", total);

        for (idx, task) in tasks.iter().enumerate() {
            let Some(record) = self.storage.get_address(task.address_id).await? else {
                self.storage
                    .mark_cep_error(task.id, "Endereço não encontrado no cadastro")
                    .await?;
                processed += 1;
                continue;
            };

            let original = record.model();

            match self.enrichment.try_enrich(&original).await {
                Ok(candidate) => {
                    if address_was_enriched(&original, &candidate) {
                        self.storage.update_address(task.address_id, &candidate).await?;
                        self.storage.mark_cep_done(task.id).await?;
                        enriched += 1;
                    } else {
                        self.storage
                            .mark_cep_error(task.id, "Enriquecimento não melhorou o endereço")
                            .await?;
                    }
                    processed += 1;
                }
                Err(e) if e.is_remote_unavailable() => {
                    // Directory down: leave PENDING, keep the batch going
                    tracing::warn!("Skipping CEP task {}: {}", task.id, e);
                }
                Err(e) => {
                    self.storage.mark_cep_error(task.id, &e.to_string()).await?;
                    processed += 1;
                }
            }

            if (idx + 1) % PROGRESS_EVERY == 0 {
                push_progress(
                    self.notifier.as_ref(),
                    "cep_enrichment",
                    idx + 1,
                    total,
                    enriched,
                )
                .await;
            }
        }

        push_progress(
            self.notifier.as_ref(),
            "cep_enrichment",
            total,
            total,
            enriched,
        )
        .await;

        tracing::info!(
            "CEP enrichment batch finished: {}/{} processed, {} enriched",
            processed,
            total,
            enriched
        );

        Ok(CepBatchSummary {
            total,
            processed,
            enriched,
        })
    }
}
