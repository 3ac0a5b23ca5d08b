use crate::errors::AppError;
use serde_json::json;
use std::time::Duration;

/// Client for the external real-time channel long batches report progress to.
///
/// Strictly best-effort: a dead or slow channel must never abort processing,
/// so every failure is logged and swallowed here.
#[derive(Clone)]
pub struct ProgressNotifier {
    client: reqwest::Client,
    url: String,
}

impl ProgressNotifier {
    pub fn new(url: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                AppError::InternalError(format!("Failed to create notifier client: {}", e))
            })?;

        Ok(Self { client, url })
    }

    /// Pushes a progress snapshot for a long-running batch.
    pub async fn notify_progress(
        &self,
        stage: &str,
        processed: usize,
        total: usize,
        succeeded: usize,
    ) {
        let body = json!({
            "stage": stage,
            "processed": processed,
            "total": total,
            "succeeded": succeeded,
        });

        match self.client.post(&self.url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!("Progress pushed: {} {}/{}", stage, processed, total);
            }
            Ok(response) => {
                tracing::warn!(
                    "Progress channel returned status {} for stage {}",
                    response.status(),
                    stage
                );
            }
            Err(e) => {
                tracing::warn!("Progress push failed for stage {}: {}", stage, e);
            }
        }
    }
}

/// Convenience for call sites holding an optional notifier.
pub async fn push_progress(
    notifier: Option<&ProgressNotifier>,
    stage: &str,
    processed: usize,
    total: usize,
    succeeded: usize,
) {
    if let Some(notifier) = notifier {
        notifier
            .notify_progress(stage, processed, total, succeeded)
            .await;
    }
}
