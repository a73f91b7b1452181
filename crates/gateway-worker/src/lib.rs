//! Outbox worker: claims deferred `memory_store` writes and replays them
//! against OpenMemory, with lease-based exclusivity, exponential backoff,
//! and a dead-letter queue for writes that exhaust their retry budget.

use std::sync::Arc;

use gateway_openmemory::{MemoryBackend, OpenMemoryError, StoreRequest};
use gateway_schemas::OutboxRow;
use sqlx::PgPool;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub batch_size: i64,
    pub max_retries: i32,
    pub base_backoff_seconds: i64,
}

impl WorkerConfig {
    pub fn new_with_random_id(batch_size: i64, max_retries: i32, base_backoff_seconds: i64) -> Self {
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::new_v4().simple()),
            batch_size,
            max_retries,
            base_backoff_seconds,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub dead: usize,
}

impl RunSummary {
    /// True when at least one row exhausted its retry budget this run.
    /// Callers (the CLI) use this to pick a non-zero exit code.
    pub fn has_dead_letters(&self) -> bool {
        self.dead > 0
    }
}

/// Claims one batch of due rows and drives each to `sent`, `pending`
/// (retry), or `dead`. Returns once the batch is exhausted; does not loop.
pub async fn run_once(
    pool: &PgPool,
    backend: &Arc<dyn MemoryBackend>,
    config: &WorkerConfig,
) -> Result<RunSummary, gateway_db::LogbookError> {
    let claimed = gateway_db::claim_outbox(pool, config.batch_size, &config.worker_id).await?;
    let mut summary = RunSummary {
        claimed: claimed.len(),
        ..RunSummary::default()
    };

    for row in claimed {
        match process_row(pool, backend, config, &row).await? {
            Outcome::Sent => summary.sent += 1,
            Outcome::Retried => summary.retried += 1,
            Outcome::Dead => summary.dead += 1,
        }
    }

    Ok(summary)
}

enum Outcome {
    Sent,
    Retried,
    Dead,
}

async fn process_row(
    pool: &PgPool,
    backend: &Arc<dyn MemoryBackend>,
    config: &WorkerConfig,
    row: &OutboxRow,
) -> Result<Outcome, gateway_db::LogbookError> {
    let store_result = backend
        .store(StoreRequest {
            target_space: &row.target_space,
            payload_md: &row.payload_md,
            user_id: None,
            tags: None,
            metadata: None,
        })
        .await;

    match store_result {
        Ok(result) => {
            let acked = gateway_db::ack_sent(pool, row.outbox_id, &config.worker_id, &result.memory_id)
                .await?;
            if acked {
                info!(outbox_id = row.outbox_id, memory_id = %result.memory_id, "outbox row sent");
                Ok(Outcome::Sent)
            } else {
                warn!(outbox_id = row.outbox_id, "ack_sent found row no longer claimed by this worker");
                Ok(Outcome::Retried)
            }
        }
        Err(err) => {
            let message = gateway_core::redact(&err.to_string());
            let permanent = matches!(&err, OpenMemoryError::Api { status, .. } if (400..500).contains(status));
            if permanent {
                gateway_db::mark_dead(pool, row.outbox_id, &config.worker_id, &message).await?;
                warn!(outbox_id = row.outbox_id, retry_count = row.retry_count, "outbox row moved to dead letter (permanent 4xx failure)");
                Ok(Outcome::Dead)
            } else if row.retry_count + 1 >= config.max_retries {
                gateway_db::mark_dead(pool, row.outbox_id, &config.worker_id, &message).await?;
                warn!(outbox_id = row.outbox_id, retry_count = row.retry_count, "outbox row moved to dead letter");
                Ok(Outcome::Dead)
            } else {
                gateway_db::fail_retry(
                    pool,
                    row.outbox_id,
                    &config.worker_id,
                    &message,
                    config.base_backoff_seconds,
                )
                .await?;
                info!(outbox_id = row.outbox_id, retry_count = row.retry_count + 1, "outbox row scheduled for retry");
                Ok(Outcome::Retried)
            }
        }
    }
}

/// Runs claim/process batches on a fixed interval until `shutdown` resolves.
/// Intended for the long-lived `worker` subcommand; tests and one-shot CLI
/// invocations should call [`run_once`] directly.
pub async fn run_forever(
    pool: &PgPool,
    backend: Arc<dyn MemoryBackend>,
    config: WorkerConfig,
    poll_interval: std::time::Duration,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) -> Result<RunSummary, gateway_db::LogbookError> {
    let mut total = RunSummary::default();
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("worker shutdown signal received");
                return Ok(total);
            }
            result = run_once(pool, &backend, &config) => {
                let summary = result?;
                total.claimed += summary.claimed;
                total.sent += summary.sent;
                total.retried += summary.retried;
                total.dead += summary.dead;
                if summary.claimed == 0 {
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_summary_has_dead_letters_only_when_nonzero() {
        let clean = RunSummary { claimed: 3, sent: 3, retried: 0, dead: 0 };
        assert!(!clean.has_dead_letters());

        let with_dead = RunSummary { claimed: 3, sent: 1, retried: 1, dead: 1 };
        assert!(with_dead.has_dead_letters());
    }

    #[test]
    fn worker_id_is_namespaced() {
        let config = WorkerConfig::new_with_random_id(10, 5, 60);
        assert!(config.worker_id.starts_with("worker-"));
    }
}
