use gateway_config::GatewayConfig;
use gateway_core::{CorrelationSource, UuidCorrelationSource};
use gateway_handlers::{HandlerContext, UnknownActorPolicy};
use gateway_openmemory::{MemoryBackend, OpenMemoryClient, OpenMemoryError};
use gateway_schemas::EvidenceMode;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;

/// Everything a request handler needs, assembled once at startup and
/// handed to axum via `with_state`. No module-level singletons.
pub struct AppState {
    pub handlers: HandlerContext,
    pub bearer_tokens: HashSet<String>,
    pub correlation_source: Arc<dyn CorrelationSource>,
}

impl AppState {
    pub async fn build(config: &GatewayConfig) -> anyhow::Result<Self> {
        let pool = gateway_db::connect(&config.database_url).await?;
        gateway_db::migrate(&pool).await?;

        let openmemory: Arc<dyn MemoryBackend> = Arc::new(OpenMemoryClient::new(
            config.openmemory_base_url.clone(),
            config.openmemory_api_key.clone(),
            config.openmemory_timeout_seconds,
            config.openmemory_max_client_retries,
        )?);

        let evidence_mode = match config.evidence_mode.as_str() {
            "strict" => EvidenceMode::Strict,
            _ => EvidenceMode::Compat,
        };

        Ok(Self {
            handlers: HandlerContext {
                pool,
                openmemory,
                evidence_mode,
                unknown_actor_policy: UnknownActorPolicy::parse(&config.unknown_actor_policy),
                artifact_store_root: config.artifact_store_root.clone(),
                default_team_space: config.default_team_space.clone(),
                private_space_prefix: config.private_space_prefix.clone(),
                governance_admin_key: config.governance_admin_key.clone(),
            },
            bearer_tokens: config.bearer_tokens.iter().cloned().collect(),
            correlation_source: Arc::new(UuidCorrelationSource),
        })
    }

    pub fn requires_auth(&self) -> bool {
        !self.bearer_tokens.is_empty()
    }

    pub fn is_authorized(&self, bearer: Option<&str>) -> bool {
        if !self.requires_auth() {
            return true;
        }
        match bearer {
            Some(tok) => self.bearer_tokens.contains(tok),
            None => false,
        }
    }
}

/// Surfaces the OpenMemory client's typed error at the boundary where a
/// request needs to decide whether to retry or fail closed.
pub fn is_openmemory_connection_error(err: &OpenMemoryError) -> bool {
    matches!(err, OpenMemoryError::Connection(_))
}
