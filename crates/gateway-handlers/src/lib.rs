pub mod evidence_upload;
pub mod governance_update;
pub mod memory_query;
pub mod memory_store;
pub mod reliability_report;

use gateway_openmemory::MemoryBackend;
use gateway_schemas::EvidenceMode;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownActorPolicy {
    Reject,
    Degrade,
    AutoCreate,
}

impl UnknownActorPolicy {
    pub fn parse(s: &str) -> Self {
        match s {
            "reject" => UnknownActorPolicy::Reject,
            "auto_create" => UnknownActorPolicy::AutoCreate,
            _ => UnknownActorPolicy::Degrade,
        }
    }
}

/// Shared dependencies every handler needs. Built once in the server's
/// `AppState` and passed by reference — no module-level singletons.
pub struct HandlerContext {
    pub pool: PgPool,
    pub openmemory: Arc<dyn MemoryBackend>,
    pub evidence_mode: EvidenceMode,
    pub unknown_actor_policy: UnknownActorPolicy,
    pub artifact_store_root: String,
    pub default_team_space: String,
    pub private_space_prefix: String,
    pub governance_admin_key: Option<String>,
}

/// Infrastructure failures that prevent a handler from reaching any
/// decision at all (DB down, disk full). Policy rejects and validation
/// failures are NOT errors — they are ordinary `ok: true` results with a
/// `rejected` status, because the audit trail must record them.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("database error: {0}")]
    Db(#[from] gateway_db::LogbookError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
