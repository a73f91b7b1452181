mod client;
#[cfg(feature = "testkit")]
pub mod fake;

pub use client::OpenMemoryClient;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize)]
pub struct StoreRequest<'a> {
    pub target_space: &'a str,
    pub payload_md: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<&'a serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreResult {
    pub memory_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub target_space: &'a str,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<&'a serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub memory_id: String,
    pub content_md: String,
    pub score: f32,
}

/// Typed failure taxonomy for the upstream vector-memory service. Callers
/// match on the variant rather than inspecting strings.
#[derive(Debug, Error)]
pub enum OpenMemoryError {
    #[error("openmemory connection failed: {0}")]
    Connection(String),
    #[error("openmemory api error (status {status}): {body}")]
    Api { status: u16, body: String },
    #[error("openmemory response decode failed: {0}")]
    Decode(String),
    #[error("openmemory client misconfigured: {0}")]
    Config(String),
}

#[async_trait::async_trait]
pub trait MemoryBackend: Send + Sync {
    async fn store(&self, req: StoreRequest<'_>) -> Result<StoreResult, OpenMemoryError>;
    async fn search(&self, req: SearchRequest<'_>) -> Result<SearchResult, OpenMemoryError>;
}
