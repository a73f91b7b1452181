use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceMode {
    Compat,
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub uri: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// `gateway_event` sub-object embedded in every evidence envelope. Carries
/// the fields that describe how the gateway itself handled the write, as
/// opposed to `EvidenceEnvelope`'s top-level fields which describe the
/// write's identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub schema_version: u32,
    pub operation: String,
    pub decision: String,
    pub source: String,
    pub correlation_id: String,
    pub payload_sha: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intended_action: Option<String>,
    pub policy: Value,
    pub validation: Value,
}

/// `evidence_refs_json` written on every write_audit row. Top-level fields
/// are queryable via Postgres JSONB operators; `extra` carries anything
/// that doesn't have a dedicated column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceEnvelope {
    pub source: String,
    pub correlation_id: String,
    pub payload_sha: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intended_action: Option<String>,
    pub gateway_event: GatewayEvent,
    #[serde(default = "default_extra")]
    pub extra: Value,
}

fn default_extra() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Allow,
    Redirect,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub action: PolicyAction,
    pub final_space: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Pending,
    Success,
    Redirected,
    Rejected,
    Error,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Pending => "pending",
            AuditStatus::Success => "success",
            AuditStatus::Redirected => "redirected",
            AuditStatus::Rejected => "rejected",
            AuditStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteAuditRow {
    pub audit_id: i64,
    pub correlation_id: String,
    pub actor_user_id: Option<String>,
    pub target_space: String,
    pub action: String,
    pub reason: Option<String>,
    pub payload_sha: String,
    pub evidence_refs_json: Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRow {
    pub outbox_id: i64,
    pub target_space: String,
    pub payload_md: String,
    pub payload_sha: String,
    pub status: String,
    pub retry_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lease_seconds: i32,
    pub memory_id: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsRow {
    pub project_key: String,
    pub team_write_enabled: bool,
    pub policy_json: Value,
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeCandidate {
    pub candidate_id: i64,
    pub title: String,
    pub content_md: String,
    pub kind: String,
    pub confidence: f32,
    pub evidence_refs_json: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxByStatus {
    pub pending: i64,
    pub sent: i64,
    pub dead: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxStats {
    pub total: i64,
    pub by_status: OutboxByStatus,
    pub avg_retry_count: f64,
    pub oldest_pending_age_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditByAction {
    pub allow: i64,
    pub redirect: i64,
    pub reject: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditByReason {
    pub policy: i64,
    pub openmemory_write_failed: i64,
    pub outbox_flush_success: i64,
    pub dedup_hit: i64,
    pub other: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStats {
    pub total: i64,
    pub by_action: AuditByAction,
    pub recent_24h: i64,
    pub by_reason: AuditByReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityReport {
    pub ok: bool,
    pub outbox_stats: OutboxStats,
    pub audit_stats: AuditStats,
    pub generated_at: DateTime<Utc>,
    pub correlation_id: String,
}

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Option<String>,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Error category as surfaced in `error.data.category`. Drives whether a
/// caller should retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Protocol,
    Validation,
    Business,
    Dependency,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorData {
    pub category: ErrorCategory,
    pub reason: String,
    pub retryable: bool,
    pub correlation_id: String,
    pub details: Value,
}

impl ErrorData {
    pub fn new(
        category: ErrorCategory,
        reason: impl Into<String>,
        retryable: bool,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            category,
            reason: reason.into(),
            retryable,
            correlation_id: correlation_id.into(),
            details: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).expect("error data must serialize")
    }
}

impl JsonRpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
        }
    }

    /// Build an error response carrying the spec-mandated
    /// `{category, reason, retryable, correlation_id, details}` error data.
    pub fn err_with_data(
        id: Value,
        code: i64,
        message: impl Into<String>,
        data: ErrorData,
    ) -> Self {
        Self::err(id, code, message, Some(data.into_value()))
    }
}

/// Legacy `{tool, arguments}` envelope accepted alongside JSON-RPC on the
/// same route.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyToolCall {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpecDto {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}
