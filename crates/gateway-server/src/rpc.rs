use crate::state::AppState;
use gateway_handlers::{evidence_upload, governance_update, memory_query, memory_store};
use gateway_schemas::{
    ErrorCategory, ErrorData, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ToolSpecDto,
};
use serde_json::{json, Value};

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

pub const TOOL_NAMES: &[&str] = &[
    "memory_store",
    "memory_query",
    "governance_update",
    "evidence_upload",
    "reliability_report",
];

/// Metadata surfaced to `tools/list`. Kept in one place, in the same order
/// as `TOOL_NAMES`, so the list and the dispatcher in `call_tool` cannot
/// silently drift apart.
pub fn tool_specs() -> Vec<ToolSpecDto> {
    vec![
        ToolSpecDto {
            name: "memory_store".to_string(),
            description: "Write a note into OpenMemory under governance control".to_string(),
            input_schema: json!({
                "type": "object",
                "required": ["project_key", "correlation_id", "payload_md"],
                "properties": {
                    "project_key": {"type": "string"},
                    "correlation_id": {"type": "string"},
                    "actor_user_id": {"type": "string"},
                    "target_space": {"type": "string"},
                    "payload_md": {"type": "string"},
                    "evidence": {"type": "array"}
                }
            }),
        },
        ToolSpecDto {
            name: "memory_query".to_string(),
            description: "Search OpenMemory, falling back to locally cached knowledge on failure"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "required": ["correlation_id", "query", "target_space"],
                "properties": {
                    "correlation_id": {"type": "string"},
                    "query": {"type": "string"},
                    "target_space": {"type": "string"},
                    "limit": {"type": "integer"}
                }
            }),
        },
        ToolSpecDto {
            name: "governance_update".to_string(),
            description: "Update write-governance settings for a project".to_string(),
            input_schema: json!({
                "type": "object",
                "required": ["project_key", "updated_by", "admin_key"],
                "properties": {
                    "project_key": {"type": "string"},
                    "updated_by": {"type": "string"},
                    "admin_key": {"type": "string"},
                    "team_write_enabled": {"type": "boolean"},
                    "known_shared_spaces": {"type": "array"}
                }
            }),
        },
        ToolSpecDto {
            name: "evidence_upload".to_string(),
            description: "Store a base64-encoded evidence attachment".to_string(),
            input_schema: json!({
                "type": "object",
                "required": ["correlation_id", "content_base64", "content_type"],
                "properties": {
                    "correlation_id": {"type": "string"},
                    "content_base64": {"type": "string"},
                    "content_type": {"type": "string"}
                }
            }),
        },
        ToolSpecDto {
            name: "reliability_report".to_string(),
            description: "Report audit and outbox reliability counters".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
    ]
}

fn id_or_null(req: &JsonRpcRequest) -> Value {
    req.id.clone().unwrap_or(Value::Null)
}

fn protocol_error(id: Value, code: i64, message: impl Into<String>, correlation_id: &str) -> JsonRpcResponse {
    JsonRpcResponse::err_with_data(
        id,
        code,
        message,
        ErrorData::new(ErrorCategory::Protocol, "protocol_error", false, correlation_id),
    )
}

/// Dispatches one JSON-RPC 2.0 request. `correlation_id` was generated once
/// by the caller (the HTTP entry point) and is threaded into every tool
/// call — handlers never mint their own.
pub async fn dispatch(
    state: &AppState,
    correlation_id: &str,
    req: JsonRpcRequest,
) -> JsonRpcResponse {
    let id = id_or_null(&req);

    if req.jsonrpc.as_deref() != Some("2.0") {
        return protocol_error(id, INVALID_REQUEST, "jsonrpc must be \"2.0\"", correlation_id);
    }

    match req.method.as_str() {
        "initialize" => JsonRpcResponse::ok(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": {"name": "memory-gateway", "version": env!("CARGO_PKG_VERSION")},
                "capabilities": {"tools": {}}
            }),
        ),
        "ping" => JsonRpcResponse::ok(id, json!({})),
        "tools/list" => JsonRpcResponse::ok(id, json!({"tools": tool_specs()})),
        "tools/call" => call_tool(state, correlation_id, id, req.params).await,
        other => JsonRpcResponse::err_with_data(
            id,
            METHOD_NOT_FOUND,
            format!("unknown method \"{other}\""),
            ErrorData::new(ErrorCategory::Protocol, "method_not_found", false, correlation_id),
        ),
    }
}

async fn call_tool(state: &AppState, correlation_id: &str, id: Value, params: Value) -> JsonRpcResponse {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return JsonRpcResponse::err_with_data(
            id,
            INVALID_PARAMS,
            "params.name is required",
            ErrorData::new(ErrorCategory::Validation, "missing_tool_name", false, correlation_id),
        );
    };
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    match invoke(state, correlation_id, name, arguments).await {
        Ok(result) => {
            let text = serde_json::to_string(&result).unwrap_or_else(|_| "{}".to_string());
            JsonRpcResponse::ok(
                id,
                json!({"content": [{"type": "text", "text": text}]}),
            )
        }
        Err(ToolCallError::UnknownTool) => JsonRpcResponse::err_with_data(
            id,
            METHOD_NOT_FOUND,
            format!("unknown tool \"{name}\""),
            ErrorData::new(ErrorCategory::Protocol, "unknown_tool", false, correlation_id),
        ),
        Err(ToolCallError::BadArguments(msg)) => JsonRpcResponse::err_with_data(
            id,
            INVALID_PARAMS,
            msg,
            ErrorData::new(ErrorCategory::Validation, "bad_arguments", false, correlation_id),
        ),
        Err(ToolCallError::Internal(msg)) => JsonRpcResponse::err_with_data(
            id,
            INTERNAL_ERROR,
            gateway_core::redact(&msg),
            ErrorData::new(ErrorCategory::Dependency, "internal_error", true, correlation_id),
        ),
    }
}

pub enum ToolCallError {
    UnknownTool,
    BadArguments(String),
    Internal(String),
}

fn inject_correlation_id(mut arguments: Value, correlation_id: &str) -> Value {
    if let Value::Object(ref mut map) = arguments {
        map.insert(
            "correlation_id".to_string(),
            Value::String(correlation_id.to_string()),
        );
    }
    arguments
}

/// Invokes one named tool with its arguments. This is the single place
/// tool names are matched against handler implementations; `tool_specs()`
/// must list the same names.
pub async fn invoke(
    state: &AppState,
    correlation_id: &str,
    name: &str,
    arguments: Value,
) -> Result<Value, ToolCallError> {
    let arguments = inject_correlation_id(arguments, correlation_id);

    match name {
        "memory_store" => {
            let req: memory_store::MemoryStoreRequest = serde_json::from_value(arguments)
                .map_err(|e| ToolCallError::BadArguments(e.to_string()))?;
            let resp = memory_store::handle(&state.handlers, req)
                .await
                .map_err(|e| ToolCallError::Internal(e.to_string()))?;
            serde_json::to_value(resp).map_err(|e| ToolCallError::Internal(e.to_string()))
        }
        "memory_query" => {
            let req: memory_query::MemoryQueryRequest = serde_json::from_value(arguments)
                .map_err(|e| ToolCallError::BadArguments(e.to_string()))?;
            let resp = memory_query::handle(&state.handlers, req)
                .await
                .map_err(|e| ToolCallError::Internal(e.to_string()))?;
            serde_json::to_value(resp).map_err(|e| ToolCallError::Internal(e.to_string()))
        }
        "governance_update" => {
            let req: governance_update::GovernanceUpdateRequest =
                serde_json::from_value(arguments)
                    .map_err(|e| ToolCallError::BadArguments(e.to_string()))?;
            let resp = governance_update::handle(&state.handlers, req)
                .await
                .map_err(|e| ToolCallError::Internal(e.to_string()))?;
            serde_json::to_value(resp).map_err(|e| ToolCallError::Internal(e.to_string()))
        }
        "evidence_upload" => {
            let req: evidence_upload::EvidenceUploadRequest = serde_json::from_value(arguments)
                .map_err(|e| ToolCallError::BadArguments(e.to_string()))?;
            let resp = evidence_upload::handle(&state.handlers, req)
                .await
                .map_err(|e| ToolCallError::Internal(e.to_string()))?;
            serde_json::to_value(resp).map_err(|e| ToolCallError::Internal(e.to_string()))
        }
        "reliability_report" => {
            let report = gateway_handlers::reliability_report::handle(&state.handlers, correlation_id)
                .await
                .map_err(|e| ToolCallError::Internal(e.to_string()))?;
            serde_json::to_value(report).map_err(|e| ToolCallError::Internal(e.to_string()))
        }
        _ => Err(ToolCallError::UnknownTool),
    }
}

pub fn parse_error(id: Value, correlation_id: &str) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(JsonRpcError {
            code: PARSE_ERROR,
            message: "invalid JSON".to_string(),
            data: Some(
                ErrorData::new(ErrorCategory::Protocol, "parse_error", false, correlation_id)
                    .into_value(),
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_specs_match_dispatchable_names() {
        let specs = tool_specs();
        let spec_names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(spec_names, TOOL_NAMES);
    }

    #[test]
    fn inject_correlation_id_overwrites_caller_supplied_value() {
        let args = json!({"correlation_id": "client-supplied", "other": 1});
        let out = inject_correlation_id(args, "corr-server-generated");
        assert_eq!(out["correlation_id"], json!("corr-server-generated"));
        assert_eq!(out["other"], json!(1));
    }
}
