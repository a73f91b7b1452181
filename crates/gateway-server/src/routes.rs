//! Axum router and HTTP handlers for memory-gateway.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are `pub(crate)` so in-process router tests in
//! `tests/` can exercise them without a bound socket.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use gateway_core::CorrelationSource;
use gateway_schemas::{JsonRpcRequest, LegacyToolCall};
use serde::Serialize;
use serde_json::Value;

use crate::{rpc, state::AppState};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/reliability/report", get(reliability_report))
        .route("/mcp", post(mcp))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    service: &'static str,
}

pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: "memory-gateway",
        }),
    )
}

pub(crate) async fn reliability_report(
    State(state): State<Arc<AppState>>,
) -> Response {
    let correlation_id = state.correlation_source.generate().as_str().to_string();
    let mut resp = match gateway_handlers::reliability_report::handle(&state.handlers, &correlation_id).await
    {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "error": gateway_core::redact(&err.to_string()),
                "correlation_id": correlation_id,
            })),
        )
            .into_response(),
    };
    insert_correlation_header(&mut resp, &correlation_id);
    resp
}

fn insert_correlation_header(resp: &mut Response, correlation_id: &str) {
    if let Ok(value) = correlation_id.parse() {
        resp.headers_mut()
            .insert("X-Correlation-ID", value);
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Single entry point for both JSON-RPC 2.0 requests and the legacy
/// `{tool, arguments}` envelope. The correlation id is minted exactly once
/// here, via the state's `CorrelationSource`, and threaded through every
/// downstream handler call — nothing below this layer generates its own.
pub(crate) async fn mcp(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Json<Value>,
) -> Response {
    let correlation_id = state.correlation_source.generate().as_str().to_string();

    if !state.is_authorized(bearer_token(&headers)) {
        let mut resp = (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "missing or invalid bearer token",
                "correlation_id": correlation_id,
            })),
        )
            .into_response();
        insert_correlation_header(&mut resp, &correlation_id);
        return resp;
    }

    let raw = body.0;

    if let Ok(legacy) = serde_json::from_value::<LegacyToolCall>(raw.clone()) {
        if raw.get("jsonrpc").is_none() {
            let mut resp = match rpc::invoke(&state, &correlation_id, &legacy.tool, legacy.arguments).await
            {
                Ok(result) => (StatusCode::OK, Json(result)).into_response(),
                Err(rpc::ToolCallError::UnknownTool) => (
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({
                        "error": format!("unknown tool \"{}\"", legacy.tool),
                        "correlation_id": correlation_id,
                    })),
                )
                    .into_response(),
                Err(rpc::ToolCallError::BadArguments(msg)) => (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"error": msg, "correlation_id": correlation_id})),
                )
                    .into_response(),
                Err(rpc::ToolCallError::Internal(msg)) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({
                        "error": gateway_core::redact(&msg),
                        "correlation_id": correlation_id,
                    })),
                )
                    .into_response(),
            };
            insert_correlation_header(&mut resp, &correlation_id);
            return resp;
        }
    }

    let mut resp = match serde_json::from_value::<JsonRpcRequest>(raw) {
        Ok(req) => {
            let resp = rpc::dispatch(&state, &correlation_id, req).await;
            (StatusCode::OK, Json(resp)).into_response()
        }
        Err(_) => (
            StatusCode::OK,
            Json(rpc::parse_error(Value::Null, &correlation_id)),
        )
            .into_response(),
    };
    insert_correlation_header(&mut resp, &correlation_id);
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_strips_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer abc123".parse().unwrap(),
        );
        assert_eq!(bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn bearer_token_absent_without_header() {
        let headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
    }
}
