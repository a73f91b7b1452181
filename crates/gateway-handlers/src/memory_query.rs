use crate::HandlerContext;
use gateway_openmemory::SearchRequest;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryQueryRequest {
    pub correlation_id: String,
    pub query: String,
    pub target_space: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryQueryResult {
    pub memory_id: String,
    pub content_md: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryQueryResponse {
    pub ok: bool,
    pub results: Vec<MemoryQueryResult>,
    pub total: usize,
    pub spaces_searched: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub degraded: bool,
    pub correlation_id: String,
}

/// Primary path hits OpenMemory; on any upstream failure, falls back to the
/// Logbook's locally stored knowledge candidates and marks the response
/// `degraded`. Only when both paths fail does the response carry `ok: false`.
pub async fn handle(
    ctx: &HandlerContext,
    req: MemoryQueryRequest,
) -> Result<MemoryQueryResponse, crate::HandlerError> {
    match ctx
        .openmemory
        .search(SearchRequest {
            query: &req.query,
            target_space: &req.target_space,
            limit: req.limit,
            user_id: None,
            filters: None,
        })
        .await
    {
        Ok(result) => {
            let results: Vec<MemoryQueryResult> = result
                .hits
                .into_iter()
                .map(|h| MemoryQueryResult {
                    memory_id: h.memory_id,
                    content_md: h.content_md,
                    score: h.score,
                })
                .collect();
            Ok(MemoryQueryResponse {
                ok: true,
                total: results.len(),
                results,
                spaces_searched: vec![req.target_space.clone()],
                message: None,
                degraded: false,
                correlation_id: req.correlation_id,
            })
        }
        Err(primary_err) => {
            warn!(correlation_id = %req.correlation_id, error = %primary_err, "memory_query falling back to knowledge candidates");
            match gateway_db::query_knowledge_candidates(
                &ctx.pool,
                &req.query,
                req.limit as i64,
            )
            .await
            {
                Ok(candidates) => {
                    let results: Vec<MemoryQueryResult> = candidates
                        .into_iter()
                        .map(|c| MemoryQueryResult {
                            memory_id: format!("kc_{}", c.candidate_id),
                            content_md: c.content_md,
                            score: c.confidence,
                        })
                        .collect();
                    Ok(MemoryQueryResponse {
                        ok: true,
                        total: results.len(),
                        results,
                        spaces_searched: vec![req.target_space.clone()],
                        message: Some(gateway_core::redact(&primary_err.to_string())),
                        degraded: true,
                        correlation_id: req.correlation_id,
                    })
                }
                Err(fallback_err) => Ok(MemoryQueryResponse {
                    ok: false,
                    total: 0,
                    results: vec![],
                    spaces_searched: vec![req.target_space.clone()],
                    message: Some(format!(
                        "{}; fallback also failed: {}",
                        gateway_core::redact(&primary_err.to_string()),
                        fallback_err
                    )),
                    degraded: true,
                    correlation_id: req.correlation_id,
                }),
            }
        }
    }
}
