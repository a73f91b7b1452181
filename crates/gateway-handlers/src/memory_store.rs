use crate::{HandlerContext, HandlerError, UnknownActorPolicy};
use gateway_core::sha256_hex;
use gateway_openmemory::{OpenMemoryError, StoreRequest};
use gateway_policy::{engine, evidence};
use gateway_schemas::{EvidenceRef, GatewayEvent, PolicyAction};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryStoreRequest {
    pub project_key: String,
    pub correlation_id: String,
    #[serde(default)]
    pub actor_user_id: Option<String>,
    pub target_space: Option<String>,
    pub payload_md: String,
    #[serde(default)]
    pub evidence: Vec<EvidenceRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStoreResponse {
    pub ok: bool,
    pub action: String,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox_id: Option<i64>,
    pub space_written: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn resolve_requested_space(req: &MemoryStoreRequest, default_team_space: &str) -> String {
    req.target_space
        .clone()
        .unwrap_or_else(|| default_team_space.to_string())
}

fn gateway_event(
    operation: &str,
    decision: &str,
    correlation_id: &str,
    payload_sha: &str,
    policy: serde_json::Value,
    validation: serde_json::Value,
    outbox_id: Option<i64>,
    memory_id: Option<String>,
    intended_action: Option<&str>,
) -> GatewayEvent {
    GatewayEvent {
        schema_version: 1,
        operation: operation.to_string(),
        decision: decision.to_string(),
        source: "memory_store".to_string(),
        correlation_id: correlation_id.to_string(),
        payload_sha: payload_sha.to_string(),
        outbox_id,
        memory_id,
        intended_action: intended_action.map(str::to_string),
        policy,
        validation,
    }
}

fn evidence_envelope(event: GatewayEvent, outbox_id: Option<i64>, memory_id: Option<String>) -> serde_json::Value {
    json!({
        "source": event.source,
        "correlation_id": event.correlation_id,
        "payload_sha": event.payload_sha,
        "outbox_id": outbox_id,
        "memory_id": memory_id,
        "intended_action": event.intended_action,
        "gateway_event": event,
        "extra": {},
    })
}

/// Implements the gateway's write path: actor validation, dedup, evidence
/// validation, policy decision, two-phase audit, and outbox fallback when
/// the upstream service is unavailable.
pub async fn handle(
    ctx: &HandlerContext,
    req: MemoryStoreRequest,
) -> Result<MemoryStoreResponse, HandlerError> {
    let requested_space = resolve_requested_space(&req, &ctx.default_team_space);
    let payload_sha = sha256_hex(req.payload_md.as_bytes());

    // Step 1: actor validation. `actor_user_id` is optional — when absent,
    // no actor-existence check runs and the audit row's actor column stays NULL.
    let (actor_user_id, actor_note) = match &req.actor_user_id {
        None => (None, None),
        Some(requested_actor) => {
            let exists = gateway_db::check_user_exists(&ctx.pool, requested_actor).await?;
            if exists {
                (Some(requested_actor.clone()), None)
            } else {
                match ctx.unknown_actor_policy {
                    UnknownActorPolicy::Reject => {
                        let reason = "actor_unknown:reject".to_string();
                        let event = gateway_event(
                            "memory_store",
                            "reject",
                            &req.correlation_id,
                            &payload_sha,
                            json!({}),
                            json!({}),
                            None,
                            None,
                            None,
                        );
                        gateway_db::write_audit(
                            &ctx.pool,
                            &req.project_key,
                            &req.correlation_id,
                            None,
                            &requested_space,
                            "reject",
                            Some(&reason),
                            &payload_sha,
                            "rejected",
                            evidence_envelope(event, None, None),
                        )
                        .await?;
                        return Ok(MemoryStoreResponse {
                            ok: false,
                            action: "reject".to_string(),
                            correlation_id: req.correlation_id,
                            memory_id: None,
                            outbox_id: None,
                            space_written: requested_space,
                            message: Some(reason),
                        });
                    }
                    UnknownActorPolicy::AutoCreate => {
                        gateway_db::ensure_user(&ctx.pool, requested_actor, None).await?;
                        (
                            Some(requested_actor.clone()),
                            Some("actor_autocreated".to_string()),
                        )
                    }
                    UnknownActorPolicy::Degrade => {
                        (None, Some("actor_unknown:degrade".to_string()))
                    }
                }
            }
        }
    };

    // Step 2: settings + evidence validation.
    let settings_row = gateway_db::get_or_create_settings(&ctx.pool, &req.project_key).await?;
    let mut settings: engine::Settings = serde_json::from_value(settings_row.policy_json.clone())
        .unwrap_or(engine::Settings {
            project_key: req.project_key.clone(),
            team_write_enabled: settings_row.team_write_enabled,
            known_shared_spaces: vec![],
        });
    settings.team_write_enabled = settings_row.team_write_enabled;

    if let Err(bad) = evidence::validate(&req.evidence, ctx.evidence_mode) {
        let reason = format!("evidence_invalid: index={} reason={}", bad.index, bad.reason);
        let event = gateway_event(
            "memory_store",
            "reject",
            &req.correlation_id,
            &payload_sha,
            json!({}),
            json!({"index": bad.index, "reason": bad.reason}),
            None,
            None,
            None,
        );
        gateway_db::write_audit(
            &ctx.pool,
            &req.project_key,
            &req.correlation_id,
            actor_user_id.as_deref(),
            &requested_space,
            "reject",
            Some(&reason),
            &payload_sha,
            "rejected",
            evidence_envelope(event, None, None),
        )
        .await?;
        return Ok(MemoryStoreResponse {
            ok: false,
            action: "reject".to_string(),
            correlation_id: req.correlation_id,
            memory_id: None,
            outbox_id: None,
            space_written: requested_space,
            message: Some(reason),
        });
    }

    // Step 3: policy decision.
    let actor_for_policy = actor_user_id.as_deref().unwrap_or("unknown");
    let decision = engine::decide(
        actor_for_policy,
        &requested_space,
        &settings,
        &ctx.private_space_prefix,
    );

    if decision.action == PolicyAction::Reject {
        let reason = decision.reason.clone().unwrap_or_default();
        let event = gateway_event(
            "memory_store",
            "reject",
            &req.correlation_id,
            &payload_sha,
            json!({"reason": reason}),
            json!({}),
            None,
            None,
            None,
        );
        gateway_db::write_audit(
            &ctx.pool,
            &req.project_key,
            &req.correlation_id,
            actor_user_id.as_deref(),
            &requested_space,
            "reject",
            Some(&reason),
            &payload_sha,
            "rejected",
            evidence_envelope(event, None, None),
        )
        .await?;
        return Ok(MemoryStoreResponse {
            ok: false,
            action: "reject".to_string(),
            correlation_id: req.correlation_id,
            memory_id: None,
            outbox_id: None,
            space_written: requested_space,
            message: Some(reason),
        });
    }

    let final_space = decision.final_space.clone();
    let intended_action = match decision.action {
        PolicyAction::Allow => "allow",
        PolicyAction::Redirect => "redirect",
        PolicyAction::Reject => unreachable!("handled above"),
    };

    // Step 4: dedup against the resolved space the content will actually land in.
    if let Some(hit) = gateway_db::check_dedup(&ctx.pool, &final_space, &payload_sha).await? {
        if let Some(memory_id) = hit.memory_id.clone() {
            let event = gateway_event(
                "memory_store",
                "dedup_hit",
                &req.correlation_id,
                &payload_sha,
                json!({"decision": decision.action}),
                json!({}),
                None,
                Some(memory_id.clone()),
                Some(intended_action),
            );
            let mut envelope = evidence_envelope(event, None, Some(memory_id.clone()));
            envelope["original_outbox_id"] = json!(hit.outbox_id);
            gateway_db::write_audit(
                &ctx.pool,
                &req.project_key,
                &req.correlation_id,
                actor_user_id.as_deref(),
                &final_space,
                intended_action,
                Some("dedup_hit"),
                &payload_sha,
                "success",
                envelope,
            )
            .await?;
            return Ok(MemoryStoreResponse {
                ok: true,
                action: intended_action.to_string(),
                correlation_id: req.correlation_id,
                memory_id: Some(memory_id),
                outbox_id: None,
                space_written: final_space,
                message: actor_note,
            });
        }
    }

    // Step 5: phase 1 — durable pending record before calling upstream.
    let pending = gateway_db::write_pending_audit(
        &ctx.pool,
        &req.project_key,
        &req.correlation_id,
        actor_user_id.as_deref(),
        &final_space,
        intended_action,
        &payload_sha,
    )
    .await?;

    // Step 6: call upstream, then phase 2 — finalize with the outcome.
    match ctx
        .openmemory
        .store(StoreRequest {
            target_space: &final_space,
            payload_md: &req.payload_md,
            user_id: actor_user_id.as_deref(),
            tags: None,
            metadata: None,
        })
        .await
    {
        Ok(result) => {
            info!(correlation_id = %req.correlation_id, memory_id = %result.memory_id, "memory_store succeeded");
            let event = gateway_event(
                "memory_store",
                "store_success",
                &req.correlation_id,
                &payload_sha,
                json!({"decision": decision.action}),
                json!({}),
                None,
                Some(result.memory_id.clone()),
                Some(intended_action),
            );
            gateway_db::finalize_audit(
                &ctx.pool,
                pending.audit_id,
                "success",
                actor_note.as_deref(),
                evidence_envelope(event, None, Some(result.memory_id.clone())),
            )
            .await?;
            Ok(MemoryStoreResponse {
                ok: true,
                action: intended_action.to_string(),
                correlation_id: req.correlation_id,
                memory_id: Some(result.memory_id),
                outbox_id: None,
                space_written: final_space,
                message: actor_note,
            })
        }
        Err(err) => {
            warn!(correlation_id = %req.correlation_id, error = %err, "memory_store upstream failed, deferring to outbox");
            let outbox_id = gateway_db::enqueue_outbox(
                &ctx.pool,
                &final_space,
                &req.payload_md,
                &payload_sha,
                Some(&upstream_error_message(&err)),
                120,
            )
            .await?;
            let reason = format!(
                "deferred:outbox:{outbox_id} after upstream failure: {}",
                upstream_error_message(&err)
            );
            let event = gateway_event(
                "memory_store",
                "openmemory_write_failed",
                &req.correlation_id,
                &payload_sha,
                json!({"decision": decision.action}),
                json!({}),
                Some(outbox_id),
                None,
                Some(intended_action),
            );
            gateway_db::finalize_audit(
                &ctx.pool,
                pending.audit_id,
                "redirected",
                Some(&reason),
                evidence_envelope(event, Some(outbox_id), None),
            )
            .await?;
            Ok(MemoryStoreResponse {
                ok: true,
                action: "deferred".to_string(),
                correlation_id: req.correlation_id,
                memory_id: None,
                outbox_id: Some(outbox_id),
                space_written: final_space,
                message: Some(reason),
            })
        }
    }
}

fn upstream_error_message(err: &OpenMemoryError) -> String {
    gateway_core::redact(&err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_default_team_space_when_unset() {
        let req = MemoryStoreRequest {
            project_key: "p".into(),
            correlation_id: "corr-x".into(),
            actor_user_id: Some("alice".into()),
            target_space: None,
            payload_md: "x".into(),
            evidence: vec![],
        };
        assert_eq!(resolve_requested_space(&req, "team:default"), "team:default");
    }

    #[test]
    fn keeps_explicit_target_space() {
        let req = MemoryStoreRequest {
            project_key: "p".into(),
            correlation_id: "corr-x".into(),
            actor_user_id: Some("alice".into()),
            target_space: Some("team:alpha".into()),
            payload_md: "x".into(),
            evidence: vec![],
        };
        assert_eq!(resolve_requested_space(&req, "team:default"), "team:alpha");
    }
}
