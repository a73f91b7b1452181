use crate::HandlerContext;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct GovernanceUpdateRequest {
    pub project_key: String,
    pub correlation_id: String,
    pub updated_by: String,
    pub admin_key: Option<String>,
    #[serde(default)]
    pub team_write_enabled: Option<bool>,
    #[serde(default)]
    pub known_shared_spaces: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GovernanceUpdateResponse {
    pub ok: bool,
    pub action: String,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_write_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Settings updates require a project-wide admin key — there is no
/// per-project governance identity beyond this shared secret.
pub async fn handle(
    ctx: &HandlerContext,
    req: GovernanceUpdateRequest,
) -> Result<GovernanceUpdateResponse, crate::HandlerError> {
    if ctx.governance_admin_key.is_some() && req.admin_key != ctx.governance_admin_key {
        return Ok(GovernanceUpdateResponse {
            ok: false,
            action: "reject".to_string(),
            correlation_id: req.correlation_id,
            project_key: None,
            team_write_enabled: None,
            message: Some("admin_key_mismatch".to_string()),
        });
    }

    let existing = gateway_db::get_or_create_settings(&ctx.pool, &req.project_key).await?;
    let existing_settings: gateway_policy::engine::Settings =
        serde_json::from_value(existing.policy_json.clone()).unwrap_or(
            gateway_policy::engine::Settings {
                project_key: req.project_key.clone(),
                team_write_enabled: existing.team_write_enabled,
                known_shared_spaces: vec![],
            },
        );

    let team_write_enabled = req.team_write_enabled.unwrap_or(existing.team_write_enabled);
    let known_shared_spaces = req
        .known_shared_spaces
        .unwrap_or(existing_settings.known_shared_spaces);
    let policy_json: Value = json!({ "known_shared_spaces": known_shared_spaces });

    let row = gateway_db::upsert_settings(
        &ctx.pool,
        &req.project_key,
        team_write_enabled,
        policy_json,
        &req.updated_by,
    )
    .await?;

    gateway_db::write_audit(
        &ctx.pool,
        &req.project_key,
        &req.correlation_id,
        Some(&req.updated_by),
        &req.project_key,
        "allow",
        None,
        "",
        "success",
        json!({
            "source": "governance_update",
            "correlation_id": req.correlation_id,
            "payload_sha": "",
            "gateway_event": {
                "schema_version": 1,
                "operation": "governance_update",
                "decision": "allow",
                "source": "governance_update",
                "correlation_id": req.correlation_id,
                "payload_sha": "",
                "policy": {"team_write_enabled": row.team_write_enabled},
                "validation": {},
            },
            "extra": {},
        }),
    )
    .await?;

    Ok(GovernanceUpdateResponse {
        ok: true,
        action: "allow".to_string(),
        correlation_id: req.correlation_id,
        project_key: Some(row.project_key),
        team_write_enabled: Some(row.team_write_enabled),
        message: None,
    })
}
