use chrono::Utc;
use gateway_schemas::{OutboxRow, ReliabilityReport, SettingsRow, WriteAuditRow};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;

pub const ENV_DB_URL: &str = "GATEWAY_DATABASE_URL";

#[derive(Debug, Error)]
pub enum LogbookError {
    #[error("database connection failed: {0}")]
    Connection(String),
    #[error("database query failed: {0}")]
    Query(String),
    #[error("validation failed: {0}")]
    Validation(String),
}

impl From<sqlx::Error> for LogbookError {
    fn from(e: sqlx::Error) -> Self {
        LogbookError::Query(e.to_string())
    }
}

pub async fn connect_from_env() -> Result<PgPool, LogbookError> {
    let url = std::env::var(ENV_DB_URL)
        .map_err(|_| LogbookError::Connection(format!("missing env var {ENV_DB_URL}")))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool, LogbookError> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .map_err(|e| LogbookError::Connection(e.to_string()))
}

/// Run embedded migrations. Idempotent.
pub async fn migrate(pool: &PgPool) -> Result<(), LogbookError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| LogbookError::Query(e.to_string()))?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_write_audit_table: bool,
}

/// Connectivity + schema presence check for the `db status` CLI command.
pub async fn status(pool: &PgPool) -> Result<DbStatus, LogbookError> {
    let (one,): (i32,) = sqlx::query_as("select 1").fetch_one(pool).await?;

    let (exists,): (bool,) = sqlx::query_as(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'write_audit'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(DbStatus {
        ok: one == 1,
        has_write_audit_table: exists,
    })
}

fn to_unique_violation(e: &sqlx::Error, constraint: &str) -> bool {
    if let sqlx::Error::Database(db_err) = e {
        return db_err.constraint() == Some(constraint);
    }
    false
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

fn settings_from_row(row: sqlx::postgres::PgRow) -> Result<SettingsRow, LogbookError> {
    Ok(SettingsRow {
        project_key: row.try_get("project_key")?,
        team_write_enabled: row.try_get("team_write_enabled")?,
        policy_json: row.try_get("policy_json")?,
        updated_by: row.try_get("updated_by")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Returns the settings row for a project, creating a default (team writes
/// enabled, empty policy) row if none exists yet.
pub async fn get_or_create_settings(
    pool: &PgPool,
    project_key: &str,
) -> Result<SettingsRow, LogbookError> {
    let row = sqlx::query(
        r#"
        insert into gateway_settings (project_key, team_write_enabled, policy_json)
        values ($1, true, '{}'::jsonb)
        on conflict (project_key) do update set project_key = excluded.project_key
        returning project_key, team_write_enabled, policy_json, updated_by, updated_at
        "#,
    )
    .bind(project_key)
    .fetch_one(pool)
    .await?;

    settings_from_row(row)
}

pub async fn upsert_settings(
    pool: &PgPool,
    project_key: &str,
    team_write_enabled: bool,
    policy_json: Value,
    updated_by: &str,
) -> Result<SettingsRow, LogbookError> {
    let row = sqlx::query(
        r#"
        insert into gateway_settings (project_key, team_write_enabled, policy_json, updated_by, updated_at)
        values ($1, $2, $3, $4, now())
        on conflict (project_key) do update
           set team_write_enabled = excluded.team_write_enabled,
               policy_json        = excluded.policy_json,
               updated_by         = excluded.updated_by,
               updated_at         = now()
        returning project_key, team_write_enabled, policy_json, updated_by, updated_at
        "#,
    )
    .bind(project_key)
    .bind(team_write_enabled)
    .bind(policy_json)
    .bind(updated_by)
    .fetch_one(pool)
    .await?;

    settings_from_row(row)
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

pub async fn check_user_exists(pool: &PgPool, user_id: &str) -> Result<bool, LogbookError> {
    let row: (bool,) = sqlx::query_as(
        "select exists(select 1 from gateway_users where user_id = $1)",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

pub async fn ensure_user(
    pool: &PgPool,
    user_id: &str,
    display_name: Option<&str>,
) -> Result<(), LogbookError> {
    sqlx::query(
        r#"
        insert into gateway_users (user_id, display_name)
        values ($1, $2)
        on conflict (user_id) do nothing
        "#,
    )
    .bind(user_id)
    .bind(display_name)
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Write audit (two-phase)
// ---------------------------------------------------------------------------

fn audit_from_row(row: sqlx::postgres::PgRow) -> Result<WriteAuditRow, LogbookError> {
    Ok(WriteAuditRow {
        audit_id: row.try_get("audit_id")?,
        correlation_id: row.try_get("correlation_id")?,
        actor_user_id: row.try_get("actor_user_id")?,
        target_space: row.try_get("target_space")?,
        action: row.try_get("action")?,
        reason: row.try_get("reason")?,
        payload_sha: row.try_get("payload_sha")?,
        evidence_refs_json: row.try_get("evidence_refs_json")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Phase 1: insert a `pending` audit row before calling the upstream
/// service. Unique on `(project_key, correlation_id)` — a retry with the
/// same correlation id never creates a second row.
pub async fn write_pending_audit(
    pool: &PgPool,
    project_key: &str,
    correlation_id: &str,
    actor_user_id: Option<&str>,
    target_space: &str,
    action: &str,
    payload_sha: &str,
) -> Result<WriteAuditRow, LogbookError> {
    let row = sqlx::query(
        r#"
        insert into write_audit
            (project_key, correlation_id, actor_user_id, target_space, action, payload_sha, status)
        values ($1, $2, $3, $4, $5, $6, 'pending')
        returning audit_id, correlation_id, actor_user_id, target_space, action, reason,
                  payload_sha, evidence_refs_json, status, created_at, updated_at
        "#,
    )
    .bind(project_key)
    .bind(correlation_id)
    .bind(actor_user_id)
    .bind(target_space)
    .bind(action)
    .bind(payload_sha)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if to_unique_violation(&e, "write_audit_project_correlation_uq") {
            LogbookError::Validation(format!(
                "audit row already exists for correlation_id {correlation_id}"
            ))
        } else {
            LogbookError::Query(e.to_string())
        }
    })?;

    audit_from_row(row)
}

/// Phase 2: finalize a pending audit row with its terminal status, reason,
/// and evidence envelope.
pub async fn finalize_audit(
    pool: &PgPool,
    audit_id: i64,
    status: &str,
    reason: Option<&str>,
    evidence_refs_json: Value,
) -> Result<WriteAuditRow, LogbookError> {
    let row = sqlx::query(
        r#"
        update write_audit
           set status              = $2,
               reason              = $3,
               evidence_refs_json  = $4,
               updated_at          = now()
         where audit_id = $1
        returning audit_id, correlation_id, actor_user_id, target_space, action, reason,
                  payload_sha, evidence_refs_json, status, created_at, updated_at
        "#,
    )
    .bind(audit_id)
    .bind(status)
    .bind(reason)
    .bind(evidence_refs_json)
    .fetch_one(pool)
    .await?;

    audit_from_row(row)
}

/// Single-phase audit write for decisions that never reach the upstream
/// service (policy rejects, evidence validation failures, unknown actors).
pub async fn write_audit(
    pool: &PgPool,
    project_key: &str,
    correlation_id: &str,
    actor_user_id: Option<&str>,
    target_space: &str,
    action: &str,
    reason: Option<&str>,
    payload_sha: &str,
    status: &str,
    evidence_refs_json: Value,
) -> Result<WriteAuditRow, LogbookError> {
    let row = sqlx::query(
        r#"
        insert into write_audit
            (project_key, correlation_id, actor_user_id, target_space, action, reason,
             payload_sha, status, evidence_refs_json)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        returning audit_id, correlation_id, actor_user_id, target_space, action, reason,
                  payload_sha, evidence_refs_json, status, created_at, updated_at
        "#,
    )
    .bind(project_key)
    .bind(correlation_id)
    .bind(actor_user_id)
    .bind(target_space)
    .bind(action)
    .bind(reason)
    .bind(payload_sha)
    .bind(status)
    .bind(evidence_refs_json)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if to_unique_violation(&e, "write_audit_project_correlation_uq") {
            LogbookError::Validation(format!(
                "audit row already exists for correlation_id {correlation_id}"
            ))
        } else {
            LogbookError::Query(e.to_string())
        }
    })?;

    audit_from_row(row)
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

fn outbox_from_row(row: sqlx::postgres::PgRow) -> Result<OutboxRow, LogbookError> {
    Ok(OutboxRow {
        outbox_id: row.try_get("outbox_id")?,
        target_space: row.try_get("target_space")?,
        payload_md: row.try_get("payload_md")?,
        payload_sha: row.try_get("payload_sha")?,
        status: row.try_get("status")?,
        retry_count: row.try_get("retry_count")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        locked_by: row.try_get("locked_by")?,
        locked_at: row.try_get("locked_at")?,
        lease_seconds: row.try_get("lease_seconds")?,
        memory_id: row.try_get("memory_id")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Looks up a previously-sent row with the same `(target_space, payload_sha)`.
/// A hit means the write was already durably delivered; callers should
/// reuse its `memory_id` instead of calling the upstream service again.
pub async fn check_dedup(
    pool: &PgPool,
    target_space: &str,
    payload_sha: &str,
) -> Result<Option<OutboxRow>, LogbookError> {
    let row = sqlx::query(
        r#"
        select outbox_id, target_space, payload_md, payload_sha, status, retry_count,
               next_attempt_at, locked_by, locked_at, lease_seconds, memory_id, last_error,
               created_at, updated_at
        from outbox_memory
        where target_space = $1 and payload_sha = $2 and status = 'sent'
        order by outbox_id desc
        limit 1
        "#,
    )
    .bind(target_space)
    .bind(payload_sha)
    .fetch_optional(pool)
    .await?;

    row.map(outbox_from_row).transpose()
}

pub async fn enqueue_outbox(
    pool: &PgPool,
    target_space: &str,
    payload_md: &str,
    payload_sha: &str,
    last_error: Option<&str>,
    lease_seconds: i32,
) -> Result<i64, LogbookError> {
    let row: (i64,) = sqlx::query_as(
        r#"
        insert into outbox_memory (target_space, payload_md, payload_sha, status, retry_count, last_error, lease_seconds)
        values ($1, $2, $3, 'pending', 0, $4, $5)
        returning outbox_id
        "#,
    )
    .bind(target_space)
    .bind(payload_md)
    .bind(payload_sha)
    .bind(last_error)
    .bind(lease_seconds)
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

/// Atomically claims up to `batch_size` due rows for exclusive processing by
/// `worker_id`, using `FOR UPDATE SKIP LOCKED` so no two workers claim the
/// same row. `status` stays `pending` throughout the claim — exclusivity is
/// expressed purely through `locked_by`/`locked_at` plus lease expiry, so a
/// worker that dies mid-claim leaves a row `claim_outbox` can see again
/// once its lease has expired.
pub async fn claim_outbox(
    pool: &PgPool,
    batch_size: i64,
    worker_id: &str,
) -> Result<Vec<OutboxRow>, LogbookError> {
    let rows = sqlx::query(
        r#"
        with to_claim as (
            select outbox_id
            from outbox_memory
            where status = 'pending'
              and next_attempt_at <= now()
              and (
                  locked_at is null
                  or locked_at < now() - (lease_seconds * interval '1 second')
              )
            order by outbox_id asc
            limit $1
            for update skip locked
        )
        update outbox_memory
           set locked_by  = $2,
               locked_at  = now(),
               updated_at = now()
         where outbox_id in (select outbox_id from to_claim)
        returning outbox_id, target_space, payload_md, payload_sha, status, retry_count,
                  next_attempt_at, locked_by, locked_at, lease_seconds, memory_id, last_error,
                  created_at, updated_at
        "#,
    )
    .bind(batch_size)
    .bind(worker_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(outbox_from_row).collect()
}

/// Extends the lease on a row this worker already holds, for long-running
/// upstream calls that might otherwise outlive `lease_seconds`.
pub async fn renew_lease(
    pool: &PgPool,
    outbox_id: i64,
    worker_id: &str,
) -> Result<bool, LogbookError> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update outbox_memory
           set locked_at = now(), updated_at = now()
         where outbox_id = $1 and status = 'pending' and locked_by = $2
        returning outbox_id
        "#,
    )
    .bind(outbox_id)
    .bind(worker_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}

/// Marks a claimed row `sent`, recording the `memory_id` assigned by the
/// upstream service. Only succeeds for the worker currently holding the claim.
pub async fn ack_sent(
    pool: &PgPool,
    outbox_id: i64,
    worker_id: &str,
    memory_id: &str,
) -> Result<bool, LogbookError> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update outbox_memory
           set status     = 'sent',
               memory_id  = $3,
               locked_by  = null,
               locked_at  = null,
               updated_at = now()
         where outbox_id = $1 and status = 'pending' and locked_by = $2
        returning outbox_id
        "#,
    )
    .bind(outbox_id)
    .bind(worker_id)
    .bind(memory_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}

/// Records a failed attempt, releases the claim, and schedules the next
/// attempt using exponential backoff:
/// `next_attempt_at = now() + base_backoff_seconds * 2^retry_count`.
pub async fn fail_retry(
    pool: &PgPool,
    outbox_id: i64,
    worker_id: &str,
    error: &str,
    base_backoff_seconds: i64,
) -> Result<bool, LogbookError> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update outbox_memory
           set retry_count     = retry_count + 1,
               last_error      = $3,
               locked_by       = null,
               locked_at       = null,
               next_attempt_at = now() + (($4::bigint * power(2, retry_count)) * interval '1 second'),
               updated_at      = now()
         where outbox_id = $1 and status = 'pending' and locked_by = $2
        returning outbox_id
        "#,
    )
    .bind(outbox_id)
    .bind(worker_id)
    .bind(error)
    .bind(base_backoff_seconds)
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}

/// Moves a row to `dead` once it has exhausted its retry budget, or
/// immediately for a permanent (4xx) upstream failure.
pub async fn mark_dead(
    pool: &PgPool,
    outbox_id: i64,
    worker_id: &str,
    error: &str,
) -> Result<bool, LogbookError> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update outbox_memory
           set status     = 'dead',
               last_error = $3,
               locked_by  = null,
               locked_at  = null,
               updated_at = now()
         where outbox_id = $1 and status = 'pending' and locked_by = $2
        returning outbox_id
        "#,
    )
    .bind(outbox_id)
    .bind(worker_id)
    .bind(error)
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}

/// Returns `dead` rows (optionally filtered by space) to `pending` for a
/// fresh retry cycle. Operator-invoked, not called from the worker loop.
pub async fn reset_dead_outbox_jobs(
    pool: &PgPool,
    target_space: Option<&str>,
) -> Result<u64, LogbookError> {
    let result = sqlx::query(
        r#"
        update outbox_memory
           set status          = 'pending',
               retry_count     = 0,
               last_error      = null,
               next_attempt_at = now(),
               updated_at      = now()
         where status = 'dead'
           and ($1::text is null or target_space = $1)
        "#,
    )
    .bind(target_space)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn get_outbox_by_id(
    pool: &PgPool,
    outbox_id: i64,
) -> Result<Option<OutboxRow>, LogbookError> {
    let row = sqlx::query(
        r#"
        select outbox_id, target_space, payload_md, payload_sha, status, retry_count,
               next_attempt_at, locked_by, locked_at, lease_seconds, memory_id, last_error,
               created_at, updated_at
        from outbox_memory
        where outbox_id = $1
        "#,
    )
    .bind(outbox_id)
    .fetch_optional(pool)
    .await?;

    row.map(outbox_from_row).transpose()
}

// ---------------------------------------------------------------------------
// Knowledge candidates (degraded-mode fallback for memory_query)
// ---------------------------------------------------------------------------

pub async fn query_knowledge_candidates(
    pool: &PgPool,
    query: &str,
    limit: i64,
) -> Result<Vec<gateway_schemas::KnowledgeCandidate>, LogbookError> {
    let like_pattern = format!("%{}%", query.replace('%', "\\%"));
    let rows = sqlx::query(
        r#"
        select candidate_id, title, content_md, kind, confidence, evidence_refs_json, created_at
        from knowledge_candidates
        where title ilike $1 or content_md ilike $1
        order by confidence desc, candidate_id desc
        limit $2
        "#,
    )
    .bind(like_pattern)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(gateway_schemas::KnowledgeCandidate {
                candidate_id: row.try_get("candidate_id")?,
                title: row.try_get("title")?,
                content_md: row.try_get("content_md")?,
                kind: row.try_get("kind")?,
                confidence: row.try_get("confidence")?,
                evidence_refs_json: row.try_get("evidence_refs_json")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(LogbookError::from)
}

// ---------------------------------------------------------------------------
// Reliability report
// ---------------------------------------------------------------------------

pub async fn get_reliability_report(
    pool: &PgPool,
    correlation_id: &str,
) -> Result<ReliabilityReport, LogbookError> {
    let outbox: (i64, i64, i64, i64, Option<f64>, Option<i64>) = sqlx::query_as(
        r#"
        select
            count(*)::bigint as total,
            count(*) filter (where status = 'pending')::bigint as pending,
            count(*) filter (where status = 'sent')::bigint as sent,
            count(*) filter (where status = 'dead')::bigint as dead,
            avg(retry_count)::float8 as avg_retry_count,
            extract(epoch from (now() - min(created_at) filter (where status = 'pending')))::bigint
                as oldest_pending_age_seconds
        from outbox_memory
        "#,
    )
    .fetch_one(pool)
    .await?;

    let audits: (i64, i64, i64, i64, i64) = sqlx::query_as(
        r#"
        select
            count(*)::bigint as total,
            count(*) filter (where action = 'allow')::bigint as allow,
            count(*) filter (where action = 'redirect')::bigint as redirect,
            count(*) filter (where action = 'reject')::bigint as reject,
            count(*) filter (where created_at >= now() - interval '24 hours')::bigint as recent_24h
        from write_audit
        "#,
    )
    .fetch_one(pool)
    .await?;

    let by_reason: (i64, i64, i64, i64, i64) = sqlx::query_as(
        r#"
        select
            count(*) filter (where reason like 'policy:%')::bigint as policy,
            count(*) filter (where evidence_refs_json -> 'gateway_event' ->> 'decision' = 'openmemory_write_failed'
                              or reason like '%upstream failure%')::bigint as openmemory_write_failed,
            count(*) filter (where evidence_refs_json -> 'gateway_event' ->> 'decision' = 'outbox_flush_success')::bigint
                as outbox_flush_success,
            count(*) filter (where evidence_refs_json -> 'gateway_event' ->> 'decision' = 'dedup_hit')::bigint
                as dedup_hit,
            count(*) filter (where reason is null
                              or (reason not like 'policy:%' and reason not like '%upstream failure%'))::bigint
                - count(*) filter (where evidence_refs_json -> 'gateway_event' ->> 'decision' in
                                    ('outbox_flush_success', 'dedup_hit'))::bigint
                as other
        from write_audit
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(ReliabilityReport {
        ok: true,
        outbox_stats: gateway_schemas::OutboxStats {
            total: outbox.0,
            by_status: gateway_schemas::OutboxByStatus {
                pending: outbox.1,
                sent: outbox.2,
                dead: outbox.3,
            },
            avg_retry_count: outbox.4.unwrap_or(0.0),
            oldest_pending_age_seconds: outbox.5,
        },
        audit_stats: gateway_schemas::AuditStats {
            total: audits.0,
            by_action: gateway_schemas::AuditByAction {
                allow: audits.1,
                redirect: audits.2,
                reject: audits.3,
            },
            recent_24h: audits.4,
            by_reason: gateway_schemas::AuditByReason {
                policy: by_reason.0,
                openmemory_write_failed: by_reason.1,
                outbox_flush_success: by_reason.2,
                dedup_hit: by_reason.3,
                other: by_reason.4.max(0),
            },
        },
        generated_at: Utc::now(),
        correlation_id: correlation_id.to_string(),
    })
}
