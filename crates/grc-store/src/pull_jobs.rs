//! Pull job persistence (§3 PullJob, §4.6). Durable single-flight: the
//! partial unique index on `status in (pending, running)` makes a second
//! concurrent `start` fail at the DB layer; the pull engine additionally
//! checks before inserting so it can surface `ConcurrentJob` without
//! relying on a constraint-violation round-trip.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use grc_schemas::JobStatus;
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PullJobRow {
    pub id: Uuid,
    pub system_ids: Vec<Uuid>,
    pub status: JobStatus,
    pub total_systems: i32,
    pub completed_systems: i32,
    pub total_controls: i32,
    pub completed_controls: i32,
    pub total_statements: i32,
    pub completed_statements: i32,
    pub current_system: Option<String>,
    pub errors: Value,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn job_status_str(s: JobStatus) -> &'static str {
    match s {
        JobStatus::Pending => "pending",
        JobStatus::Running => "running",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

fn parse_job_status(s: &str) -> JobStatus {
    match s {
        "running" => JobStatus::Running,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        "cancelled" => JobStatus::Cancelled,
        _ => JobStatus::Pending,
    }
}

fn row_to_job(row: sqlx::postgres::PgRow) -> Result<PullJobRow, sqlx::Error> {
    Ok(PullJobRow {
        id: row.try_get("id")?,
        system_ids: row.try_get("system_ids")?,
        status: parse_job_status(&row.try_get::<String, _>("status")?),
        total_systems: row.try_get("total_systems")?,
        completed_systems: row.try_get("completed_systems")?,
        total_controls: row.try_get("total_controls")?,
        completed_controls: row.try_get("completed_controls")?,
        total_statements: row.try_get("total_statements")?,
        completed_statements: row.try_get("completed_statements")?,
        current_system: row.try_get("current_system")?,
        errors: row.try_get("errors")?,
        error: row.try_get("error")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

/// True if a pull job is currently `pending` or `running` (§3 single-flight).
pub async fn has_active(pool: &PgPool) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as(
        "select exists(select 1 from pull_jobs where status in ('pending', 'running'))",
    )
    .fetch_one(pool)
    .await
    .context("pull_jobs has_active failed")?;
    Ok(exists)
}

pub async fn insert(pool: &PgPool, system_ids: &[Uuid], created_by: Option<&str>) -> Result<PullJobRow> {
    let row = sqlx::query(
        r#"
        insert into pull_jobs (system_ids, status, total_systems, created_by, started_at)
        values ($1, 'running', $2, $3, now())
        returning *
        "#,
    )
    .bind(system_ids)
    .bind(system_ids.len() as i32)
    .bind(created_by)
    .fetch_one(pool)
    .await
    .context("pull_jobs insert failed")?;
    row_to_job(row).map_err(Into::into)
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<PullJobRow>> {
    let row = sqlx::query("select * from pull_jobs where id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("pull_jobs get failed")?;
    row.map(row_to_job).transpose().map_err(Into::into)
}

/// Throttled progress write (§4.6 "implementations SHOULD throttle DB
/// writes"); called by the pull worker every N records or ~500ms.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub completed_systems: Option<i32>,
    pub total_controls: Option<i32>,
    pub completed_controls: Option<i32>,
    pub total_statements: Option<i32>,
    pub completed_statements: Option<i32>,
    pub current_system: Option<String>,
}

pub async fn update_progress(pool: &PgPool, id: Uuid, p: &ProgressUpdate) -> Result<()> {
    sqlx::query(
        r#"
        update pull_jobs
        set completed_systems = coalesce($2, completed_systems),
            total_controls = coalesce($3, total_controls),
            completed_controls = coalesce($4, completed_controls),
            total_statements = coalesce($5, total_statements),
            completed_statements = coalesce($6, completed_statements),
            current_system = coalesce($7, current_system)
        where id = $1
        "#,
    )
    .bind(id)
    .bind(p.completed_systems)
    .bind(p.total_controls)
    .bind(p.completed_controls)
    .bind(p.total_statements)
    .bind(p.completed_statements)
    .bind(&p.current_system)
    .execute(pool)
    .await
    .context("pull_jobs update_progress failed")?;
    Ok(())
}

pub async fn append_error(pool: &PgPool, id: Uuid, message: &str) -> Result<()> {
    sqlx::query(
        r#"
        update pull_jobs
        set errors = errors || jsonb_build_array(jsonb_build_object('message', $2::text, 'at', now()))
        where id = $1
        "#,
    )
    .bind(id)
    .bind(message)
    .execute(pool)
    .await
    .context("pull_jobs append_error failed")?;
    Ok(())
}

/// Terminal transition (§4.6: `completed` unless
/// `completed_systems == 0 && errors != []`, in which case `failed`;
/// cancellation always yields `cancelled`).
pub async fn finish(pool: &PgPool, id: Uuid, status: JobStatus, error: Option<&str>) -> Result<()> {
    sqlx::query(
        r#"
        update pull_jobs
        set status = $2,
            error = $3,
            completed_at = now()
        where id = $1
        "#,
    )
    .bind(id)
    .bind(job_status_str(status))
    .bind(error)
    .execute(pool)
    .await
    .context("pull_jobs finish failed")?;
    Ok(())
}

/// Flip a `pending`/`running` job to `cancelled`. No-op if already terminal.
pub async fn cancel(pool: &PgPool, id: Uuid) -> Result<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update pull_jobs
        set status = 'cancelled', completed_at = now()
        where id = $1 and status in ('pending', 'running')
        returning id
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("pull_jobs cancel failed")?;
    Ok(row.is_some())
}
