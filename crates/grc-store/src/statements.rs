//! Statement persistence — the one non-trivial upsert in the store (§4.5).
//!
//! `upsert_from_pull` takes the row lock (`SELECT ... FOR UPDATE`) before
//! applying `grc_lifecycle::StatementState::observe_pull`, so a concurrent
//! `update_local` on the same row can't race the conflict-detection compare.
//! Every other mutation here (`update_local`, `resolve_conflict`, …) is a
//! thin wrapper: load row under lock, drive the pure state machine, write
//! the result back in the same transaction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use grc_lifecycle::{LifecycleError, PullOutcome, StatementState};
use grc_schemas::{ConflictResolution, SyncStatus};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StatementRow {
    pub id: Uuid,
    pub control_id: Uuid,
    pub sor_id: String,
    pub statement_type: String,
    pub remote_content: String,
    pub remote_updated_at: Option<DateTime<Utc>>,
    pub local_content: String,
    pub is_modified: bool,
    pub modified_at: Option<DateTime<Utc>>,
    pub modified_by: Option<String>,
    pub sync_status: SyncStatus,
    pub sor_updated_on: Option<DateTime<Utc>>,
    pub last_pull_at: Option<DateTime<Utc>>,
    pub last_push_at: Option<DateTime<Utc>>,
}

impl StatementRow {
    pub fn effective_content(&self) -> &str {
        if self.is_modified {
            &self.local_content
        } else {
            &self.remote_content
        }
    }

    fn to_lifecycle_state(&self) -> StatementState {
        StatementState {
            remote_content: self.remote_content.clone(),
            local_content: self.local_content.clone(),
            is_modified: self.is_modified,
            sync_status: self.sync_status,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatementFilter {
    pub control_id: Option<Uuid>,
    pub system_id: Option<Uuid>,
    pub sync_status: Option<SyncStatus>,
    pub search: Option<String>,
}

fn sync_status_str(s: SyncStatus) -> &'static str {
    match s {
        SyncStatus::New => "new",
        SyncStatus::Synced => "synced",
        SyncStatus::Modified => "modified",
        SyncStatus::Conflict => "conflict",
    }
}

fn parse_sync_status(s: &str) -> SyncStatus {
    match s {
        "synced" => SyncStatus::Synced,
        "modified" => SyncStatus::Modified,
        "conflict" => SyncStatus::Conflict,
        _ => SyncStatus::New,
    }
}

fn row_to_statement(row: sqlx::postgres::PgRow) -> Result<StatementRow, sqlx::Error> {
    Ok(StatementRow {
        id: row.try_get("id")?,
        control_id: row.try_get("control_id")?,
        sor_id: row.try_get("sor_id")?,
        statement_type: row.try_get("statement_type")?,
        remote_content: row.try_get("remote_content")?,
        remote_updated_at: row.try_get("remote_updated_at")?,
        local_content: row.try_get("local_content")?,
        is_modified: row.try_get("is_modified")?,
        modified_at: row.try_get("modified_at")?,
        modified_by: row.try_get("modified_by")?,
        sync_status: parse_sync_status(&row.try_get::<String, _>("sync_status")?),
        sor_updated_on: row.try_get("sor_updated_on")?,
        last_pull_at: row.try_get("last_pull_at")?,
        last_push_at: row.try_get("last_push_at")?,
    })
}

async fn write_back(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    state: &StatementState,
    touch_modified: bool,
) -> Result<StatementRow> {
    let row = sqlx::query(
        r#"
        update statements
        set remote_content = $2,
            local_content = $3,
            is_modified = $4,
            sync_status = $5,
            modified_at = case when $6 then now() else modified_at end,
            updated_at = now()
        where id = $1
        returning *
        "#,
    )
    .bind(id)
    .bind(&state.remote_content)
    .bind(&state.local_content)
    .bind(state.is_modified)
    .bind(sync_status_str(state.sync_status))
    .bind(touch_modified)
    .fetch_one(&mut **tx)
    .await
    .context("statement write_back failed")?;
    row_to_statement(row).map_err(Into::into)
}

async fn load_for_update(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, id: Uuid) -> Result<StatementRow> {
    let row = sqlx::query("select * from statements where id = $1 for update")
        .bind(id)
        .fetch_one(&mut **tx)
        .await
        .context("statement load_for_update failed")?;
    row_to_statement(row).map_err(Into::into)
}

/// Insert-or-update a statement observed during a pull, applying §4.4's
/// pull rules via `grc_lifecycle::StatementState::observe_pull`. The row
/// lock (`FOR UPDATE`) is held across the compare-and-write so a
/// concurrent `update_local` on the same row serializes against it (§4.5).
pub async fn upsert_from_pull(
    pool: &PgPool,
    control_id: Uuid,
    sor_id: &str,
    statement_type: &str,
    fetched_remote_content: &str,
    sor_updated_on: Option<DateTime<Utc>>,
) -> Result<(StatementRow, PullOutcome)> {
    let mut tx = pool.begin().await.context("upsert_from_pull begin tx failed")?;

    let existing = sqlx::query("select id from statements where control_id = $1 and sor_id = $2 for update")
        .bind(control_id)
        .bind(sor_id)
        .fetch_optional(&mut *tx)
        .await
        .context("upsert_from_pull existence check failed")?;

    let (row, outcome) = match existing {
        None => {
            let row = sqlx::query(
                r#"
                insert into statements (
                    control_id, sor_id, statement_type, remote_content,
                    remote_updated_at, sync_status, sor_updated_on, last_pull_at
                ) values ($1, $2, $3, $4, now(), 'synced', $5, now())
                returning *
                "#,
            )
            .bind(control_id)
            .bind(sor_id)
            .bind(statement_type)
            .bind(fetched_remote_content)
            .bind(sor_updated_on)
            .fetch_one(&mut *tx)
            .await
            .context("upsert_from_pull insert failed")?;
            (row_to_statement(row)?, PullOutcome::Unchanged)
        }
        Some(existing_row) => {
            let id: Uuid = existing_row.try_get("id")?;
            let current = load_for_update(&mut tx, id).await?;
            let mut state = current.to_lifecycle_state();
            let outcome = state.observe_pull(fetched_remote_content);

            let row = sqlx::query(
                r#"
                update statements
                set remote_content = $2,
                    local_content = $3,
                    is_modified = $4,
                    sync_status = $5,
                    sor_updated_on = $6,
                    last_pull_at = now(),
                    updated_at = now()
                where id = $1
                returning *
                "#,
            )
            .bind(id)
            .bind(&state.remote_content)
            .bind(&state.local_content)
            .bind(state.is_modified)
            .bind(sync_status_str(state.sync_status))
            .bind(sor_updated_on)
            .fetch_one(&mut *tx)
            .await
            .context("upsert_from_pull update failed")?;
            (row_to_statement(row)?, outcome)
        }
    };

    tx.commit().await.context("upsert_from_pull commit failed")?;
    Ok((row, outcome))
}

/// `statements.updateLocal`.
pub async fn update_local(pool: &PgPool, id: Uuid, content: &str, user: Option<&str>) -> Result<Result<StatementRow, LifecycleError>> {
    let mut tx = pool.begin().await.context("update_local begin tx failed")?;
    let current = load_for_update(&mut tx, id).await?;
    let mut state = current.to_lifecycle_state();

    if let Err(e) = state.edit_local(content) {
        tx.rollback().await.ok();
        return Ok(Err(e));
    }

    let row = write_back(&mut tx, id, &state, true).await?;
    sqlx::query("update statements set modified_by = $2 where id = $1").bind(id).bind(user).execute(&mut *tx).await.context("update_local modified_by failed")?;
    tx.commit().await.context("update_local commit failed")?;
    Ok(Ok(row))
}

/// `statements.resolveConflict`.
pub async fn resolve_conflict(pool: &PgPool, id: Uuid, resolution: ConflictResolution, user: Option<&str>) -> Result<Result<StatementRow, LifecycleError>> {
    let mut tx = pool.begin().await.context("resolve_conflict begin tx failed")?;
    let current = load_for_update(&mut tx, id).await?;
    let mut state = current.to_lifecycle_state();

    if let Err(e) = state.resolve(resolution) {
        tx.rollback().await.ok();
        return Ok(Err(e));
    }

    let row = write_back(&mut tx, id, &state, true).await?;
    sqlx::query(
        "update statements set conflict_resolved_at = now(), conflict_resolved_by = $2 where id = $1",
    )
    .bind(id)
    .bind(user)
    .execute(&mut *tx)
    .await
    .context("resolve_conflict stamp failed")?;
    tx.commit().await.context("resolve_conflict commit failed")?;
    Ok(Ok(row))
}

/// `statements.revertToRemote`.
pub async fn revert_to_remote(pool: &PgPool, id: Uuid) -> Result<StatementRow> {
    let mut tx = pool.begin().await.context("revert_to_remote begin tx failed")?;
    let current = load_for_update(&mut tx, id).await?;
    let mut state = current.to_lifecycle_state();
    state.revert_to_remote();
    let row = write_back(&mut tx, id, &state, false).await?;
    tx.commit().await.context("revert_to_remote commit failed")?;
    Ok(row)
}

/// `statements.markSynced` — called by the push engine after a successful
/// `update_statement` SOR call.
pub async fn mark_pushed(pool: &PgPool, id: Uuid) -> Result<Result<StatementRow, LifecycleError>> {
    let mut tx = pool.begin().await.context("mark_pushed begin tx failed")?;
    let current = load_for_update(&mut tx, id).await?;
    let mut state = current.to_lifecycle_state();

    if let Err(e) = state.mark_pushed() {
        tx.rollback().await.ok();
        return Ok(Err(e));
    }

    let row = write_back(&mut tx, id, &state, false).await?;
    sqlx::query("update statements set last_push_at = now() where id = $1").bind(id).execute(&mut *tx).await.context("mark_pushed last_push_at failed")?;
    tx.commit().await.context("mark_pushed commit failed")?;
    Ok(Ok(row))
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<StatementRow>> {
    let row = sqlx::query("select * from statements where id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("statement get failed")?;
    row.map(row_to_statement).transpose().map_err(Into::into)
}

/// Used by the push engine to validate preconditions in bulk before
/// starting a job (§4.7).
pub async fn get_many(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<StatementRow>> {
    let rows = sqlx::query("select * from statements where id = any($1)")
        .bind(ids)
        .fetch_all(pool)
        .await
        .context("statement get_many failed")?;
    rows.into_iter().map(row_to_statement).collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

pub async fn list(pool: &PgPool, filter: &StatementFilter, page: crate::PageRequest) -> Result<crate::StorePage<StatementRow>> {
    let like = filter.search.as_ref().map(|s| format!("%{}%", s.to_lowercase()));
    let status_filter = filter.sync_status.map(sync_status_str);

    let total: (i64,) = sqlx::query_as(
        r#"
        select count(*) from statements s
        join controls c on c.id = s.control_id
        where ($1::uuid is null or s.control_id = $1)
          and ($2::uuid is null or c.system_id = $2)
          and ($3::text is null or s.sync_status = $3)
          and ($4::text is null or lower(s.local_content) like $4 or lower(s.remote_content) like $4)
        "#,
    )
    .bind(filter.control_id)
    .bind(filter.system_id)
    .bind(status_filter)
    .bind(&like)
    .fetch_one(pool)
    .await
    .context("statement list count failed")?;

    let rows = sqlx::query(
        r#"
        select s.* from statements s
        join controls c on c.id = s.control_id
        where ($1::uuid is null or s.control_id = $1)
          and ($2::uuid is null or c.system_id = $2)
          and ($3::text is null or s.sync_status = $3)
          and ($4::text is null or lower(s.local_content) like $4 or lower(s.remote_content) like $4)
        order by s.sor_id asc
        limit $5 offset $6
        "#,
    )
    .bind(filter.control_id)
    .bind(filter.system_id)
    .bind(status_filter)
    .bind(&like)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await
    .context("statement list failed")?;

    let items = rows.into_iter().map(row_to_statement).collect::<Result<Vec<_>, _>>()?;
    Ok(crate::StorePage { items, total: total.0 })
}
