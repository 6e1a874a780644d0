//! System persistence — plain "insert or overwrite scalar attributes"
//! upsert semantics (§4.5); no conflict detection applies at this level.

use crate::{PageRequest, StorePage};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SystemRow {
    pub id: Uuid,
    pub sor_id: String,
    pub name: String,
    pub description: Option<String>,
    pub acronym: Option<String>,
    pub owner: Option<String>,
    pub status: Option<String>,
    pub sor_updated_on: Option<DateTime<Utc>>,
    pub last_pull_at: Option<DateTime<Utc>>,
    pub last_push_at: Option<DateTime<Utc>>,
}

/// Fields the pull engine (or `systems.import`) upserts from an SOR record.
#[derive(Debug, Clone)]
pub struct SystemUpsert {
    pub sor_id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub status: Option<String>,
    pub sor_updated_on: Option<DateTime<Utc>>,
}

fn row_to_system(row: sqlx::postgres::PgRow) -> Result<SystemRow, sqlx::Error> {
    Ok(SystemRow {
        id: row.try_get("id")?,
        sor_id: row.try_get("sor_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        acronym: row.try_get("acronym")?,
        owner: row.try_get("owner")?,
        status: row.try_get("status")?,
        sor_updated_on: row.try_get("sor_updated_on")?,
        last_pull_at: row.try_get("last_pull_at")?,
        last_push_at: row.try_get("last_push_at")?,
    })
}

/// Insert a system, or overwrite its scalar attributes and stamp
/// `last_pull_at` if `sor_id` already exists.
pub async fn upsert(pool: &PgPool, input: &SystemUpsert) -> Result<SystemRow> {
    let row = sqlx::query(
        r#"
        insert into systems (sor_id, name, description, owner, status, sor_updated_on, last_pull_at)
        values ($1, $2, $3, $4, $5, $6, now())
        on conflict (sor_id) do update
            set name = excluded.name,
                description = excluded.description,
                owner = excluded.owner,
                status = excluded.status,
                sor_updated_on = excluded.sor_updated_on,
                last_pull_at = now(),
                updated_at = now()
        returning *
        "#,
    )
    .bind(&input.sor_id)
    .bind(&input.name)
    .bind(&input.description)
    .bind(&input.owner)
    .bind(&input.status)
    .bind(input.sor_updated_on)
    .fetch_one(pool)
    .await
    .context("system upsert failed")?;
    row_to_system(row).map_err(Into::into)
}

/// Stamp `last_pull_at = now()` — called by the pull engine once a system
/// finishes its pass, independent of the per-control/statement upserts
/// that already touch their own `last_pull_at` columns.
pub async fn touch_last_pull(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("update systems set last_pull_at = now(), updated_at = now() where id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("system touch_last_pull failed")?;
    Ok(())
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<SystemRow>> {
    let row = sqlx::query("select * from systems where id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("system get failed")?;
    row.map(row_to_system).transpose().map_err(Into::into)
}

pub async fn get_by_sor_id(pool: &PgPool, sor_id: &str) -> Result<Option<SystemRow>> {
    let row = sqlx::query("select * from systems where sor_id = $1")
        .bind(sor_id)
        .fetch_optional(pool)
        .await
        .context("system get_by_sor_id failed")?;
    row.map(row_to_system).transpose().map_err(Into::into)
}

/// `sor_id`s already imported locally — used by `systems.discover()` to
/// mark which SOR-side systems are already mirrored.
pub async fn list_sor_ids(pool: &PgPool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("select sor_id from systems")
        .fetch_all(pool)
        .await
        .context("system list_sor_ids failed")?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn list(pool: &PgPool, page: PageRequest, search: Option<&str>, status: Option<&str>) -> Result<StorePage<SystemRow>> {
    let like = search.map(|s| format!("%{}%", s.to_lowercase()));

    let total: (i64,) = sqlx::query_as(
        r#"
        select count(*) from systems
        where ($1::text is null or lower(name) like $1 or lower(sor_id) like $1)
          and ($2::text is null or status = $2)
        "#,
    )
    .bind(&like)
    .bind(status)
    .fetch_one(pool)
    .await
    .context("system list count failed")?;

    let rows = sqlx::query(
        r#"
        select * from systems
        where ($1::text is null or lower(name) like $1 or lower(sor_id) like $1)
          and ($2::text is null or status = $2)
        order by name asc
        limit $3 offset $4
        "#,
    )
    .bind(&like)
    .bind(status)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await
    .context("system list failed")?;

    let items = rows.into_iter().map(row_to_system).collect::<Result<Vec<_>, _>>()?;
    Ok(StorePage { items, total: total.0 })
}

/// Cascading delete — removes child controls and their statements via FK
/// `on delete cascade` (§3 System invariant).
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("delete from systems where id = $1").bind(id).execute(pool).await.context("system delete failed")?;
    Ok(())
}
