//! Control persistence — plain upsert semantics (§4.5), keyed on
//! `(system_id, sor_id)`.

use crate::{PageRequest, StorePage};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ControlRow {
    pub id: Uuid,
    pub system_id: Uuid,
    pub sor_id: String,
    pub control_id: String,
    pub control_name: String,
    pub control_family: Option<String>,
    pub description: Option<String>,
    pub implementation_status: String,
    pub responsible_role: Option<String>,
    pub sor_updated_on: Option<DateTime<Utc>>,
    pub last_pull_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ControlUpsert {
    pub system_id: Uuid,
    pub sor_id: String,
    pub control_id: String,
    pub control_name: String,
    pub control_family: Option<String>,
    pub description: Option<String>,
    pub responsible_role: Option<String>,
    pub sor_updated_on: Option<DateTime<Utc>>,
}

fn row_to_control(row: sqlx::postgres::PgRow) -> Result<ControlRow, sqlx::Error> {
    Ok(ControlRow {
        id: row.try_get("id")?,
        system_id: row.try_get("system_id")?,
        sor_id: row.try_get("sor_id")?,
        control_id: row.try_get("control_id")?,
        control_name: row.try_get("control_name")?,
        control_family: row.try_get("control_family")?,
        description: row.try_get("description")?,
        implementation_status: row.try_get("implementation_status")?,
        responsible_role: row.try_get("responsible_role")?,
        sor_updated_on: row.try_get("sor_updated_on")?,
        last_pull_at: row.try_get("last_pull_at")?,
    })
}

pub async fn upsert(pool: &PgPool, input: &ControlUpsert) -> Result<ControlRow> {
    let row = sqlx::query(
        r#"
        insert into controls (
            system_id, sor_id, control_id, control_name, control_family,
            description, responsible_role, sor_updated_on, last_pull_at
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, now())
        on conflict (system_id, sor_id) do update
            set control_id = excluded.control_id,
                control_name = excluded.control_name,
                control_family = excluded.control_family,
                description = excluded.description,
                responsible_role = excluded.responsible_role,
                sor_updated_on = excluded.sor_updated_on,
                last_pull_at = now(),
                updated_at = now()
        returning *
        "#,
    )
    .bind(input.system_id)
    .bind(&input.sor_id)
    .bind(&input.control_id)
    .bind(&input.control_name)
    .bind(&input.control_family)
    .bind(&input.description)
    .bind(&input.responsible_role)
    .bind(input.sor_updated_on)
    .fetch_one(pool)
    .await
    .context("control upsert failed")?;
    row_to_control(row).map_err(Into::into)
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<ControlRow>> {
    let row = sqlx::query("select * from controls where id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("control get failed")?;
    row.map(row_to_control).transpose().map_err(Into::into)
}

pub async fn list_for_system(
    pool: &PgPool,
    system_id: Uuid,
    page: PageRequest,
    family: Option<&str>,
    search: Option<&str>,
) -> Result<StorePage<ControlRow>> {
    let like = search.map(|s| format!("%{}%", s.to_lowercase()));

    let total: (i64,) = sqlx::query_as(
        r#"
        select count(*) from controls
        where system_id = $1
          and ($2::text is null or control_family = $2)
          and ($3::text is null or lower(control_name) like $3 or lower(control_id) like $3)
        "#,
    )
    .bind(system_id)
    .bind(family)
    .bind(&like)
    .fetch_one(pool)
    .await
    .context("control list_for_system count failed")?;

    let rows = sqlx::query(
        r#"
        select * from controls
        where system_id = $1
          and ($2::text is null or control_family = $2)
          and ($3::text is null or lower(control_name) like $3 or lower(control_id) like $3)
        order by control_id asc
        limit $4 offset $5
        "#,
    )
    .bind(system_id)
    .bind(family)
    .bind(&like)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await
    .context("control list_for_system failed")?;

    let items = rows.into_iter().map(row_to_control).collect::<Result<Vec<_>, _>>()?;
    Ok(StorePage { items, total: total.0 })
}
