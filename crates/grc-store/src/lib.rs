//! Entity Store (C4) — typed Postgres persistence for the sync core.
//!
//! Connection bootstrap and migration follow the same shape as the
//! teacher's db crate: a single `connect_from_env`/`migrate` pair, one
//! embedded `./migrations` directory, and `sqlx::query`/`Row::try_get`
//! rather than the compile-time `query!` macros (no `DATABASE_URL` is
//! available at build time in this workspace).

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub mod connections;
pub mod controls;
pub mod pull_jobs;
pub mod statements;
pub mod systems;

pub use connections::{ConnectionRow, NewConnectionConfig};
pub use controls::ControlRow;
pub use pull_jobs::PullJobRow;
pub use statements::{StatementFilter, StatementRow};
pub use systems::SystemRow;

pub const ENV_DB_URL: &str = "GRC_DATABASE_URL";

/// Connect to Postgres using `GRC_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await.context("db migrate failed")?;
    Ok(())
}

/// Test helper: connect + migrate in one call.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Connectivity + schema-presence probe.
#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_statements_table: bool,
}

pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as("select 1").fetch_one(pool).await.context("status connectivity query failed")?;
    let (exists,): (bool,) = sqlx::query_as(
        r#"
        select exists (
            select 1 from information_schema.tables
            where table_schema = 'public' and table_name = 'statements'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_statements_table: exists,
    })
}

/// A page of rows plus the total row count matching the filter, mirroring
/// `grc_schemas::Page` but for locally-paginated store queries.
#[derive(Debug, Clone)]
pub struct StorePage<T> {
    pub items: Vec<T>,
    pub total: i64,
}

/// Pagination input shared by every `list` query; page is 1-indexed.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.page_size.max(1)
    }

    pub fn limit(&self) -> i64 {
        self.page_size.max(1)
    }
}
