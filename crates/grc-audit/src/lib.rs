//! Audit Recorder (C5) — append-only event capture with filter/paginate/
//! export/stats (§4.8).
//!
//! The synchronous `record` sink writes directly to `audit_events` (the
//! table grc-store's migration owns, same as every other table in the
//! system). [`AsyncRecorder`] wraps it with a bounded mpsc channel and a
//! drain task for callers that don't want to wait on the DB round-trip
//! inline with their mutation.

mod export;
mod sink;
mod stats;

pub use export::{to_csv, to_pdf, ExportFormat};
pub use sink::{AsyncRecorder, Recorder};
pub use stats::{stats, AuditStats};

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Success,
    Failure,
}

impl EventStatus {
    fn as_str(self) -> &'static str {
        match self {
            EventStatus::Success => "success",
            EventStatus::Failure => "failure",
        }
    }
}

/// One event to be recorded. `details` carries operation-specific payload
/// (counts, job id, resolution choice, …).
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub status: EventStatus,
    pub details: Value,
    pub user_email: Option<String>,
    pub ip_address: Option<String>,
}

impl NewAuditEvent {
    pub fn new(event_type: impl Into<String>, entity_type: impl Into<String>, entity_id: impl Into<String>, action: impl Into<String>, status: EventStatus) -> Self {
        Self {
            event_type: event_type.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action: action.into(),
            status,
            details: Value::Object(Default::default()),
            user_email: None,
            ip_address: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_user(mut self, user_email: impl Into<String>) -> Self {
        self.user_email = Some(user_email.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct AuditEventRow {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub status: String,
    pub details: Value,
    pub user_email: Option<String>,
    pub ip_address: Option<String>,
}

fn row_to_event(row: sqlx::postgres::PgRow) -> Result<AuditEventRow, sqlx::Error> {
    Ok(AuditEventRow {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        event_type: row.try_get("event_type")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        action: row.try_get("action")?,
        status: row.try_get("status")?,
        details: row.try_get("details")?,
        user_email: row.try_get("user_email")?,
        ip_address: row.try_get("ip_address")?,
    })
}

/// `audit.query` filters (§4.8). `page_size` is capped at 100 by
/// [`Filter::clamp`] — callers should call it before querying.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub event_types: Vec<String>,
    pub entity_types: Vec<String>,
    pub entity_id: Option<String>,
    pub status: Option<EventStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub page: i64,
    pub page_size: i64,
}

const MAX_PAGE_SIZE: i64 = 100;
const EXPORT_MAX_ROWS: i64 = 10_000;

impl Filter {
    pub fn clamp(mut self) -> Self {
        self.page = self.page.max(1);
        self.page_size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

/// Record one event synchronously — the contract every C3/C6/C7/C8
/// operation calls on every outcome.
pub async fn record(pool: &PgPool, event: &NewAuditEvent) -> anyhow::Result<AuditEventRow> {
    let row = sqlx::query(
        r#"
        insert into audit_events (event_type, entity_type, entity_id, action, status, details, user_email, ip_address)
        values ($1, $2, $3, $4, $5, $6, $7, $8)
        returning *
        "#,
    )
    .bind(&event.event_type)
    .bind(&event.entity_type)
    .bind(&event.entity_id)
    .bind(&event.action)
    .bind(event.status.as_str())
    .bind(&event.details)
    .bind(&event.user_email)
    .bind(&event.ip_address)
    .fetch_one(pool)
    .await?;
    Ok(row_to_event(row)?)
}

pub async fn get(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<AuditEventRow>> {
    let row = sqlx::query("select * from audit_events where id = $1").bind(id).fetch_optional(pool).await?;
    row.map(row_to_event).transpose().map_err(Into::into)
}

/// `audit.query` — ordered `created_at DESC`, paginated, capped at 100/page.
pub async fn query(pool: &PgPool, filter: &Filter) -> anyhow::Result<(Vec<AuditEventRow>, i64)> {
    let filter = filter.clone().clamp();
    let like = filter.search.as_ref().map(|s| format!("%{}%", s.to_lowercase()));
    let status = filter.status.map(EventStatus::as_str);

    let total: (i64,) = sqlx::query_as(
        r#"
        select count(*) from audit_events
        where (array_length($1::text[], 1) is null or event_type = any($1))
          and (array_length($2::text[], 1) is null or entity_type = any($2))
          and ($3::text is null or entity_id = $3)
          and ($4::text is null or status = $4)
          and ($5::timestamptz is null or created_at >= $5)
          and ($6::timestamptz is null or created_at <= $6)
          and ($7::text is null or lower(user_email) like $7 or lower(action) like $7 or lower(entity_id) like $7)
        "#,
    )
    .bind(&filter.event_types)
    .bind(&filter.entity_types)
    .bind(&filter.entity_id)
    .bind(status)
    .bind(filter.start_date)
    .bind(filter.end_date)
    .bind(&like)
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query(
        r#"
        select * from audit_events
        where (array_length($1::text[], 1) is null or event_type = any($1))
          and (array_length($2::text[], 1) is null or entity_type = any($2))
          and ($3::text is null or entity_id = $3)
          and ($4::text is null or status = $4)
          and ($5::timestamptz is null or created_at >= $5)
          and ($6::timestamptz is null or created_at <= $6)
          and ($7::text is null or lower(user_email) like $7 or lower(action) like $7 or lower(entity_id) like $7)
        order by created_at desc
        limit $8 offset $9
        "#,
    )
    .bind(&filter.event_types)
    .bind(&filter.entity_types)
    .bind(&filter.entity_id)
    .bind(status)
    .bind(filter.start_date)
    .bind(filter.end_date)
    .bind(&like)
    .bind(filter.page_size)
    .bind(filter.offset())
    .fetch_all(pool)
    .await?;

    let items = rows.into_iter().map(row_to_event).collect::<Result<Vec<_>, _>>()?;
    Ok((items, total.0))
}

/// Rows matching `filter`, capped at `EXPORT_MAX_ROWS` (§4.8, §6
/// `audit.export_max_rows`), for `export::to_csv`/`export::to_pdf`.
async fn query_for_export(pool: &PgPool, filter: &Filter) -> anyhow::Result<Vec<AuditEventRow>> {
    let mut filter = filter.clone();
    filter.page = 1;
    filter.page_size = EXPORT_MAX_ROWS.min(MAX_PAGE_SIZE.max(EXPORT_MAX_ROWS));
    // query()'s Filter::clamp would otherwise cap page_size at 100; export
    // needs its own (higher) cap, so issue the query directly.
    let like = filter.search.as_ref().map(|s| format!("%{}%", s.to_lowercase()));
    let status = filter.status.map(EventStatus::as_str);

    let rows = sqlx::query(
        r#"
        select * from audit_events
        where (array_length($1::text[], 1) is null or event_type = any($1))
          and (array_length($2::text[], 1) is null or entity_type = any($2))
          and ($3::text is null or entity_id = $3)
          and ($4::text is null or status = $4)
          and ($5::timestamptz is null or created_at >= $5)
          and ($6::timestamptz is null or created_at <= $6)
          and ($7::text is null or lower(user_email) like $7 or lower(action) like $7 or lower(entity_id) like $7)
        order by created_at desc
        limit $8
        "#,
    )
    .bind(&filter.event_types)
    .bind(&filter.entity_types)
    .bind(&filter.entity_id)
    .bind(status)
    .bind(filter.start_date)
    .bind(filter.end_date)
    .bind(&like)
    .bind(EXPORT_MAX_ROWS)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_to_event).collect::<Result<Vec<_>, _>>().map_err(Into::into)
}
