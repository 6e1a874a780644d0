//! `audit.stats` aggregation (§4.8).

use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct AuditStats {
    pub total: i64,
    pub by_type: HashMap<String, i64>,
    pub by_status: HashMap<String, i64>,
    pub today: i64,
    pub this_week: i64,
    pub this_month: i64,
}

pub async fn stats(pool: &PgPool) -> anyhow::Result<AuditStats> {
    let total: (i64,) = sqlx::query_as("select count(*) from audit_events").fetch_one(pool).await?;

    let by_type_rows: Vec<(String, i64)> = sqlx::query_as("select event_type, count(*) from audit_events group by event_type").fetch_all(pool).await?;
    let by_status_rows: Vec<(String, i64)> = sqlx::query_as("select status, count(*) from audit_events group by status").fetch_all(pool).await?;

    let today: (i64,) = sqlx::query_as("select count(*) from audit_events where created_at >= date_trunc('day', now())").fetch_one(pool).await?;
    let this_week: (i64,) = sqlx::query_as("select count(*) from audit_events where created_at >= date_trunc('week', now())").fetch_one(pool).await?;
    let this_month: (i64,) = sqlx::query_as("select count(*) from audit_events where created_at >= date_trunc('month', now())").fetch_one(pool).await?;

    Ok(AuditStats {
        total: total.0,
        by_type: by_type_rows.into_iter().collect(),
        by_status: by_status_rows.into_iter().collect(),
        today: today.0,
        this_week: this_week.0,
        this_month: this_month.0,
    })
}
