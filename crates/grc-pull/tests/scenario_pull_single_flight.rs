//! DB-backed: starting a second pull while one is running is rejected.
//! Skips if `GRC_DATABASE_URL` is not set.

use grc_pull::{PullEngine, PullError};
use grc_sor_client::{AuthConfig, ClientConfig, SorClient};
use sqlx::postgres::PgPoolOptions;

async fn connect_or_skip() -> Option<sqlx::PgPool> {
    let url = std::env::var(grc_store::ENV_DB_URL).ok()?;
    let pool = PgPoolOptions::new().max_connections(4).connect(&url).await.ok()?;
    grc_store::migrate(&pool).await.ok()?;
    Some(pool)
}

fn dummy_client() -> SorClient {
    SorClient::new(
        "https://example.test",
        AuthConfig::Basic {
            username: "svc".into(),
            password: "secret".into(),
        },
        ClientConfig::default(),
    )
    .unwrap()
}

#[tokio::test]
#[ignore = "requires GRC_DATABASE_URL"]
async fn second_start_is_rejected_while_first_is_running() -> anyhow::Result<()> {
    let Some(pool) = connect_or_skip().await else { return Ok(()) };
    let engine = PullEngine::new(pool.clone());

    let system = grc_store::systems::upsert(
        &pool,
        &grc_store::systems::SystemUpsert {
            sor_id: format!("sys-{}", uuid::Uuid::new_v4()),
            name: "Payroll".into(),
            description: None,
            owner: None,
            status: None,
            sor_updated_on: None,
        },
    )
    .await?;

    let first = engine.start(dummy_client(), vec![system.id], None).await?;
    let second = engine.start(dummy_client(), vec![system.id], None).await;
    assert_eq!(second, Err(PullError::ConcurrentJob));

    // Let the detached worker run to completion before the pool drops.
    for _ in 0..50 {
        if let Some(job) = engine.status(first).await? {
            if job.status.is_terminal() {
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    Ok(())
}
