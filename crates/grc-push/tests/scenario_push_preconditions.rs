//! DB + mocked-SOR: `push.start` rejects precondition violations
//! synchronously (§4.7, §8 scenario 6) before any job exists or any SOR
//! call is made, and pushes a modified statement through to `synced` on
//! success. Skips if `GRC_DATABASE_URL` is not set.

use grc_push::{PushEngine, PushError, StatementOutcome};
use grc_sor_client::{AuthConfig, ClientConfig, SorClient};
use grc_store::statements::StatementRow;
use httpmock::MockServer;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use uuid::Uuid;

async fn connect_or_skip() -> Option<sqlx::PgPool> {
    let url = std::env::var(grc_store::ENV_DB_URL).ok()?;
    let pool = PgPoolOptions::new().max_connections(4).connect(&url).await.ok()?;
    grc_store::migrate(&pool).await.ok()?;
    Some(pool)
}

async fn seed_statement(pool: &sqlx::PgPool, local_content: Option<&str>) -> anyhow::Result<StatementRow> {
    let system = grc_store::systems::upsert(
        pool,
        &grc_store::systems::SystemUpsert {
            sor_id: format!("sys-{}", Uuid::new_v4()),
            name: "HR".into(),
            description: None,
            owner: None,
            status: None,
            sor_updated_on: None,
        },
    )
    .await?;
    let control = grc_store::controls::upsert(
        pool,
        &grc_store::controls::ControlUpsert {
            system_id: system.id,
            sor_id: format!("ctl-{}", Uuid::new_v4()),
            control_id: "AC-2".into(),
            control_name: "Account Mgmt".into(),
            control_family: None,
            description: None,
            responsible_role: None,
            sor_updated_on: None,
        },
    )
    .await?;
    let (stmt, _) = grc_store::statements::upsert_from_pull(pool, control.id, &format!("stmt-{}", Uuid::new_v4()), "implementation", "orig", None).await?;
    match local_content {
        Some(content) => Ok(grc_store::statements::update_local(pool, stmt.id, content, Some("tester")).await?.expect("edit applies")),
        None => Ok(stmt),
    }
}

#[tokio::test]
#[ignore = "requires GRC_DATABASE_URL"]
async fn push_start_rejects_not_modified_statement_synchronously() -> anyhow::Result<()> {
    let Some(pool) = connect_or_skip().await else { return Ok(()) };
    let server = MockServer::start();
    let stmt = seed_statement(&pool, None).await?;

    let mock = server.mock(|when, then| {
        when.method(httpmock::Method::PUT);
        then.status(200);
    });

    let client = SorClient::new(
        server.base_url(),
        AuthConfig::Basic {
            username: "svc".into(),
            password: "secret".into(),
        },
        ClientConfig::default(),
    )?;

    let engine = PushEngine::new(pool.clone());
    let result = engine.start(client, vec![stmt.id], 2).await;

    assert_eq!(result, Err(PushError::StatementNotModified(stmt.id)));
    mock.assert_hits(0);

    let (events, _) = grc_audit::query(&pool, &grc_audit::Filter { entity_id: Some(stmt.id.to_string()), ..Default::default() }).await?;
    assert!(events.is_empty(), "no push event should be recorded when start is rejected synchronously");

    Ok(())
}

#[tokio::test]
#[ignore = "requires GRC_DATABASE_URL"]
async fn push_start_rejects_empty_selection() -> anyhow::Result<()> {
    let Some(pool) = connect_or_skip().await else { return Ok(()) };
    let client = SorClient::new("https://example.test", AuthConfig::Basic { username: "a".into(), password: "b".into() }, ClientConfig::default())?;
    let engine = PushEngine::new(pool);
    let result = engine.start(client, vec![], 2).await;
    assert_eq!(result, Err(PushError::NoStatementsSelected));
    Ok(())
}

#[tokio::test]
#[ignore = "requires GRC_DATABASE_URL"]
async fn modified_statement_is_pushed_and_marked_synced() -> anyhow::Result<()> {
    let Some(pool) = connect_or_skip().await else { return Ok(()) };
    let server = MockServer::start();
    let stmt = seed_statement(&pool, Some("amended text")).await?;

    let mock = server.mock(|when, then| {
        when.method(httpmock::Method::PUT);
        then.status(200).json_body(serde_json::json!({ "result": { "sys_id": stmt.sor_id, "sys_updated_on": "2026-01-01 00:00:00" } }));
    });

    let client = SorClient::new(
        server.base_url(),
        AuthConfig::Basic {
            username: "svc".into(),
            password: "secret".into(),
        },
        ClientConfig::default(),
    )?;

    let engine = PushEngine::new(pool.clone());
    let job_id = engine.start(client, vec![stmt.id], 2).await?;
    let snapshot = wait_for_terminal(&engine, job_id).await;

    assert_eq!(snapshot.succeeded, 1);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(snapshot.results[0].outcome, StatementOutcome::Success);
    mock.assert_hits(1);

    let updated = grc_store::statements::get(&pool, stmt.id).await?.expect("statement exists");
    assert!(!updated.is_modified);
    assert_eq!(updated.sync_status, grc_schemas::SyncStatus::Synced);

    Ok(())
}

async fn wait_for_terminal(engine: &PushEngine, job_id: uuid::Uuid) -> grc_push::PushJobSnapshot {
    for _ in 0..100 {
        let snapshot = engine.status(job_id).await.unwrap();
        if snapshot.results.len() == snapshot.total {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    engine.status(job_id).await.unwrap()
}
