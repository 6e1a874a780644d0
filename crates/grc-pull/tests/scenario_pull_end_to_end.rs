//! End-to-end pull against an in-process fake SOR (`grc-testkit`) rather
//! than a bare `httpmock` stub — exercises pagination, control upsert, and
//! statement upsert together in one run.

use grc_schemas::{SorControl, SorStatement};
use grc_sor_client::{AuthConfig, ClientConfig, SorClient};
use grc_store::systems::SystemUpsert;
use grc_store::PageRequest;
use grc_testkit::FakeSor;

#[tokio::test]
#[ignore = "requires GRC_DATABASE_URL and runs real migrations"]
async fn pull_imports_controls_and_statements_from_fake_sor() {
    let pool = grc_store::testkit_db_pool().await.expect("test db pool");

    let fake = FakeSor {
        systems: vec![],
        controls: vec![SorControl {
            sys_id: "ctrl-001".into(),
            control_id: "AC-2".into(),
            control_name: "Account Management".into(),
            control_family: Some("Access Control".into()),
            description: Some("Manages accounts".into()),
            implementation_status: Some("implemented".into()),
            responsible_role: Some("security-team".into()),
            sys_updated_on: Some("2026-01-01 00:00:00".into()),
        }],
        statements: vec![SorStatement {
            sys_id: "stmt-001".into(),
            statement_type: Some("implementation".into()),
            content: "The organization manages information system accounts.".into(),
            sys_updated_on: Some("2026-01-01 00:00:00".into()),
        }],
    };
    let handle = fake.spawn().await;

    let system = grc_store::systems::upsert(
        &pool,
        &SystemUpsert {
            sor_id: "sys-fake-001".into(),
            name: "Fake Service".into(),
            description: None,
            owner: None,
            status: Some("active".into()),
            sor_updated_on: None,
        },
    )
    .await
    .expect("seed system");

    let client = SorClient::new(
        handle.base_url.clone(),
        AuthConfig::Basic {
            username: "grc".into(),
            password: "grc".into(),
        },
        ClientConfig::default(),
    )
    .expect("build client");

    let engine = grc_pull::PullEngine::new(pool.clone());
    let job_id = engine.start(client, vec![system.id], Some("test-harness".into())).await.expect("start pull");

    let mut snapshot = None;
    for _ in 0..50 {
        let s = engine.status(job_id).await.expect("status").expect("job exists");
        if s.status.is_terminal() {
            snapshot = Some(s);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    let snapshot = snapshot.expect("job reached a terminal status");
    assert_eq!(snapshot.status, grc_schemas::JobStatus::Completed);
    assert_eq!(snapshot.completed_systems, 1);
    assert_eq!(snapshot.completed_controls, 1);
    assert_eq!(snapshot.completed_statements, 1);

    let page = PageRequest { page: 1, page_size: 25 };
    let controls = grc_store::controls::list_for_system(&pool, system.id, page, None, None).await.expect("list controls");
    assert_eq!(controls.items.len(), 1);
    assert_eq!(controls.items[0].control_id, "AC-2");

    let filter = grc_store::statements::StatementFilter { control_id: Some(controls.items[0].id), ..Default::default() };
    let statements = grc_store::statements::list(&pool, &filter, page).await.expect("list statements");
    assert_eq!(statements.items.len(), 1);
    assert_eq!(statements.items[0].remote_content, "The organization manages information system accounts.");

    drop(handle);
}
