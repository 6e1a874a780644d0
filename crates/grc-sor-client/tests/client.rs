//! End-to-end tests against a local mock SOR instance.

use grc_sor_client::{AuthConfig, ClientConfig, SorClient};
use httpmock::MockServer;
use httpmock::Method::{GET, PUT};
use serde_json::json;
use std::time::Duration;

fn basic_client(server: &MockServer) -> SorClient {
    SorClient::new(
        server.base_url(),
        AuthConfig::Basic {
            username: "svc".into(),
            password: "secret".into(),
        },
        ClientConfig {
            timeout: Duration::from_secs(5),
            max_retries: 2,
            page_size: 100,
        },
    )
    .expect("client construction should not fail against a well-formed URL")
}

#[tokio::test]
async fn test_connection_returns_version_and_build_tag() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/api/now/table/sys_properties");
        then.status(200)
            .json_body(json!({ "version": "utah.2", "build_tag": "glide-utah-12-07" }));
    });

    let client = basic_client(&server);
    let result = client.test_connection().await.expect("test_connection should succeed");

    mock.assert();
    assert_eq!(result.version, "utah.2");
    assert_eq!(result.build_tag, "glide-utah-12-07");
}

#[tokio::test]
async fn test_connection_maps_401_to_auth_failed() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/now/table/sys_properties");
        then.status(401);
    });

    let client = basic_client(&server);
    let err = client.test_connection().await.expect_err("401 must surface as an error");
    assert_eq!(err.code(), "sor_auth_failed");
}

#[tokio::test]
async fn fetch_systems_paginates_with_offset_and_limit() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/now/table/cmdb_ci_service")
            .query_param("sysparm_offset", "50")
            .query_param("sysparm_limit", "25");
        then.status(200)
            .header("X-Total-Count", "120")
            .json_body(json!({ "result": [
                { "sys_id": "sys-1", "name": "Billing", "description": null },
            ] }));
    });

    let client = basic_client(&server);
    let page = client.fetch_systems(50, 25).await.expect("fetch_systems should succeed");

    mock.assert();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.total_count, Some(120));
}

#[tokio::test]
async fn fetch_controls_filters_by_parent_system() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/now/table/sn_compliance_control")
            .query_param("sysparm_query", "parent_system=sys-1");
        then.status(200).json_body(json!({ "result": [] }));
    });

    let client = basic_client(&server);
    let page = client.fetch_controls("sys-1", 0, 100).await.expect("fetch_controls should succeed");

    mock.assert();
    assert!(page.items.is_empty());
}

#[tokio::test]
async fn update_statement_is_not_retried_on_server_error() {
    let server = MockServer::start();
    // only ONE mock hit is expected: a retry would assert-fail via .assert_hits(1)
    let mock = server.mock(|when, then| {
        when.method(PUT).path("/api/now/table/sn_compliance_statement/stmt-1");
        then.status(500);
    });

    let client = basic_client(&server);
    let err = client
        .update_statement("stmt-1", "new content")
        .await
        .expect_err("500 on write must surface as an error");

    mock.assert_hits(1);
    assert_eq!(err.code(), "sor_transport");
}

#[tokio::test]
async fn get_retries_on_429_then_succeeds() {
    let server = MockServer::start();
    let failing = server.mock(|when, then| {
        when.method(GET).path("/api/now/table/cmdb_ci_service");
        then.status(429).header("Retry-After", "0");
    });

    let client = basic_client(&server);
    // with only a failing mock installed, the retry loop exhausts max_retries and errors
    let err = client.fetch_systems(0, 100).await.expect_err("all attempts 429 should surface as rate limited");
    assert_eq!(err.code(), "sor_rate_limited");
    assert!(failing.hits() >= 1);
}
