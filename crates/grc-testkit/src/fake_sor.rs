use axum::extract::{Path, Query, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use grc_schemas::{SorControl, SorStatement, SorSystem};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-memory fixture data the fake server serves back as ServiceNow-shaped
/// table pages.
#[derive(Default, Clone)]
pub struct FakeSor {
    pub systems: Vec<SorSystem>,
    pub controls: Vec<SorControl>,
    pub statements: Vec<SorStatement>,
}

struct SharedState {
    data: Mutex<FakeSor>,
}

/// A running fake SOR instance. Drop the handle (or let it go out of
/// scope) to stop serving — the underlying task is aborted.
pub struct FakeSorHandle {
    pub base_url: String,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for FakeSorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FakeSor {
    /// Bind an ephemeral local port and start serving `cmdb_ci_service`,
    /// `sn_compliance_control`, `sn_compliance_statement`, and
    /// `sys_properties` the way `grc-sor-client` expects.
    pub async fn spawn(self) -> FakeSorHandle {
        let state = Arc::new(SharedState { data: Mutex::new(self) });

        let app = Router::new()
            .route("/api/now/table/sys_properties", get(get_sys_properties))
            .route("/api/now/table/cmdb_ci_service", get(get_systems))
            .route("/api/now/table/sn_compliance_control", get(get_controls))
            .route("/api/now/table/sn_compliance_statement", get(get_statements))
            .route("/api/now/table/sn_compliance_statement/:sys_id", put(put_statement))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind fake SOR listener");
        let addr = listener.local_addr().expect("local addr");
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        FakeSorHandle {
            base_url: format!("http://{addr}"),
            task,
        }
    }
}

async fn get_sys_properties() -> Json<Value> {
    Json(json!({"version": "Utah", "build_tag": "glide-utah-12-05"}))
}

fn paginate<T: Clone>(items: &[T], offset: usize, limit: usize) -> Vec<T> {
    items.iter().skip(offset).take(limit).cloned().collect()
}

fn parse_paging(params: &HashMap<String, String>) -> (usize, usize) {
    let offset = params.get("sysparm_offset").and_then(|v| v.parse().ok()).unwrap_or(0);
    let limit = params.get("sysparm_limit").and_then(|v| v.parse().ok()).unwrap_or(100);
    (offset, limit)
}

async fn get_systems(State(state): State<Arc<SharedState>>, Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let (offset, limit) = parse_paging(&params);
    let data = state.data.lock().unwrap();
    Json(json!({ "result": paginate(&data.systems, offset, limit) }))
}

async fn get_controls(State(state): State<Arc<SharedState>>, Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    // The fixture doesn't model per-system ownership, so `sysparm_query`'s
    // `parent_system=...` filter is accepted but not applied; callers that
    // need per-system isolation should seed distinct `FakeSor` instances.
    let (offset, limit) = parse_paging(&params);
    let data = state.data.lock().unwrap();
    Json(json!({ "result": paginate(&data.controls, offset, limit) }))
}

async fn get_statements(State(state): State<Arc<SharedState>>, Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let (offset, limit) = parse_paging(&params);
    let data = state.data.lock().unwrap();
    Json(json!({ "result": paginate(&data.statements, offset, limit) }))
}

async fn put_statement(State(_state): State<Arc<SharedState>>, Path(sys_id): Path<String>, Json(_body): Json<Value>) -> Json<Value> {
    Json(json!({ "result": { "sys_id": sys_id, "sys_updated_on": "2026-01-01 00:00:00" } }))
}
