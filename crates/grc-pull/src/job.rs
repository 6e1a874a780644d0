use crate::PullError;
use grc_audit::{EventStatus, NewAuditEvent, Recorder};
use grc_schemas::{parse_sor_timestamp, JobStatus};
use grc_sor_client::SorClient;
use grc_store::pull_jobs::ProgressUpdate;
use serde_json::json;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

const SOR_PAGE_SIZE: usize = 100;

/// A point-in-time read of `pull_jobs`, returned by `pull.status`.
pub type PullProgressSnapshot = grc_store::pull_jobs::PullJobRow;

/// Owns the cancellation-flag registry for in-flight pull jobs. One instance
/// is shared (via `Arc`) across the API layer's lifetime; each `start` call
/// spawns a detached worker tracked here until it finishes.
#[derive(Clone)]
pub struct PullEngine {
    pool: PgPool,
    cancel_flags: Arc<Mutex<HashMap<Uuid, Arc<AtomicBool>>>>,
}

impl PullEngine {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cancel_flags: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// `pull.start(system_ids)` — enforces single-flight, persists the job
    /// `running` immediately, and spawns the worker. Returns the job id as
    /// soon as the job row exists; progress is tracked via `pull.status`.
    pub async fn start(&self, client: SorClient, system_ids: Vec<Uuid>, created_by: Option<String>) -> Result<Uuid, PullError> {
        if system_ids.is_empty() {
            return Err(PullError::InvalidInput);
        }

        if grc_store::pull_jobs::has_active(&self.pool).await.map_err(|_| PullError::ConcurrentJob)? {
            return Err(PullError::ConcurrentJob);
        }

        for id in &system_ids {
            if grc_store::systems::get(&self.pool, *id).await.map_err(|_| PullError::UnknownSystem(*id))?.is_none() {
                return Err(PullError::UnknownSystem(*id));
            }
        }

        let job = grc_store::pull_jobs::insert(&self.pool, &system_ids, created_by.as_deref())
            .await
            .map_err(|_| PullError::ConcurrentJob)?;

        let flag = Arc::new(AtomicBool::new(false));
        self.cancel_flags.lock().await.insert(job.id, flag.clone());

        let pool = self.pool.clone();
        let flags = self.cancel_flags.clone();
        let job_id = job.id;
        let recorder = Recorder::new(pool.clone());

        recorder
            .record(NewAuditEvent::new("pull.started", "pull_job", job_id.to_string(), "start", EventStatus::Success).with_details(json!({"system_count": system_ids.len()})))
            .await
            .ok();

        tokio::spawn(async move {
            let outcome = run_job(&pool, &client, job_id, &system_ids, flag.clone()).await;
            flags.lock().await.remove(&job_id);

            let (status, detail) = match outcome {
                Ok(JobOutcome::Completed) => (JobStatus::Completed, json!({})),
                Ok(JobOutcome::Cancelled) => (JobStatus::Cancelled, json!({})),
                Ok(JobOutcome::Failed(ref msg)) => (JobStatus::Failed, json!({"error": msg})),
                Err(ref e) => (JobStatus::Failed, json!({"error": e.to_string()})),
            };
            let error_msg = match &outcome {
                Ok(JobOutcome::Failed(msg)) => Some(msg.clone()),
                Err(e) => Some(e.to_string()),
                _ => None,
            };
            if let Err(e) = grc_store::pull_jobs::finish(&pool, job_id, status, error_msg.as_deref()).await {
                warn!(job_id = %job_id, error = %e, "failed to finalize pull job");
            }
            let event_status = if status == JobStatus::Completed { EventStatus::Success } else { EventStatus::Failure };
            recorder
                .record(NewAuditEvent::new("pull.completed", "pull_job", job_id.to_string(), "finish", event_status).with_details(detail))
                .await
                .ok();
            info!(job_id = %job_id, ?status, "pull job finished");
        });

        Ok(job_id)
    }

    pub async fn status(&self, job_id: Uuid) -> anyhow::Result<Option<PullProgressSnapshot>> {
        grc_store::pull_jobs::get(&self.pool, job_id).await
    }

    /// `pull.cancel` — cooperative: sets the flag the worker checks between
    /// units of work and flips the DB row if it's still pending/running.
    /// In-flight HTTP calls to the SOR run to completion (§9).
    pub async fn cancel(&self, job_id: Uuid) -> Result<bool, PullError> {
        if let Some(flag) = self.cancel_flags.lock().await.get(&job_id) {
            flag.store(true, Ordering::SeqCst);
        }
        grc_store::pull_jobs::cancel(&self.pool, job_id).await.map_err(|_| PullError::JobNotFound)
    }
}

enum JobOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

async fn run_job(pool: &PgPool, client: &SorClient, job_id: Uuid, system_ids: &[Uuid], cancel: Arc<AtomicBool>) -> anyhow::Result<JobOutcome> {
    let mut completed_systems = 0i32;
    let mut total_controls = 0i32;
    let mut completed_controls = 0i32;
    let mut total_statements = 0i32;
    let mut completed_statements = 0i32;
    let mut had_error = false;

    for system_id in system_ids {
        if cancel.load(Ordering::SeqCst) {
            return Ok(JobOutcome::Cancelled);
        }

        let system = match grc_store::systems::get(pool, *system_id).await? {
            Some(s) => s,
            None => {
                grc_store::pull_jobs::append_error(pool, job_id, &format!("system {system_id} no longer exists")).await.ok();
                had_error = true;
                continue;
            }
        };

        grc_store::pull_jobs::update_progress(
            pool,
            job_id,
            &ProgressUpdate {
                current_system: Some(system.name.clone()),
                ..Default::default()
            },
        )
        .await
        .ok();

        match pull_one_system(pool, client, job_id, system.id, &system.sor_id, &cancel).await {
            Ok(counts) => {
                total_controls += counts.total_controls;
                completed_controls += counts.completed_controls;
                total_statements += counts.total_statements;
                completed_statements += counts.completed_statements;
            }
            Err(e) => {
                warn!(system_id = %system.id, error = %e, "pull failed for system");
                grc_store::pull_jobs::append_error(pool, job_id, &format!("system {}: {e}", system.sor_id)).await.ok();
                had_error = true;
            }
        }

        grc_store::systems::touch_last_pull(pool, system.id).await.ok();
        completed_systems += 1;
        grc_store::pull_jobs::update_progress(
            pool,
            job_id,
            &ProgressUpdate {
                completed_systems: Some(completed_systems),
                total_controls: Some(total_controls),
                completed_controls: Some(completed_controls),
                total_statements: Some(total_statements),
                completed_statements: Some(completed_statements),
                ..Default::default()
            },
        )
        .await
        .ok();

        if cancel.load(Ordering::SeqCst) {
            return Ok(JobOutcome::Cancelled);
        }
    }

    if completed_systems == 0 && had_error {
        Ok(JobOutcome::Failed("no systems pulled successfully".to_string()))
    } else {
        Ok(JobOutcome::Completed)
    }
}

struct SystemCounts {
    total_controls: i32,
    completed_controls: i32,
    total_statements: i32,
    completed_statements: i32,
}

async fn pull_one_system(pool: &PgPool, client: &SorClient, job_id: Uuid, system_id: Uuid, system_sor_id: &str, cancel: &Arc<AtomicBool>) -> anyhow::Result<SystemCounts> {
    let mut counts = SystemCounts {
        total_controls: 0,
        completed_controls: 0,
        total_statements: 0,
        completed_statements: 0,
    };

    let mut offset = 0u64;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return Ok(counts);
        }
        let page = client.fetch_controls(system_sor_id, offset, SOR_PAGE_SIZE).await?;
        counts.total_controls += page.items.len() as i32;

        for sor_control in &page.items {
            let control = grc_store::controls::upsert(
                pool,
                &grc_store::controls::ControlUpsert {
                    system_id,
                    sor_id: sor_control.sys_id.clone(),
                    control_id: sor_control.control_id.clone(),
                    control_name: sor_control.control_name.clone(),
                    control_family: sor_control.control_family.clone(),
                    description: sor_control.description.clone(),
                    responsible_role: sor_control.responsible_role.clone(),
                    sor_updated_on: sor_control.sys_updated_on.as_deref().and_then(parse_sor_timestamp),
                },
            )
            .await?;
            counts.completed_controls += 1;

            let (total, completed) = pull_statements_for_control(pool, client, &control.sor_id, control.id, job_id, cancel).await?;
            counts.total_statements += total;
            counts.completed_statements += completed;

            if cancel.load(Ordering::SeqCst) {
                return Ok(counts);
            }
        }

        if page.is_last(SOR_PAGE_SIZE) {
            break;
        }
        offset += SOR_PAGE_SIZE as u64;
    }

    Ok(counts)
}

async fn pull_statements_for_control(pool: &PgPool, client: &SorClient, control_sor_id: &str, control_id: Uuid, job_id: Uuid, cancel: &Arc<AtomicBool>) -> anyhow::Result<(i32, i32)> {
    let mut total = 0i32;
    let mut completed = 0i32;
    let mut offset = 0u64;

    loop {
        if cancel.load(Ordering::SeqCst) {
            return Ok((total, completed));
        }
        let page = client.fetch_statements(control_sor_id, offset, SOR_PAGE_SIZE).await?;
        total += page.items.len() as i32;

        for sor_stmt in &page.items {
            let statement_type = sor_stmt.statement_type.clone().unwrap_or_else(|| "implementation".to_string());
            let sor_updated_on = sor_stmt.sys_updated_on.as_deref().and_then(parse_sor_timestamp);
            match grc_store::statements::upsert_from_pull(pool, control_id, &sor_stmt.sys_id, &statement_type, &sor_stmt.content, sor_updated_on).await {
                Ok((_, outcome)) => {
                    if matches!(outcome, grc_lifecycle::PullOutcome::ConflictDetected) {
                        grc_store::pull_jobs::append_error(pool, job_id, &format!("conflict detected on statement {}", sor_stmt.sys_id)).await.ok();
                    }
                }
                Err(e) => {
                    grc_store::pull_jobs::append_error(pool, job_id, &format!("statement {}: {e}", sor_stmt.sys_id)).await.ok();
                }
            }
            completed += 1;
        }

        if page.is_last(SOR_PAGE_SIZE) {
            break;
        }
        offset += SOR_PAGE_SIZE as u64;
    }

    Ok((total, completed))
}
