use crate::PushError;
use grc_audit::{EventStatus, NewAuditEvent, Recorder};
use grc_schemas::{JobStatus, SyncStatus};
use grc_sor_client::SorClient;
use serde_json::json;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementOutcome {
    Success,
    NotFound,
    StatementNotModified,
    StatementHasConflict,
    SorError(String),
    /// Cancellation was observed before this statement's worker started;
    /// in-flight SOR calls already underway are left to finish (§9).
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct PushResult {
    pub statement_id: Uuid,
    pub outcome: StatementOutcome,
}

#[derive(Debug, Clone)]
pub struct PushJobSnapshot {
    pub id: Uuid,
    pub status: JobStatus,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<PushResult>,
}

struct JobState {
    snapshot: PushJobSnapshot,
    cancel: Arc<AtomicBool>,
}

/// Bounded-concurrency pusher. Push jobs are tracked in memory only — there
/// is no `push_jobs` table (§9).
#[derive(Clone)]
pub struct PushEngine {
    pool: PgPool,
    jobs: Arc<Mutex<HashMap<Uuid, Arc<Mutex<JobState>>>>>,
}

impl PushEngine {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// `push.start(statement_ids, concurrency)`. `concurrency` defaults to
    /// 5 (§6 `push.concurrency`) if zero is passed.
    ///
    /// Preconditions (§4.7, §8 scenario 6) are checked synchronously before
    /// any job is created or any `statement.pushed` audit event is
    /// recorded: every id must exist, be `is_modified`, and not be in
    /// `conflict`.
    pub async fn start(&self, client: SorClient, statement_ids: Vec<Uuid>, concurrency: usize) -> Result<Uuid, PushError> {
        if statement_ids.is_empty() {
            return Err(PushError::NoStatementsSelected);
        }

        let rows = grc_store::statements::get_many(&self.pool, &statement_ids)
            .await
            .map_err(|_| PushError::NotFound(statement_ids[0]))?;
        let by_id: HashMap<Uuid, grc_store::statements::StatementRow> = rows.into_iter().map(|r| (r.id, r)).collect();
        for id in &statement_ids {
            match by_id.get(id) {
                None => return Err(PushError::NotFound(*id)),
                Some(row) if row.sync_status == SyncStatus::Conflict => return Err(PushError::StatementHasConflict(*id)),
                Some(row) if !row.is_modified => return Err(PushError::StatementNotModified(*id)),
                Some(_) => {}
            }
        }

        let job_id = Uuid::new_v4();
        let concurrency = if concurrency == 0 { 5 } else { concurrency };
        let cancel = Arc::new(AtomicBool::new(false));

        let state = Arc::new(Mutex::new(JobState {
            snapshot: PushJobSnapshot {
                id: job_id,
                status: JobStatus::Running,
                total: statement_ids.len(),
                succeeded: 0,
                failed: 0,
                results: Vec::new(),
            },
            cancel: cancel.clone(),
        }));
        self.jobs.lock().await.insert(job_id, state.clone());

        let pool = self.pool.clone();
        let client = Arc::new(client);
        let recorder = Recorder::new(pool.clone());

        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(concurrency));
            let attempted = Arc::new(AtomicUsize::new(0));
            let mut handles = Vec::with_capacity(statement_ids.len());

            for statement_id in statement_ids {
                let permit_sem = semaphore.clone();
                let pool = pool.clone();
                let client = client.clone();
                let cancel = cancel.clone();
                let state = state.clone();
                let attempted = attempted.clone();
                let recorder = recorder.clone();

                handles.push(tokio::spawn(async move {
                    if cancel.load(Ordering::SeqCst) {
                        record_result(&state, PushResult {
                            statement_id,
                            outcome: StatementOutcome::Cancelled,
                        })
                        .await;
                        return;
                    }

                    let _permit = permit_sem.acquire().await.expect("semaphore never closed");
                    attempted.fetch_add(1, Ordering::SeqCst);

                    let outcome = push_one(&pool, &client, statement_id).await;
                    let event_status = if outcome == StatementOutcome::Success { EventStatus::Success } else { EventStatus::Failure };
                    recorder
                        .record(
                            NewAuditEvent::new("statement.pushed", "statement", statement_id.to_string(), "push", event_status)
                                .with_details(json!({"outcome": format!("{outcome:?}")})),
                        )
                        .await
                        .ok();
                    record_result(&state, PushResult { statement_id, outcome }).await;
                }));
            }

            for h in handles {
                h.await.ok();
            }

            let mut guard = state.lock().await;
            let total = guard.snapshot.total;
            let attempted_count = attempted.load(Ordering::SeqCst);
            guard.snapshot.status = if attempted_count < total && cancel.load(Ordering::SeqCst) {
                JobStatus::Cancelled
            } else if guard.snapshot.succeeded > 0 || guard.snapshot.failed == 0 {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            };
        });

        Ok(job_id)
    }

    pub async fn status(&self, job_id: Uuid) -> Result<PushJobSnapshot, PushError> {
        let jobs = self.jobs.lock().await;
        let state = jobs.get(&job_id).ok_or(PushError::JobNotFound)?;
        Ok(state.lock().await.snapshot.clone())
    }

    /// Cooperative cancellation: workers that haven't started yet skip their
    /// SOR call; workers already mid-request run to completion (§9).
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), PushError> {
        let jobs = self.jobs.lock().await;
        let state = jobs.get(&job_id).ok_or(PushError::JobNotFound)?;
        state.lock().await.cancel.store(true, Ordering::SeqCst);
        Ok(())
    }
}

async fn record_result(state: &Arc<Mutex<JobState>>, result: PushResult) {
    let mut guard = state.lock().await;
    match &result.outcome {
        StatementOutcome::Success => guard.snapshot.succeeded += 1,
        _ => guard.snapshot.failed += 1,
    }
    guard.snapshot.results.push(result);
}

/// Per-statement precondition check (§4.7) followed by the SOR write and
/// `markSynced` on success.
async fn push_one(pool: &PgPool, client: &SorClient, statement_id: Uuid) -> StatementOutcome {
    let Some(statement) = (match grc_store::statements::get(pool, statement_id).await {
        Ok(s) => s,
        Err(e) => {
            warn!(statement_id = %statement_id, error = %e, "failed to load statement for push");
            return StatementOutcome::SorError(e.to_string());
        }
    }) else {
        return StatementOutcome::NotFound;
    };

    if statement.sync_status == SyncStatus::Conflict {
        return StatementOutcome::StatementHasConflict;
    }
    if !statement.is_modified {
        return StatementOutcome::StatementNotModified;
    }

    if let Err(e) = client.update_statement(&statement.sor_id, statement.effective_content()).await {
        return StatementOutcome::SorError(e.to_string());
    }

    match grc_store::statements::mark_pushed(pool, statement_id).await {
        Ok(Ok(_)) => StatementOutcome::Success,
        Ok(Err(e)) => StatementOutcome::SorError(e.to_string()),
        Err(e) => StatementOutcome::SorError(e.to_string()),
    }
}
