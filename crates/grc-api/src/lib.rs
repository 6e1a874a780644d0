//! External API Layer (C9) — the thin command surface an outer transport
//! (CLI, HTTP handler, …) drives. Every method here is a one-line dispatch
//! to the component that actually owns the behavior; this crate adds no
//! logic of its own beyond wiring and the synchronous audit write every
//! mutating call makes on its way out.

use chrono::{DateTime, Utc};
use grc_audit::{EventStatus, Filter as AuditFilter, NewAuditEvent, Recorder};
use grc_pull::PullEngine;
use grc_push::PushEngine;
use grc_schemas::ConflictResolution;
use grc_sor_client::SorClient;
use grc_store::{PageRequest, StorePage};
use grc_vault::{ConfigInput, Vault, VaultError};
use sqlx::PgPool;
use uuid::Uuid;

/// Constructs every component crate from one Postgres pool and one
/// `grc-config::Settings`, and exposes the verb surface from spec §6.
pub struct GrcApi {
    pool: PgPool,
    vault: Vault,
    pull: PullEngine,
    push: PushEngine,
    audit: Recorder,
}

impl GrcApi {
    pub async fn connect(settings: &grc_config::Settings) -> anyhow::Result<Self> {
        let pool = grc_store::connect_from_env().await?;
        grc_store::migrate(&pool).await?;
        let key = grc_crypto::EncryptionKey::from_base64(&settings.encryption_key_base64()?)?;
        let client_config = grc_sor_client::ClientConfig {
            timeout: settings.sor_timeout,
            max_retries: settings.sor_max_retries,
            page_size: settings.sor_page_size,
        };
        Ok(Self {
            vault: Vault::new(pool.clone(), key, client_config),
            pull: PullEngine::new(pool.clone()),
            push: PushEngine::new(pool.clone()),
            audit: Recorder::new(pool.clone()),
            pool,
        })
    }

    async fn client(&self) -> Result<SorClient, VaultError> {
        self.vault.get_client().await
    }

    // -- connection.* -------------------------------------------------

    pub async fn connection_get_status(&self) -> anyhow::Result<grc_vault::Status> {
        self.vault.get_status().await
    }

    pub async fn connection_save_config(&self, input: ConfigInput) -> Result<grc_store::ConnectionRow, VaultError> {
        let row = self.vault.save_config(input).await?;
        self.audit
            .record(NewAuditEvent::new("connection.configured", "connection", row.id.to_string(), "save_config", EventStatus::Success))
            .await
            .ok();
        Ok(row)
    }

    pub async fn connection_test(&self, connection_id: Uuid) -> Result<grc_sor_client::TestConnectionResult, VaultError> {
        self.vault.test_connection(connection_id).await
    }

    pub async fn connection_delete(&self) -> anyhow::Result<()> {
        self.vault.delete().await
    }

    // -- systems.* ------------------------------------------------------

    pub async fn systems_list(&self, page: PageRequest, search: Option<&str>, status: Option<&str>) -> anyhow::Result<StorePage<grc_store::systems::SystemRow>> {
        grc_store::systems::list(&self.pool, page, search, status).await
    }

    pub async fn systems_get(&self, id: Uuid) -> anyhow::Result<Option<grc_store::systems::SystemRow>> {
        grc_store::systems::get(&self.pool, id).await
    }

    /// `systems.discover()` — SOR-side systems not yet imported locally.
    pub async fn systems_discover(&self) -> Result<Vec<grc_schemas::SorSystem>, VaultError> {
        let client = self.client().await?;
        let known = grc_store::systems::list_sor_ids(&self.pool).await.map_err(|_| VaultError::NotConfigured)?;
        let mut discovered = Vec::new();
        let mut offset = 0u64;
        loop {
            let page = client.fetch_systems(offset, 100).await.map_err(|_| VaultError::NotConfigured)?;
            let is_last = page.is_last(100);
            for s in page.items {
                if !known.contains(&s.sys_id) {
                    discovered.push(s);
                }
            }
            if is_last {
                break;
            }
            offset += 100;
        }
        Ok(discovered)
    }

    /// `systems.import(sor_ids)` — fetches the matching SOR systems and
    /// upserts them locally so `pull.start` can reference them afterward.
    pub async fn systems_import(&self, sor_ids: &[String]) -> Result<Vec<grc_store::systems::SystemRow>, VaultError> {
        let client = self.client().await?;
        let wanted: std::collections::HashSet<&str> = sor_ids.iter().map(String::as_str).collect();
        let mut imported = Vec::new();
        let mut offset = 0u64;
        loop {
            let page = client.fetch_systems(offset, 100).await.map_err(|_| VaultError::NotConfigured)?;
            let is_last = page.is_last(100);
            for s in page.items {
                if !wanted.contains(s.sys_id.as_str()) {
                    continue;
                }
                let row = grc_store::systems::upsert(
                    &self.pool,
                    &grc_store::systems::SystemUpsert {
                        sor_id: s.sys_id,
                        name: s.name,
                        description: s.short_description,
                        owner: s.owner,
                        status: s.status,
                        sor_updated_on: s.sys_updated_on.as_deref().and_then(grc_schemas::parse_sor_timestamp),
                    },
                )
                .await
                .map_err(|_| VaultError::NotConfigured)?;
                self.audit
                    .record(NewAuditEvent::new("system.imported", "system", row.id.to_string(), "import", EventStatus::Success))
                    .await
                    .ok();
                imported.push(row);
            }
            if is_last {
                break;
            }
            offset += 100;
        }
        Ok(imported)
    }

    pub async fn systems_delete(&self, id: Uuid) -> anyhow::Result<()> {
        grc_store::systems::delete(&self.pool, id).await?;
        self.audit
            .record(NewAuditEvent::new("system.deleted", "system", id.to_string(), "delete", EventStatus::Success))
            .await
            .ok();
        Ok(())
    }

    // -- controls.* -------------------------------------------------------

    pub async fn controls_list(&self, system_id: Uuid, page: PageRequest, family: Option<&str>, search: Option<&str>) -> anyhow::Result<StorePage<grc_store::controls::ControlRow>> {
        grc_store::controls::list_for_system(&self.pool, system_id, page, family, search).await
    }

    // -- statements.* -----------------------------------------------------

    pub async fn statements_list(&self, filter: grc_store::statements::StatementFilter, page: PageRequest) -> anyhow::Result<StorePage<grc_store::statements::StatementRow>> {
        grc_store::statements::list(&self.pool, &filter, page).await
    }

    /// `statements.modified()` — statements with local edits pending push.
    pub async fn statements_modified(&self, page: PageRequest) -> anyhow::Result<StorePage<grc_store::statements::StatementRow>> {
        let filter = grc_store::statements::StatementFilter {
            sync_status: Some(grc_schemas::SyncStatus::Modified),
            ..Default::default()
        };
        grc_store::statements::list(&self.pool, &filter, page).await
    }

    /// `statements.conflicts()` — statements needing manual resolution.
    pub async fn statements_conflicts(&self, page: PageRequest) -> anyhow::Result<StorePage<grc_store::statements::StatementRow>> {
        let filter = grc_store::statements::StatementFilter {
            sync_status: Some(grc_schemas::SyncStatus::Conflict),
            ..Default::default()
        };
        grc_store::statements::list(&self.pool, &filter, page).await
    }

    pub async fn statements_update_local(&self, id: Uuid, content: &str, user: Option<&str>) -> anyhow::Result<Result<grc_store::statements::StatementRow, grc_lifecycle::LifecycleError>> {
        let result = grc_store::statements::update_local(&self.pool, id, content, user).await?;
        let status = if result.is_ok() { EventStatus::Success } else { EventStatus::Failure };
        self.audit
            .record(NewAuditEvent::new("statement.edited", "statement", id.to_string(), "update_local", status))
            .await
            .ok();
        Ok(result)
    }

    pub async fn statements_resolve_conflict(&self, id: Uuid, resolution: ConflictResolution, user: Option<&str>) -> anyhow::Result<Result<grc_store::statements::StatementRow, grc_lifecycle::LifecycleError>> {
        let result = grc_store::statements::resolve_conflict(&self.pool, id, resolution, user).await?;
        let status = if result.is_ok() { EventStatus::Success } else { EventStatus::Failure };
        self.audit
            .record(NewAuditEvent::new("statement.conflict_resolved", "statement", id.to_string(), "resolve_conflict", status))
            .await
            .ok();
        Ok(result)
    }

    pub async fn statements_revert_to_remote(&self, id: Uuid) -> anyhow::Result<grc_store::statements::StatementRow> {
        let row = grc_store::statements::revert_to_remote(&self.pool, id).await?;
        self.audit
            .record(NewAuditEvent::new("statement.reverted", "statement", id.to_string(), "revert_to_remote", EventStatus::Success))
            .await
            .ok();
        Ok(row)
    }

    // -- pull.* -------------------------------------------------------------

    pub async fn pull_start(&self, system_ids: Vec<Uuid>, created_by: Option<String>) -> Result<Uuid, grc_pull::PullError> {
        let client = self.client().await.map_err(|_| grc_pull::PullError::ConcurrentJob)?;
        self.pull.start(client, system_ids, created_by).await
    }

    pub async fn pull_status(&self, job_id: Uuid) -> anyhow::Result<Option<grc_pull::PullProgressSnapshot>> {
        self.pull.status(job_id).await
    }

    pub async fn pull_cancel(&self, job_id: Uuid) -> Result<bool, grc_pull::PullError> {
        self.pull.cancel(job_id).await
    }

    // -- push.* ---------------------------------------------------------

    pub async fn push_start(&self, statement_ids: Vec<Uuid>, concurrency: usize) -> Result<Uuid, grc_push::PushError> {
        let client = self.client().await.map_err(|_| grc_push::PushError::NoConnection)?;
        self.push.start(client, statement_ids, concurrency).await
    }

    pub async fn push_status(&self, job_id: Uuid) -> Result<grc_push::PushJobSnapshot, grc_push::PushError> {
        self.push.status(job_id).await
    }

    pub async fn push_cancel(&self, job_id: Uuid) -> Result<(), grc_push::PushError> {
        self.push.cancel(job_id).await
    }

    // -- audit.* ----------------------------------------------------------

    pub async fn audit_query(&self, filter: &AuditFilter) -> anyhow::Result<(Vec<grc_audit::AuditEventRow>, i64)> {
        grc_audit::query(&self.pool, filter).await
    }

    pub async fn audit_get(&self, id: Uuid) -> anyhow::Result<Option<grc_audit::AuditEventRow>> {
        grc_audit::get(&self.pool, id).await
    }

    pub async fn audit_stats(&self) -> anyhow::Result<grc_audit::AuditStats> {
        grc_audit::stats(&self.pool).await
    }

    pub async fn audit_export_csv(&self, filter: &AuditFilter) -> anyhow::Result<Vec<u8>> {
        grc_audit::to_csv(&self.pool, filter).await
    }

    pub async fn audit_export_pdf(&self, filter: &AuditFilter) -> anyhow::Result<Vec<u8>> {
        grc_audit::to_pdf(&self.pool, filter).await
    }
}

/// Re-exported so callers (the CLI) can build filters without depending on
/// `grc-audit` directly for this one type.
pub type AuditDateRange = (Option<DateTime<Utc>>, Option<DateTime<Utc>>);
