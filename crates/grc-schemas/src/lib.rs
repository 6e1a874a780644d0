//! Shared wire and domain enum types for the sync core.
//!
//! Kept dependency-light and free of any DB or HTTP crate so that both
//! `grc-sor-client` (outbound SOR shapes) and `grc-store` (local persistence
//! shapes) can depend on it without pulling in sqlx or reqwest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authentication method recorded on a `Connection` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Basic,
    Oauth,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Basic => write!(f, "basic"),
            AuthMethod::Oauth => write!(f, "oauth"),
        }
    }
}

/// Outcome of the most recent `connection.testConnection()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Success,
    Failure,
    Pending,
    #[default]
    Unknown,
}

/// Statement sync state — see `grc-lifecycle` for the transition rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    New,
    Synced,
    Modified,
    Conflict,
}

impl SyncStatus {
    /// `is_modified ⇔ sync_status ∈ {modified, conflict}` (invariant 2, §8).
    pub fn implies_modified(self) -> bool {
        matches!(self, SyncStatus::Modified | SyncStatus::Conflict)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStatus::New => "new",
            SyncStatus::Synced => "synced",
            SyncStatus::Modified => "modified",
            SyncStatus::Conflict => "conflict",
        };
        write!(f, "{s}")
    }
}

/// Shared terminal/non-terminal status domain for `PullJob` and `PushJob`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Caller-supplied choice for `statements.resolveConflict`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "choice", rename_all = "snake_case")]
pub enum ConflictResolution {
    KeepLocal,
    KeepRemote,
    Merge { text: String },
}

// ---------------------------------------------------------------------------
// SOR wire shapes (§6 record field mapping)
// ---------------------------------------------------------------------------

/// One row of the SOR's `system`-shaped table, as returned by
/// `GET .../api/now/table/{table}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SorSystem {
    pub sys_id: String,
    pub name: String,
    pub short_description: Option<String>,
    pub number: Option<String>,
    pub owner: Option<String>,
    pub status: Option<String>,
    pub sys_updated_on: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SorControl {
    pub sys_id: String,
    pub control_id: String,
    pub control_name: String,
    pub control_family: Option<String>,
    pub description: Option<String>,
    pub implementation_status: Option<String>,
    pub responsible_role: Option<String>,
    pub sys_updated_on: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SorStatement {
    pub sys_id: String,
    pub statement_type: Option<String>,
    pub content: String,
    pub sys_updated_on: Option<String>,
}

/// Response shape of the lightweight discovery endpoint used by
/// `connection.testConnection()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SorInstanceInfo {
    pub version: String,
    pub build_tag: String,
}

/// Response shape of `PUT .../api/now/table/{table}/{sys_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SorUpdateResult {
    pub sys_id: String,
    pub sys_updated_on: String,
}

/// One page of results from an offset/limit paginated SOR fetch.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: Option<u64>,
}

impl<T> Page<T> {
    /// A page is "last" when it returned fewer rows than the requested limit.
    pub fn is_last(&self, requested_limit: usize) -> bool {
        self.items.len() < requested_limit
    }
}

/// Parse a SOR `"YYYY-MM-DD HH:MM:SS"` timestamp into a UTC instant.
///
/// Malformed timestamps are silently dropped (§4.6 "Date parsing") — callers
/// get `None` rather than an error, so a single bad row never fails the pull.
pub fn parse_sor_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Opaque 128-bit identifier used throughout the data model.
pub type Id = Uuid;
