#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// `push.cancel`/`push.status` on an unknown job id.
    JobNotFound,
    /// `push.start` with an empty `statement_ids` (§4.7 precondition).
    NoStatementsSelected,
    /// One of the requested `statement_ids` has no local row.
    NotFound(uuid::Uuid),
    /// A requested statement has `is_modified = false` — nothing to push.
    StatementNotModified(uuid::Uuid),
    /// A requested statement is in `conflict` and must be resolved first.
    StatementHasConflict(uuid::Uuid),
    /// `push.start` with no active SOR connection configured.
    NoConnection,
}

impl std::fmt::Display for PushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushError::JobNotFound => write!(f, "push_job_not_found"),
            PushError::NoStatementsSelected => write!(f, "no_statements_selected"),
            PushError::NotFound(id) => write!(f, "not_found: {id}"),
            PushError::StatementNotModified(id) => write!(f, "statement_not_modified: {id}"),
            PushError::StatementHasConflict(id) => write!(f, "statement_has_conflict: {id}"),
            PushError::NoConnection => write!(f, "no_connection"),
        }
    }
}

impl std::error::Error for PushError {}
