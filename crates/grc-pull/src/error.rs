#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullError {
    /// `pull.start` with an empty `system_ids` (§4.6 precondition).
    InvalidInput,
    /// `pull.start` while another pull is `pending`/`running` (§3 single-flight).
    ConcurrentJob,
    /// `pull.cancel`/`pull.status` on an unknown job id.
    JobNotFound,
    /// One of the requested `system_ids` has no local row.
    UnknownSystem(uuid::Uuid),
}

impl std::fmt::Display for PullError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PullError::InvalidInput => write!(f, "invalid_input"),
            PullError::ConcurrentJob => write!(f, "pull_job_already_running"),
            PullError::JobNotFound => write!(f, "pull_job_not_found"),
            PullError::UnknownSystem(id) => write!(f, "unknown_system: {id}"),
        }
    }
}

impl std::error::Error for PullError {}
