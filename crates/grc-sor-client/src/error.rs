//! SOR client error taxonomy (§4.2, §7).

/// Errors a SOR HTTP call can fail with.
#[derive(Debug, Clone)]
pub enum SorError {
    /// 401/403 — credentials rejected. Never retried.
    AuthFailed,
    /// 404 — the requested record doesn't exist. Never retried.
    NotFound,
    /// 409 — the SOR rejected a write due to a conflicting update. Never retried.
    Conflict,
    /// 429 — rate limited; `retry_after_secs` is parsed from `Retry-After` when present.
    RateLimited { retry_after_secs: Option<u64> },
    /// The per-attempt deadline elapsed.
    Timeout,
    /// A transport-level failure (connection refused, DNS, TLS, or a 5xx
    /// response body we don't otherwise classify).
    Transport(String),
    /// The response body could not be decoded into the expected shape.
    Decode(String),
}

impl SorError {
    /// Idempotent GETs retry on these (§4.2): transport errors, 5xx, 429.
    pub fn is_retryable_for_get(&self) -> bool {
        matches!(
            self,
            SorError::RateLimited { .. } | SorError::Timeout | SorError::Transport(_)
        )
    }

    /// Stable machine code surfaced to callers (§7).
    pub fn code(&self) -> &'static str {
        match self {
            SorError::AuthFailed => "sor_auth_failed",
            SorError::NotFound => "sor_not_found",
            SorError::Conflict => "sor_conflict",
            SorError::RateLimited { .. } => "sor_rate_limited",
            SorError::Timeout => "sor_timeout",
            SorError::Transport(_) => "sor_transport",
            SorError::Decode(_) => "sor_decode",
        }
    }
}

impl std::fmt::Display for SorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SorError::AuthFailed => write!(f, "SOR authentication failed"),
            SorError::NotFound => write!(f, "SOR record not found"),
            SorError::Conflict => write!(f, "SOR rejected the write (409 conflict)"),
            SorError::RateLimited { retry_after_secs } => {
                write!(f, "SOR rate limited (retry_after={retry_after_secs:?}s)")
            }
            SorError::Timeout => write!(f, "SOR request timed out"),
            SorError::Transport(msg) => write!(f, "SOR transport error: {msg}"),
            SorError::Decode(msg) => write!(f, "SOR response decode error: {msg}"),
        }
    }
}

impl std::error::Error for SorError {}

pub(crate) fn classify_status(status: reqwest::StatusCode, retry_after_secs: Option<u64>) -> Option<SorError> {
    if status.is_success() {
        return None;
    }
    Some(match status.as_u16() {
        401 | 403 => SorError::AuthFailed,
        404 => SorError::NotFound,
        409 => SorError::Conflict,
        429 => SorError::RateLimited { retry_after_secs },
        500..=599 => SorError::Transport(format!("HTTP {status}")),
        other => SorError::Transport(format!("HTTP {other}")),
    })
}
