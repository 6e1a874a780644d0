//! Statement lifecycle state machine (C8).
//!
//! Deterministic, pure logic. No IO, no wall-clock, no database. Mirrors the
//! shape of an OMS order state machine: every caller-visible mutation goes
//! through an explicit method that either applies a legal transition or
//! returns a typed [`LifecycleError`] callers must handle (never a silent
//! no-op except where the transition table says so).
//!
//! # Invariants held at rest (enforced by construction, checked in tests)
//!
//! 1. `is_modified ⇔ sync_status ∈ {modified, conflict}`.
//! 2. `sync_status == synced ⇒ local_content` is empty or equals
//!    `remote_content`.

use grc_schemas::{ConflictResolution, SyncStatus};

// ---------------------------------------------------------------------------
// LifecycleError
// ---------------------------------------------------------------------------

/// Returned when a caller attempts an illegal transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// `updateLocal` was called on a statement currently in `conflict`;
    /// callers must resolve the conflict first.
    EditBlockedByConflict,
    /// `resolveConflict` was called on a statement not in `conflict`.
    NotInConflict,
    /// `resolveConflict(merge(""))` — merge text must be non-empty.
    EmptyMergeText,
    /// A push was attempted against a statement in `conflict`.
    StatementHasConflict,
    /// A push was attempted against a statement that is not `is_modified`.
    StatementNotModified,
}

impl std::fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleError::EditBlockedByConflict => {
                write!(f, "statement_edit_blocked: resolve the conflict before editing")
            }
            LifecycleError::NotInConflict => write!(f, "statement_not_in_conflict"),
            LifecycleError::EmptyMergeText => write!(f, "merge_text_empty"),
            LifecycleError::StatementHasConflict => write!(f, "statement_has_conflict"),
            LifecycleError::StatementNotModified => write!(f, "statement_not_modified"),
        }
    }
}

impl std::error::Error for LifecycleError {}

/// What happened when a pull observed a statement that already existed
/// locally. Callers (the pull engine) use this to decide whether to append
/// to `progress.errors`-adjacent conflict bookkeeping and what to audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Remote content was unchanged; local state did not change.
    Unchanged,
    /// Remote content changed and was applied (statement stayed `synced`).
    Updated,
    /// Remote content changed while a local edit was outstanding; the
    /// statement transitioned to `conflict`.
    ConflictDetected,
}

// ---------------------------------------------------------------------------
// StatementState
// ---------------------------------------------------------------------------

/// The lifecycle-relevant subset of a `Statement` row. `grc-store` embeds
/// this (or reconstructs it from row columns) to drive transitions; it owns
/// no identifiers, timestamps, or foreign keys — those live in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementState {
    pub remote_content: String,
    pub local_content: String,
    pub is_modified: bool,
    pub sync_status: SyncStatus,
}

impl StatementState {
    /// The state a statement is created in the first time a pull observes
    /// it — `(absent) → pull observes record → synced` (§4.4).
    pub fn new_synced(remote_content: impl Into<String>) -> Self {
        Self {
            remote_content: remote_content.into(),
            local_content: String::new(),
            is_modified: false,
            sync_status: SyncStatus::Synced,
        }
    }

    /// The effective content exposed to editors and pushed on publish:
    /// `local_content` if modified, else `remote_content`.
    pub fn effective_content(&self) -> &str {
        if self.is_modified {
            &self.local_content
        } else {
            &self.remote_content
        }
    }

    /// `statements.updateLocal` — author writes new content to the overlay.
    ///
    /// From `conflict`, editing is blocked until the conflict is resolved.
    /// From `synced`, an empty overlay is a no-op (no dirty overlay to
    /// record). From `modified`, the overlay is replaced unconditionally —
    /// even if it now equals `remote_content`, the statement stays
    /// `modified` ("dirty overlay = stored overlay", §9).
    pub fn edit_local(&mut self, content: impl Into<String>) -> Result<(), LifecycleError> {
        if self.sync_status == SyncStatus::Conflict {
            return Err(LifecycleError::EditBlockedByConflict);
        }
        let content = content.into();
        match self.sync_status {
            SyncStatus::Synced | SyncStatus::New => {
                if content.is_empty() {
                    return Ok(());
                }
                self.local_content = content;
                self.is_modified = true;
                self.sync_status = SyncStatus::Modified;
            }
            SyncStatus::Modified => {
                self.local_content = content;
            }
            SyncStatus::Conflict => unreachable!("handled above"),
        }
        Ok(())
    }

    /// A pull observed this statement's remote record again.
    ///
    /// Implements the conflict predicate: `existing.is_modified ∧
    /// existing.remote_content ≠ fetched.remote_content`.
    pub fn observe_pull(&mut self, fetched_remote_content: impl Into<String>) -> PullOutcome {
        let fetched = fetched_remote_content.into();
        match self.sync_status {
            SyncStatus::New | SyncStatus::Synced => {
                let changed = self.remote_content != fetched;
                self.remote_content = fetched;
                self.sync_status = SyncStatus::Synced;
                self.local_content.clear();
                if changed {
                    PullOutcome::Updated
                } else {
                    PullOutcome::Unchanged
                }
            }
            SyncStatus::Modified => {
                if self.remote_content == fetched {
                    PullOutcome::Unchanged
                } else {
                    // Remote overwritten into remote_content; local_content preserved.
                    self.remote_content = fetched;
                    self.sync_status = SyncStatus::Conflict;
                    PullOutcome::ConflictDetected
                }
            }
            SyncStatus::Conflict => {
                // No rule in §4.4 covers re-pulling an unresolved conflict;
                // keep the row untouched besides tracking the latest remote
                // value so a later resolution compares against it.
                if self.remote_content != fetched {
                    self.remote_content = fetched;
                }
                PullOutcome::Unchanged
            }
        }
    }

    /// `statements.resolveConflict` — only legal from `conflict`.
    pub fn resolve(&mut self, resolution: ConflictResolution) -> Result<(), LifecycleError> {
        if self.sync_status != SyncStatus::Conflict {
            return Err(LifecycleError::NotInConflict);
        }
        match resolution {
            ConflictResolution::KeepLocal => {
                self.sync_status = SyncStatus::Modified;
                self.is_modified = true;
            }
            ConflictResolution::KeepRemote => {
                self.local_content = self.remote_content.clone();
                self.is_modified = false;
                self.sync_status = SyncStatus::Synced;
            }
            ConflictResolution::Merge { text } => {
                if text.is_empty() {
                    return Err(LifecycleError::EmptyMergeText);
                }
                self.local_content = text;
                self.is_modified = true;
                self.sync_status = SyncStatus::Modified;
            }
        }
        Ok(())
    }

    /// `statements.revertToRemote` — discard the local overlay and return
    /// to `synced` regardless of current state (used outside the push path,
    /// e.g. an author abandoning an edit).
    pub fn revert_to_remote(&mut self) {
        self.local_content.clear();
        self.is_modified = false;
        self.sync_status = SyncStatus::Synced;
    }

    /// A push to the SOR succeeded; `effective_content` is now the
    /// canonical remote value. Only legal from `modified`; `conflict`
    /// rejects with [`LifecycleError::StatementHasConflict`] and any other
    /// state rejects with [`LifecycleError::StatementNotModified`] — this
    /// mirrors the push engine's own precondition check (§4.7) so the
    /// state machine can't be driven into an illegal push from a bug
    /// upstream.
    pub fn mark_pushed(&mut self) -> Result<(), LifecycleError> {
        match self.sync_status {
            SyncStatus::Modified => {
                self.remote_content = self.local_content.clone();
                self.local_content.clear();
                self.is_modified = false;
                self.sync_status = SyncStatus::Synced;
                Ok(())
            }
            SyncStatus::Conflict => Err(LifecycleError::StatementHasConflict),
            SyncStatus::New | SyncStatus::Synced => Err(LifecycleError::StatementNotModified),
        }
    }

    /// Checks invariants 1–2 (§8). Used by tests and, cheaply, by callers
    /// that want a belt-and-braces assertion after a batch of transitions.
    pub fn invariant_holds(&self) -> bool {
        let modified_iff_dirty_status = self.is_modified == self.sync_status.implies_modified();
        let synced_local_ok = match self.sync_status {
            SyncStatus::Synced => {
                self.local_content.is_empty() || self.local_content == self.remote_content
            }
            _ => true,
        };
        modified_iff_dirty_status && synced_local_ok
    }
}

/// Conflict predicate used by the pull engine/entity store before even
/// constructing a [`StatementState`] (e.g. to decide whether to take the
/// row lock path). Equivalent to what [`StatementState::observe_pull`]
/// computes internally for the `modified` case.
pub fn is_conflict(existing_is_modified: bool, existing_remote_content: &str, fetched_remote_content: &str) -> bool {
    existing_is_modified && existing_remote_content != fetched_remote_content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_pull_creates_synced() {
        let s = StatementState::new_synced("hello");
        assert_eq!(s.sync_status, SyncStatus::Synced);
        assert!(!s.is_modified);
        assert_eq!(s.effective_content(), "hello");
        assert!(s.invariant_holds());
    }

    #[test]
    fn edit_then_pull_with_remote_unchanged_stays_modified() {
        let mut s = StatementState::new_synced("orig");
        s.edit_local("L").unwrap();
        assert_eq!(s.sync_status, SyncStatus::Modified);

        let outcome = s.observe_pull("orig");
        assert_eq!(outcome, PullOutcome::Unchanged);
        assert_eq!(s.sync_status, SyncStatus::Modified);
        assert_eq!(s.local_content, "L");
        assert!(s.invariant_holds());
    }

    #[test]
    fn edit_then_pull_with_remote_changed_conflicts() {
        let mut s = StatementState::new_synced("orig");
        s.edit_local("L").unwrap();

        let outcome = s.observe_pull("new-from-sor");
        assert_eq!(outcome, PullOutcome::ConflictDetected);
        assert_eq!(s.sync_status, SyncStatus::Conflict);
        assert_eq!(s.remote_content, "new-from-sor");
        assert_eq!(s.local_content, "L");
        assert!(s.invariant_holds());
    }

    #[test]
    fn resolve_keep_local_then_push_succeeds() {
        let mut s = StatementState::new_synced("orig");
        s.edit_local("L").unwrap();
        s.observe_pull("new-from-sor");
        assert_eq!(s.sync_status, SyncStatus::Conflict);

        s.resolve(ConflictResolution::KeepLocal).unwrap();
        assert_eq!(s.sync_status, SyncStatus::Modified);

        s.mark_pushed().unwrap();
        assert_eq!(s.sync_status, SyncStatus::Synced);
        assert!(!s.is_modified);
        assert_eq!(s.remote_content, "L");
        assert!(s.invariant_holds());
    }

    #[test]
    fn resolve_keep_remote_discards_local_overlay() {
        let mut s = StatementState::new_synced("orig");
        s.edit_local("L").unwrap();
        s.observe_pull("new-from-sor");

        s.resolve(ConflictResolution::KeepRemote).unwrap();
        assert_eq!(s.sync_status, SyncStatus::Synced);
        assert!(!s.is_modified);
        assert_eq!(s.local_content, "new-from-sor");
        assert!(s.invariant_holds());
    }

    #[test]
    fn resolve_merge_requires_non_empty_text() {
        let mut s = StatementState::new_synced("orig");
        s.edit_local("L").unwrap();
        s.observe_pull("changed");

        assert_eq!(
            s.resolve(ConflictResolution::Merge { text: String::new() }),
            Err(LifecycleError::EmptyMergeText)
        );
        assert_eq!(s.sync_status, SyncStatus::Conflict);

        s.resolve(ConflictResolution::Merge {
            text: "merged".to_string(),
        })
        .unwrap();
        assert_eq!(s.sync_status, SyncStatus::Modified);
        assert_eq!(s.local_content, "merged");
    }

    #[test]
    fn push_rejected_while_in_conflict() {
        let mut s = StatementState::new_synced("orig");
        s.edit_local("L").unwrap();
        s.observe_pull("changed");
        assert_eq!(s.mark_pushed(), Err(LifecycleError::StatementHasConflict));
    }

    #[test]
    fn edit_blocked_while_in_conflict() {
        let mut s = StatementState::new_synced("orig");
        s.edit_local("L").unwrap();
        s.observe_pull("changed");
        assert_eq!(
            s.edit_local("more"),
            Err(LifecycleError::EditBlockedByConflict)
        );
    }

    #[test]
    fn dirty_overlay_equal_to_remote_stays_modified() {
        // §9: typing the same text back does not auto-collapse to synced.
        let mut s = StatementState::new_synced("orig");
        s.edit_local("changed").unwrap();
        s.edit_local("orig").unwrap();
        assert_eq!(s.sync_status, SyncStatus::Modified);
        assert!(s.is_modified);
    }

    #[test]
    fn empty_edit_on_synced_is_a_no_op() {
        let mut s = StatementState::new_synced("orig");
        s.edit_local("").unwrap();
        assert_eq!(s.sync_status, SyncStatus::Synced);
        assert!(!s.is_modified);
    }

    #[test]
    fn conflict_predicate_matches_observe_pull() {
        assert!(is_conflict(true, "orig", "changed"));
        assert!(!is_conflict(true, "orig", "orig"));
        assert!(!is_conflict(false, "orig", "changed"));
    }
}
