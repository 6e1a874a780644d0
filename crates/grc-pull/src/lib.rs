//! Pull Engine (C6) — one-way sync from the SOR into local storage (§4.6).
//!
//! Shaped like a detached worker with a cooperative cancellation handle, the
//! same pattern this workspace's teacher used for its long-running run loop:
//! `start` registers the job, spawns the worker, and returns immediately;
//! the worker checks a shared flag between units of work rather than being
//! forcibly killed.

mod error;
mod job;

pub use error::PullError;
pub use job::{PullEngine, PullProgressSnapshot};
