//! Push Engine (C7) — one-way sync from local overlays back to the SOR
//! (§4.7). Push jobs live in memory only (§9 open question: the source
//! system does not persist push job bookkeeping, unlike pull jobs which the
//! SOR-mirroring schema needs for the single-flight invariant).

mod engine;
mod error;

pub use engine::{PushEngine, PushJobSnapshot, PushResult, StatementOutcome};
pub use error::PushError;
