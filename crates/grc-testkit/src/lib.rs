//! Shared test fixtures: an in-process fake SOR server plus small builders
//! for the domain rows other crates' integration tests construct
//! repeatedly — one shared, test-only harness rather than mocks scattered
//! per-crate.

mod fake_sor;

pub use fake_sor::{FakeSor, FakeSorHandle};
