//! `polyform-jobs` — projects and generations: the persisted state machine.
//!
//! A generation only ever moves forward (`pending -> generating ->
//! {completed|failed}`); terminal phases are immutable, output data is
//! merge-only, and sequence numbers are assigned through an atomic
//! project-scoped counter.

pub mod generation;
pub mod pricing;
pub mod store;

pub use generation::{Generation, GenerationUpdate, Phase, Project, WorkflowType};
pub use pricing::CostSchedule;
pub use store::{ApplyOutcome, InMemoryJobStore, JobStore, JobStoreError};
