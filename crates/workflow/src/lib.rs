//! `polyform-workflow` — the step-pipeline engine.
//!
//! Each workflow type runs a fixed step sequence; network steps get a
//! per-call deadline and bounded retry for transient failures. Terminal
//! settlement (debit on success, refund of a pre-debit on failure) is
//! delegated to the reconciler so the engine's poll loop and incoming
//! webhooks can never double-settle.

pub mod engine;
pub mod registry;

pub use engine::{CreateGeneration, EngineConfig, WorkflowEngine};
pub use registry::ProviderRegistry;
