//! `polyform-reconcile` — merges webhook and poll reports into one
//! consistent generation record.
//!
//! Both sources funnel through `Reconciler::apply_update`, so replays,
//! out-of-order deliveries, and webhook/poll races all resolve through the
//! job store's terminal guard. The writer that wins the terminal transition
//! also owns the billing side effect, which keeps the debit exactly-once.

pub mod reconciler;
pub mod webhook;

pub use reconciler::{ReconcileConfig, Reconciler, UpdateSource};
