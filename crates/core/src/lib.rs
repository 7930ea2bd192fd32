//! `polyform-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! strongly-typed identifiers, the shared error taxonomy, and the retry policy
//! used around transactional conflicts and provider calls.

pub mod error;
pub mod id;
pub mod retry;

pub use error::{CoreError, CoreResult, ErrorCategory, ErrorDetail};
pub use id::{GenerationId, OrderId, ProjectId, TransactionId, UserId};
pub use retry::RetryPolicy;
