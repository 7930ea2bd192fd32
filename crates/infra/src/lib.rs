//! `polyform-infra` — infrastructure ports with in-memory implementations.

pub mod cache;

pub use cache::{Cache, CacheError, InMemoryCache};
