//! `polyform-billing` — credit purchases.
//!
//! An order is opened against the payment processor before checkout; its
//! completion arrives by webhook or by the client's explicit verification
//! call, whichever lands first. The `created -> completed` status flip is a
//! compare-and-set, so however many deliveries race, exactly one writer
//! credits the ledger.

pub mod order;
pub mod service;
pub mod store;

pub use order::{OrderStatus, PaymentOrder};
pub use service::Billing;
pub use store::{FlipOutcome, InMemoryOrderStore, OrderStore, OrderStoreError};
