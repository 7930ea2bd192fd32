//! `polyform-ledger` — the user's credit balance and its audit trail.
//!
//! Owns the integer credit balance and exposes atomic debit/credit/refund
//! over a CAS-based account store, with a durable append-only transaction
//! record for audit and idempotency checks.

pub mod account;
pub mod ledger;
pub mod store;

pub use account::{Account, Correlation, Transaction, TransactionKind, TransactionStatus};
pub use ledger::{Ledger, LedgerConfig};
pub use store::{
    AccountStore, InMemoryAccountStore, InMemoryTransactionStore, StoreError, TransactionStore,
};
