//! Account and transaction storage ports.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use polyform_core::{GenerationId, OrderId, UserId};

use crate::account::{Account, Transaction, TransactionKind, TransactionStatus};

/// Storage error surfaced by the ledger stores.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("account not found")]
    NotFound,
    /// Version token mismatch or duplicate insert; the caller retries.
    #[error("version conflict")]
    Conflict,
    #[error("storage error: {0}")]
    Storage(String),
}

/// Account store: a versioned row per user, mutated only via CAS.
pub trait AccountStore: Send + Sync {
    fn get(&self, user_id: UserId) -> Result<Option<Account>, StoreError>;

    /// Insert a brand-new account. Fails with `Conflict` if one already
    /// exists (lost a creation race).
    fn insert(&self, account: Account) -> Result<(), StoreError>;

    /// Set the balance iff the stored version still equals
    /// `expected_version`; bumps the version and `updated_at`.
    fn compare_and_update(
        &self,
        user_id: UserId,
        expected_version: u64,
        new_balance: u64,
    ) -> Result<Account, StoreError>;
}

/// Append-only transaction record.
pub trait TransactionStore: Send + Sync {
    fn append(&self, transaction: Transaction) -> Result<(), StoreError>;

    fn list_for_user(&self, user_id: UserId) -> Result<Vec<Transaction>, StoreError>;

    /// The completed usage transaction for a generation, if one exists.
    /// Used for debit dedup and the refund-if-debited rule.
    fn find_completed_usage(
        &self,
        generation_id: GenerationId,
    ) -> Result<Option<Transaction>, StoreError>;

    /// The completed purchase transaction for an order, if one exists.
    /// Used by the payment webhook idempotency check.
    fn find_completed_purchase(
        &self,
        order_id: OrderId,
    ) -> Result<Option<Transaction>, StoreError>;
}

/// In-memory account store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<UserId, Account>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl AccountStore for InMemoryAccountStore {
    fn get(&self, user_id: UserId) -> Result<Option<Account>, StoreError> {
        let accounts = self
            .accounts
            .read()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(accounts.get(&user_id).cloned())
    }

    fn insert(&self, account: Account) -> Result<(), StoreError> {
        let mut accounts = self
            .accounts
            .write()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        if accounts.contains_key(&account.user_id) {
            return Err(StoreError::Conflict);
        }
        accounts.insert(account.user_id, account);
        Ok(())
    }

    fn compare_and_update(
        &self,
        user_id: UserId,
        expected_version: u64,
        new_balance: u64,
    ) -> Result<Account, StoreError> {
        let mut accounts = self
            .accounts
            .write()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        let account = accounts.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        if account.version != expected_version {
            return Err(StoreError::Conflict);
        }
        account.balance = new_balance;
        account.version += 1;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }
}

/// In-memory transaction store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTransactionStore {
    transactions: RwLock<Vec<Transaction>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl TransactionStore for InMemoryTransactionStore {
    fn append(&self, transaction: Transaction) -> Result<(), StoreError> {
        let mut txs = self
            .transactions
            .write()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        txs.push(transaction);
        Ok(())
    }

    fn list_for_user(&self, user_id: UserId) -> Result<Vec<Transaction>, StoreError> {
        let txs = self
            .transactions
            .read()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(txs
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    fn find_completed_usage(
        &self,
        generation_id: GenerationId,
    ) -> Result<Option<Transaction>, StoreError> {
        let txs = self
            .transactions
            .read()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(txs
            .iter()
            .find(|t| {
                t.kind == TransactionKind::Usage
                    && t.status == TransactionStatus::Completed
                    && t.correlation.generation_id == Some(generation_id)
            })
            .cloned())
    }

    fn find_completed_purchase(
        &self,
        order_id: OrderId,
    ) -> Result<Option<Transaction>, StoreError> {
        let txs = self
            .transactions
            .read()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(txs
            .iter()
            .find(|t| {
                t.kind == TransactionKind::Purchase
                    && t.status == TransactionStatus::Completed
                    && t.correlation.order_id == Some(order_id)
            })
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyform_core::ProjectId;
    use crate::account::Correlation;

    #[test]
    fn cas_rejects_stale_version() {
        let store = InMemoryAccountStore::new();
        let user = UserId::new();
        store.insert(Account::open(user, 100)).unwrap();

        let updated = store.compare_and_update(user, 0, 90).unwrap();
        assert_eq!(updated.balance, 90);
        assert_eq!(updated.version, 1);

        // Replaying the first write's version must conflict.
        assert!(matches!(
            store.compare_and_update(user, 0, 80),
            Err(StoreError::Conflict)
        ));
    }

    #[test]
    fn duplicate_insert_conflicts() {
        let store = InMemoryAccountStore::new();
        let user = UserId::new();
        store.insert(Account::open(user, 10)).unwrap();
        assert!(matches!(
            store.insert(Account::open(user, 10)),
            Err(StoreError::Conflict)
        ));
    }

    #[test]
    fn finds_usage_by_generation() {
        let store = InMemoryTransactionStore::new();
        let user = UserId::new();
        let generation = GenerationId::new();
        let correlation = Correlation::for_generation(ProjectId::new(), generation);

        store
            .append(Transaction::completed(
                user,
                TransactionKind::Usage,
                -25,
                correlation,
            ))
            .unwrap();

        let found = store.find_completed_usage(generation).unwrap().unwrap();
        assert_eq!(found.amount, -25);
        assert!(store
            .find_completed_usage(GenerationId::new())
            .unwrap()
            .is_none());
    }
}
