//! The ledger service: exactly-once balance mutation under contention.

use std::sync::Arc;

use tracing::{debug, error};

use polyform_core::{CoreError, CoreResult, GenerationId, OrderId, RetryPolicy, UserId};

use crate::account::{Account, Correlation, Transaction, TransactionKind};
use crate::store::{AccountStore, StoreError, TransactionStore};

/// Ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Balance granted when an account is created on first access.
    pub starter_balance: u64,
    /// Upper bound on any single debit/credit, to reject corrupt or
    /// adversarial amounts.
    pub max_amount: u64,
    /// Backoff policy around CAS conflicts.
    pub retry: RetryPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            starter_balance: 0,
            max_amount: 1_000_000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Atomic debit/credit/refund over the account store.
///
/// Balance mutations are linearized by the store's compare-and-update; no
/// application-level lock is held, and no lock is held across await points.
pub struct Ledger {
    accounts: Arc<dyn AccountStore>,
    transactions: Arc<dyn TransactionStore>,
    config: LedgerConfig,
}

impl Ledger {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        transactions: Arc<dyn TransactionStore>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            accounts,
            transactions,
            config,
        }
    }

    /// Spend credits. Fails with `InsufficientCredits` when the balance is
    /// too low; retries CAS conflicts with backoff and surfaces
    /// `LedgerConflict` when retries are exhausted (no partial debit occurred,
    /// so the whole request is safe to retry).
    pub async fn debit(
        &self,
        user_id: UserId,
        amount: u64,
        correlation: Correlation,
    ) -> CoreResult<u64> {
        self.check_amount(amount)?;

        let updated = self
            .mutate_balance(user_id, |balance| {
                if balance < amount {
                    return Err(CoreError::InsufficientCredits {
                        required: amount,
                        available: balance,
                    });
                }
                Ok(balance - amount)
            })
            .await?;

        self.record(user_id, TransactionKind::Usage, -(amount as i64), correlation);
        debug!(%user_id, amount, balance = updated.balance, "debited credits");
        Ok(updated.balance)
    }

    /// Grant purchased credits. Always succeeds for a valid amount; the
    /// caller is responsible for idempotency (checking the order/transaction
    /// record before calling).
    pub async fn credit(
        &self,
        user_id: UserId,
        amount: u64,
        correlation: Correlation,
    ) -> CoreResult<u64> {
        self.check_amount(amount)?;

        let updated = self
            .mutate_balance(user_id, |balance| Ok(balance.saturating_add(amount)))
            .await?;

        self.record(user_id, TransactionKind::Purchase, amount as i64, correlation);
        debug!(%user_id, amount, balance = updated.balance, "credited credits");
        Ok(updated.balance)
    }

    /// Return credits after a debited operation failed irrecoverably.
    pub async fn refund(
        &self,
        user_id: UserId,
        amount: u64,
        correlation: Correlation,
    ) -> CoreResult<u64> {
        self.check_amount(amount)?;

        let updated = self
            .mutate_balance(user_id, |balance| Ok(balance.saturating_add(amount)))
            .await?;

        self.record(user_id, TransactionKind::Refund, amount as i64, correlation);
        debug!(%user_id, amount, balance = updated.balance, "refunded credits");
        Ok(updated.balance)
    }

    /// Current balance; opens the account lazily on first access.
    pub async fn balance(&self, user_id: UserId) -> CoreResult<u64> {
        Ok(self.load_or_open(user_id)?.balance)
    }

    /// Audit trail for a user.
    pub fn transactions(&self, user_id: UserId) -> CoreResult<Vec<Transaction>> {
        self.transactions
            .list_for_user(user_id)
            .map_err(|e| CoreError::inconsistency(e.to_string()))
    }

    /// The completed usage transaction for a generation, if one exists.
    /// Drives debit dedup and refund-if-debited.
    pub fn completed_usage(&self, generation_id: GenerationId) -> CoreResult<Option<Transaction>> {
        self.transactions
            .find_completed_usage(generation_id)
            .map_err(|e| CoreError::inconsistency(e.to_string()))
    }

    /// Whether a completed usage transaction exists for the generation.
    pub fn has_completed_usage(&self, generation_id: GenerationId) -> CoreResult<bool> {
        Ok(self.completed_usage(generation_id)?.is_some())
    }

    /// The completed purchase transaction for an order, if one exists.
    /// Backstop for payment-webhook replay dedup.
    pub fn completed_purchase(&self, order_id: OrderId) -> CoreResult<Option<Transaction>> {
        self.transactions
            .find_completed_purchase(order_id)
            .map_err(|e| CoreError::inconsistency(e.to_string()))
    }

    fn check_amount(&self, amount: u64) -> CoreResult<()> {
        if amount == 0 {
            return Err(CoreError::validation("amount must be positive"));
        }
        if amount > self.config.max_amount {
            return Err(CoreError::validation(format!(
                "amount {} exceeds maximum {}",
                amount, self.config.max_amount
            )));
        }
        Ok(())
    }

    /// Optimistic-retry loop over the account CAS. The closure computes the
    /// new balance from the observed one and may reject the mutation with a
    /// business error, which propagates without retry.
    async fn mutate_balance(
        &self,
        user_id: UserId,
        new_balance: impl Fn(u64) -> CoreResult<u64>,
    ) -> CoreResult<Account> {
        let mut attempt: u32 = 0;
        loop {
            let account = self.load_or_open(user_id)?;
            let target = new_balance(account.balance)?;

            match self
                .accounts
                .compare_and_update(user_id, account.version, target)
            {
                Ok(updated) => return Ok(updated),
                Err(StoreError::Conflict) => {
                    attempt += 1;
                    if !self.config.retry.should_retry(attempt) {
                        return Err(CoreError::ledger_conflict(format!(
                            "balance update for {user_id} contended after {attempt} attempts"
                        )));
                    }
                    tokio::time::sleep(self.config.retry.delay_for_attempt(attempt)).await;
                }
                Err(e) => return Err(CoreError::inconsistency(e.to_string())),
            }
        }
    }

    fn load_or_open(&self, user_id: UserId) -> CoreResult<Account> {
        if let Some(account) = self
            .accounts
            .get(user_id)
            .map_err(|e| CoreError::inconsistency(e.to_string()))?
        {
            return Ok(account);
        }

        let account = Account::open(user_id, self.config.starter_balance);
        match self.accounts.insert(account.clone()) {
            Ok(()) => Ok(account),
            // Lost the creation race; the other writer's row wins.
            Err(StoreError::Conflict) => self
                .accounts
                .get(user_id)
                .map_err(|e| CoreError::inconsistency(e.to_string()))?
                .ok_or_else(|| CoreError::inconsistency("account vanished after insert race")),
            Err(e) => Err(CoreError::inconsistency(e.to_string())),
        }
    }

    /// Append the audit row. The balance write already committed, so an
    /// append failure is logged for offline reconciliation rather than
    /// rolled back.
    fn record(
        &self,
        user_id: UserId,
        kind: TransactionKind,
        amount: i64,
        correlation: Correlation,
    ) {
        let transaction = Transaction::completed(user_id, kind, amount, correlation);
        if let Err(e) = self.transactions.append(transaction) {
            error!(%user_id, ?kind, amount, error = %e, "transaction append failed after balance commit");
        }
    }
}
