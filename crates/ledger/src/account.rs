//! Account and transaction records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use polyform_core::{GenerationId, OrderId, ProjectId, TransactionId, UserId};

/// A user's credit balance.
///
/// Mutated only through the ledger's debit/credit operations; `version` is the
/// optimistic-concurrency token checked by the store's compare-and-update.
///
/// Invariant: `balance` equals the starter balance plus the sum of signed
/// amounts of all completed transactions for this user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,
    pub balance: u64,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Open a fresh account with the configured starter balance.
    pub fn open(user_id: UserId, starter_balance: u64) -> Self {
        Self {
            user_id,
            balance: starter_balance,
            version: 0,
            updated_at: Utc::now(),
        }
    }
}

/// What a transaction represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Credits bought through the payment processor (positive amount).
    Purchase,
    /// Credits spent on a billable generation (negative amount).
    Usage,
    /// Credits returned after a debited operation failed irrecoverably
    /// (positive amount).
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// Links a transaction back to the business event that caused it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<GenerationId>,
}

impl Correlation {
    pub fn for_generation(project_id: ProjectId, generation_id: GenerationId) -> Self {
        Self {
            project_id: Some(project_id),
            generation_id: Some(generation_id),
            ..Default::default()
        }
    }

    pub fn for_purchase(order_id: OrderId, payment_id: impl Into<String>) -> Self {
        Self {
            order_id: Some(order_id),
            payment_id: Some(payment_id.into()),
            ..Default::default()
        }
    }
}

/// Immutable, append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub kind: TransactionKind,
    /// Signed amount: positive for purchase/refund, negative for usage.
    pub amount: i64,
    pub status: TransactionStatus,
    pub correlation: Correlation,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn completed(
        user_id: UserId,
        kind: TransactionKind,
        amount: i64,
        correlation: Correlation,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            user_id,
            kind,
            amount,
            status: TransactionStatus::Completed,
            correlation,
            created_at: Utc::now(),
        }
    }
}
