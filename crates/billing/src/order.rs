//! Payment order records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use polyform_core::{OrderId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Completed,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Failed)
    }
}

/// One credit purchase. Opened `created` with the processor-side order id;
/// flipped to a terminal status exactly once by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub id: OrderId,
    pub user_id: UserId,
    /// Id assigned by the payment processor; webhook correlation key.
    pub external_order_id: String,
    /// Charge in the smallest currency unit.
    pub amount: u64,
    pub currency: String,
    /// Credits granted to the balance when the order completes.
    pub credits_granted: u64,
    pub status: OrderStatus,
    pub payment_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentOrder {
    pub fn new(
        user_id: UserId,
        external_order_id: impl Into<String>,
        amount: u64,
        currency: impl Into<String>,
        credits_granted: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::new(),
            user_id,
            external_order_id: external_order_id.into(),
            amount,
            currency: currency.into(),
            credits_granted,
            status: OrderStatus::Created,
            payment_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}
