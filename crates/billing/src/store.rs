//! Order storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use polyform_core::{CoreError, OrderId, UserId};

use crate::order::{OrderStatus, PaymentOrder};

#[derive(Debug, Clone, thiserror::Error)]
pub enum OrderStoreError {
    #[error("order not found: {0}")]
    NotFound(OrderId),
    #[error("already exists")]
    AlreadyExists,
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<OrderStoreError> for CoreError {
    fn from(err: OrderStoreError) -> Self {
        match err {
            OrderStoreError::NotFound(_) => CoreError::NotFound,
            other => CoreError::inconsistency(other.to_string()),
        }
    }
}

/// What a status flip did. Exactly one concurrent writer observes
/// `Transitioned`; it owns the ledger credit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlipOutcome {
    Transitioned(PaymentOrder),
    AlreadyTerminal(PaymentOrder),
}

impl FlipOutcome {
    pub fn order(self) -> PaymentOrder {
        match self {
            FlipOutcome::Transitioned(order) | FlipOutcome::AlreadyTerminal(order) => order,
        }
    }
}

/// Order store abstraction. The flips re-check the status inside the same
/// critical section that writes it.
pub trait OrderStore: Send + Sync {
    fn insert(&self, order: PaymentOrder) -> Result<(), OrderStoreError>;

    fn get(&self, order_id: OrderId) -> Result<Option<PaymentOrder>, OrderStoreError>;

    fn find_by_external_id(
        &self,
        external_order_id: &str,
    ) -> Result<Option<PaymentOrder>, OrderStoreError>;

    fn list_for_user(&self, user_id: UserId) -> Result<Vec<PaymentOrder>, OrderStoreError>;

    /// Flip `created -> completed`, recording the payment id.
    fn complete_if_created(
        &self,
        order_id: OrderId,
        payment_id: &str,
    ) -> Result<FlipOutcome, OrderStoreError>;

    /// Flip `created -> failed`, recording the reason.
    fn fail_if_created(
        &self,
        order_id: OrderId,
        reason: &str,
    ) -> Result<FlipOutcome, OrderStoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    orders: HashMap<OrderId, PaymentOrder>,
    by_external_id: HashMap<String, OrderId>,
}

/// In-memory order store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    inner: RwLock<Inner>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn flip(
        &self,
        order_id: OrderId,
        target: OrderStatus,
        mutate: impl FnOnce(&mut PaymentOrder),
    ) -> Result<FlipOutcome, OrderStoreError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| OrderStoreError::Storage(e.to_string()))?;
        let order = inner
            .orders
            .get_mut(&order_id)
            .ok_or(OrderStoreError::NotFound(order_id))?;

        if order.status.is_terminal() {
            return Ok(FlipOutcome::AlreadyTerminal(order.clone()));
        }

        order.status = target;
        mutate(order);
        order.updated_at = Utc::now();
        Ok(FlipOutcome::Transitioned(order.clone()))
    }
}

impl OrderStore for InMemoryOrderStore {
    fn insert(&self, order: PaymentOrder) -> Result<(), OrderStoreError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| OrderStoreError::Storage(e.to_string()))?;
        if inner.orders.contains_key(&order.id)
            || inner.by_external_id.contains_key(&order.external_order_id)
        {
            return Err(OrderStoreError::AlreadyExists);
        }
        inner
            .by_external_id
            .insert(order.external_order_id.clone(), order.id);
        inner.orders.insert(order.id, order);
        Ok(())
    }

    fn get(&self, order_id: OrderId) -> Result<Option<PaymentOrder>, OrderStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| OrderStoreError::Storage(e.to_string()))?;
        Ok(inner.orders.get(&order_id).cloned())
    }

    fn find_by_external_id(
        &self,
        external_order_id: &str,
    ) -> Result<Option<PaymentOrder>, OrderStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| OrderStoreError::Storage(e.to_string()))?;
        Ok(inner
            .by_external_id
            .get(external_order_id)
            .and_then(|id| inner.orders.get(id))
            .cloned())
    }

    fn list_for_user(&self, user_id: UserId) -> Result<Vec<PaymentOrder>, OrderStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| OrderStoreError::Storage(e.to_string()))?;
        let mut result: Vec<_> = inner
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        result.sort_by_key(|o| o.created_at);
        Ok(result)
    }

    fn complete_if_created(
        &self,
        order_id: OrderId,
        payment_id: &str,
    ) -> Result<FlipOutcome, OrderStoreError> {
        self.flip(order_id, OrderStatus::Completed, |order| {
            order.payment_id = Some(payment_id.to_string());
        })
    }

    fn fail_if_created(
        &self,
        order_id: OrderId,
        reason: &str,
    ) -> Result<FlipOutcome, OrderStoreError> {
        self.flip(order_id, OrderStatus::Failed, |order| {
            order.failure_reason = Some(reason.to_string());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn seeded(store: &InMemoryOrderStore) -> PaymentOrder {
        let order = PaymentOrder::new(UserId::new(), "order_ext_1", 49_900, "INR", 500);
        store.insert(order.clone()).unwrap();
        order
    }

    #[test]
    fn duplicate_external_id_is_rejected() {
        let store = InMemoryOrderStore::new();
        seeded(&store);
        let duplicate = PaymentOrder::new(UserId::new(), "order_ext_1", 100, "INR", 10);
        assert!(matches!(
            store.insert(duplicate),
            Err(OrderStoreError::AlreadyExists)
        ));
    }

    #[test]
    fn complete_flip_is_first_writer_wins() {
        let store = InMemoryOrderStore::new();
        let order = seeded(&store);

        let first = store.complete_if_created(order.id, "pay_1").unwrap();
        assert!(matches!(first, FlipOutcome::Transitioned(_)));

        let second = store.complete_if_created(order.id, "pay_2").unwrap();
        let FlipOutcome::AlreadyTerminal(current) = second else {
            panic!("second flip must observe the terminal status");
        };
        assert_eq!(current.payment_id.as_deref(), Some("pay_1"));
    }

    #[test]
    fn fail_cannot_overwrite_completed() {
        let store = InMemoryOrderStore::new();
        let order = seeded(&store);

        store.complete_if_created(order.id, "pay_1").unwrap();
        let outcome = store.fail_if_created(order.id, "late failure").unwrap();
        assert_eq!(outcome.order().status, OrderStatus::Completed);
    }

    #[test]
    fn concurrent_flips_elect_one_winner() {
        let store = Arc::new(InMemoryOrderStore::new());
        let order = seeded(&store);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let id = order.id;
                thread::spawn(move || store.complete_if_created(id, &format!("pay_{i}")).unwrap())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| matches!(o, FlipOutcome::Transitioned(_)))
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn external_id_lookup_finds_the_order() {
        let store = InMemoryOrderStore::new();
        let order = seeded(&store);
        let found = store.find_by_external_id("order_ext_1").unwrap().unwrap();
        assert_eq!(found.id, order.id);
        assert!(store.find_by_external_id("order_ext_404").unwrap().is_none());
    }
}
