//! The billing service: checkout, verification, webhook settlement.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};

use polyform_core::{CoreError, CoreResult, OrderId, UserId};
use polyform_ledger::{Correlation, Ledger};
use polyform_providers::{PaymentEventType, PaymentProvider, ProviderError, WebhookError};

use crate::order::PaymentOrder;
use crate::store::{FlipOutcome, OrderStore};

/// Opens orders against the payment processor and settles them on capture.
pub struct Billing {
    orders: Arc<dyn OrderStore>,
    ledger: Arc<Ledger>,
    provider: Arc<dyn PaymentProvider>,
}

impl Billing {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        ledger: Arc<Ledger>,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        Self {
            orders,
            ledger,
            provider,
        }
    }

    /// Open a checkout order before the client pays.
    pub async fn create_order(
        &self,
        user_id: UserId,
        amount: u64,
        currency: &str,
        credits_granted: u64,
    ) -> CoreResult<PaymentOrder> {
        if amount == 0 || credits_granted == 0 {
            return Err(CoreError::validation(
                "amount and credits must be positive",
            ));
        }
        if currency.trim().is_empty() {
            return Err(CoreError::validation("currency is required"));
        }

        let metadata = json!({
            "user_id": user_id,
            "credits": credits_granted,
        });
        let external_order_id = self
            .provider
            .create_order(amount, currency, &metadata)
            .await?;

        let order = PaymentOrder::new(user_id, external_order_id, amount, currency, credits_granted);
        self.orders.insert(order.clone()).map_err(CoreError::from)?;

        info!(order_id = %order.id, user_id = %user_id, amount, credits_granted, "payment order opened");
        Ok(order)
    }

    pub fn order(&self, user_id: UserId, order_id: OrderId) -> CoreResult<PaymentOrder> {
        self.orders
            .get(order_id)
            .map_err(CoreError::from)?
            .filter(|o| o.user_id == user_id)
            .ok_or(CoreError::NotFound)
    }

    pub fn orders_for_user(&self, user_id: UserId) -> CoreResult<Vec<PaymentOrder>> {
        self.orders.list_for_user(user_id).map_err(CoreError::from)
    }

    /// Client-initiated completion: the checkout flow hands the client a
    /// capture signature over `"{external_order_id}|{payment_id}"`, which it
    /// relays here. Shares the settlement routine with the webhook, so
    /// whichever path lands first wins and the other becomes a no-op.
    pub async fn verify_payment(
        &self,
        user_id: UserId,
        order_id: OrderId,
        payment_id: &str,
        signature: &str,
        secret: &str,
    ) -> CoreResult<PaymentOrder> {
        let order = self.order(user_id, order_id)?;
        if order.status.is_terminal() {
            return Ok(order);
        }

        self.provider
            .verify_capture(&order.external_order_id, payment_id, signature, secret)
            .map_err(|err| {
                if matches!(err, ProviderError::Authentication(_)) {
                    warn!(order_id = %order.id, "payment verification signature rejected");
                }
                CoreError::from(err)
            })?;

        self.settle(order.id, payment_id).await
    }

    /// Verify, decode, and settle a payment webhook delivery.
    pub async fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature: &str,
        secret: &str,
    ) -> Result<PaymentOrder, WebhookError> {
        let event = self
            .provider
            .parse_webhook(raw_body, signature, secret)
            .map_err(|err| {
                if matches!(err, ProviderError::Authentication(_)) {
                    warn!("payment webhook signature rejected");
                }
                WebhookError::from(err)
            })?;

        let order = self
            .orders
            .find_by_external_id(&event.order_id)
            .map_err(|err| WebhookError::Retryable(err.to_string()))?
            .ok_or_else(|| {
                WebhookError::Rejected(format!("unknown order {}", event.order_id))
            })?;

        if order.status.is_terminal() {
            debug!(order_id = %order.id, "payment webhook replay on terminal order");
            return Ok(order);
        }

        match event.event_type {
            PaymentEventType::Captured => {
                if event.amount != order.amount || event.currency != order.currency {
                    warn!(
                        order_id = %order.id,
                        expected_amount = order.amount,
                        reported_amount = event.amount,
                        "payment webhook amount or currency mismatch"
                    );
                    return Err(WebhookError::Rejected(format!(
                        "amount or currency mismatch for order {}",
                        order.id
                    )));
                }
                self.settle(order.id, &event.payment_id)
                    .await
                    .map_err(|err| WebhookError::Retryable(err.to_string()))
            }
            PaymentEventType::Failed => {
                let reason = event
                    .error_detail
                    .as_deref()
                    .unwrap_or("payment failed");
                let outcome = self
                    .orders
                    .fail_if_created(order.id, reason)
                    .map_err(|err| WebhookError::Retryable(err.to_string()))?;
                info!(order_id = %order.id, reason, "payment order failed");
                Ok(outcome.order())
            }
        }
    }

    /// Flip the order to completed and credit the balance. The CAS flip
    /// elects a single winner across every delivery path; only that writer
    /// credits. A credit failure after the flip is logged for offline
    /// reconciliation (the order stays completed).
    async fn settle(&self, order_id: OrderId, payment_id: &str) -> CoreResult<PaymentOrder> {
        match self
            .orders
            .complete_if_created(order_id, payment_id)
            .map_err(CoreError::from)?
        {
            FlipOutcome::Transitioned(order) => {
                let already_credited = self
                    .ledger
                    .completed_purchase(order.id)?
                    .is_some();
                if !already_credited {
                    let correlation = Correlation::for_purchase(order.id, payment_id);
                    match self
                        .ledger
                        .credit(order.user_id, order.credits_granted, correlation)
                        .await
                    {
                        Ok(balance) => {
                            info!(
                                order_id = %order.id,
                                credits = order.credits_granted,
                                balance,
                                "order completed, credits granted"
                            );
                        }
                        Err(err) => {
                            error!(
                                order_id = %order.id,
                                credits = order.credits_granted,
                                error = %err,
                                "order completed but credit failed"
                            );
                        }
                    }
                }
                Ok(order)
            }
            FlipOutcome::AlreadyTerminal(order) => {
                debug!(order_id = %order.id, "settlement replay on terminal order");
                Ok(order)
            }
        }
    }
}
