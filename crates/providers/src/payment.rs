//! Payment processor port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;
use crate::signature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventType {
    Captured,
    Failed,
}

/// Decoded payment webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub event_type: PaymentEventType,
    /// Processor-side order id, as returned by `create_order`.
    pub order_id: String,
    pub payment_id: String,
    /// Amount in the smallest currency unit, as charged by the processor.
    pub amount: u64,
    pub currency: String,
    #[serde(default)]
    pub error_detail: Option<String>,
}

/// Port to the external payment processor.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Open a checkout order for the given amount and return the
    /// processor-side order id the client completes payment against.
    async fn create_order(
        &self,
        amount: u64,
        currency: &str,
        metadata: &Value,
    ) -> Result<String, ProviderError>;

    /// Check the capture signature the client relays back after checkout.
    /// The signed message is `"{order_id}|{payment_id}"`.
    fn verify_capture(
        &self,
        order_id: &str,
        payment_id: &str,
        signature_hex: &str,
        secret: &str,
    ) -> Result<(), ProviderError> {
        let message = format!("{order_id}|{payment_id}");
        signature::verify(message.as_bytes(), signature_hex, secret)
    }

    /// Verify and decode a payment webhook delivery. The signature covers
    /// the raw body.
    fn parse_webhook(
        &self,
        raw_body: &[u8],
        signature_hex: &str,
        secret: &str,
    ) -> Result<PaymentEvent, ProviderError> {
        signature::verify(raw_body, signature_hex, secret)?;
        serde_json::from_slice(raw_body)
            .map_err(|err| ProviderError::Malformed(format!("payment webhook body: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::sign;

    struct WireOnly;

    #[async_trait]
    impl PaymentProvider for WireOnly {
        async fn create_order(
            &self,
            _amount: u64,
            _currency: &str,
            _metadata: &Value,
        ) -> Result<String, ProviderError> {
            unimplemented!()
        }
    }

    #[test]
    fn capture_signature_round_trip() {
        let sig = sign(b"order_ext_1|pay_9", "paysec_test");
        assert!(WireOnly
            .verify_capture("order_ext_1", "pay_9", &sig, "paysec_test")
            .is_ok());
        assert!(WireOnly
            .verify_capture("order_ext_1", "pay_8", &sig, "paysec_test")
            .is_err());
    }

    #[test]
    fn signed_payment_webhook_decodes() {
        let event = PaymentEvent {
            event_type: PaymentEventType::Captured,
            order_id: "order_ext_1".into(),
            payment_id: "pay_9".into(),
            amount: 49_900,
            currency: "INR".into(),
            error_detail: None,
        };
        let body = serde_json::to_vec(&event).unwrap();
        let sig = sign(&body, "paysec_test");
        assert_eq!(
            WireOnly.parse_webhook(&body, &sig, "paysec_test").unwrap(),
            event
        );
    }
}
