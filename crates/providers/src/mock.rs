//! In-process mock providers.
//!
//! Used for local dev wiring and in tests across the workspace. Poll
//! responses follow a script: push updates or errors, the mock pops them in
//! order, and once the script is exhausted it keeps returning the last
//! terminal update (or a bare running update if there is none).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::adapter::{GenerationProvider, ProviderUpdate};
use crate::error::ProviderError;
use crate::payment::PaymentProvider;

#[derive(Default)]
pub struct MockGenerationProvider {
    name: String,
    next_id: AtomicU32,
    submit_error: Mutex<Option<ProviderError>>,
    poll_count: AtomicU32,
    poll_script: Mutex<VecDeque<Result<ProviderUpdate, ProviderError>>>,
    last_terminal: Mutex<Option<ProviderUpdate>>,
    submitted: Mutex<Vec<Value>>,
}

impl MockGenerationProvider {
    pub fn new(name: impl Into<String>) -> Self {
        MockGenerationProvider {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Queue a poll response. Terminal updates are also remembered and
    /// replayed once the script runs out.
    pub fn push_poll(&self, response: Result<ProviderUpdate, ProviderError>) {
        if let Ok(update) = &response {
            if update.phase.is_terminal() {
                *self.last_terminal.lock().unwrap() = Some(update.clone());
            }
        }
        self.poll_script.lock().unwrap().push_back(response);
    }

    /// Make the next `submit` calls fail with the given error.
    pub fn fail_submit(&self, err: ProviderError) {
        *self.submit_error.lock().unwrap() = Some(err);
    }

    pub fn clear_submit_error(&self) {
        *self.submit_error.lock().unwrap() = None;
    }

    /// Inputs passed to `submit`, in call order.
    pub fn submitted(&self) -> Vec<Value> {
        self.submitted.lock().unwrap().clone()
    }

    /// How many times `poll` has been called.
    pub fn poll_count(&self) -> u32 {
        self.poll_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for MockGenerationProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, input: &Value) -> Result<String, ProviderError> {
        if let Some(err) = self.submit_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.submitted.lock().unwrap().push(input.clone());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{}-job-{n}", self.name))
    }

    async fn poll(&self, external_id: &str) -> Result<ProviderUpdate, ProviderError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        if let Some(response) = self.poll_script.lock().unwrap().pop_front() {
            return response;
        }
        if let Some(terminal) = self.last_terminal.lock().unwrap().clone() {
            return Ok(terminal);
        }
        Ok(ProviderUpdate::running(external_id, 0))
    }
}

#[derive(Default)]
pub struct MockPaymentProvider {
    next_id: AtomicU32,
    create_error: Mutex<Option<ProviderError>>,
    orders: Mutex<Vec<(String, u64, String)>>,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self, err: ProviderError) {
        *self.create_error.lock().unwrap() = Some(err);
    }

    /// `(external order id, amount, currency)` for each created order.
    pub fn orders(&self) -> Vec<(String, u64, String)> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_order(
        &self,
        amount: u64,
        currency: &str,
        _metadata: &Value,
    ) -> Result<String, ProviderError> {
        if let Some(err) = self.create_error.lock().unwrap().clone() {
            return Err(err);
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let external_id = format!("order_ext_{n}");
        self.orders
            .lock()
            .unwrap()
            .push((external_id.clone(), amount, currency.to_string()));
        Ok(external_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ExternalPhase;
    use serde_json::json;

    #[tokio::test]
    async fn submit_records_input_and_mints_ids() {
        let provider = MockGenerationProvider::new("mesh");
        let a = provider.submit(&json!({"prompt": "a chair"})).await.unwrap();
        let b = provider.submit(&json!({"prompt": "a table"})).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(provider.submitted().len(), 2);
    }

    #[tokio::test]
    async fn poll_script_plays_in_order_then_repeats_terminal() {
        let provider = MockGenerationProvider::new("mesh");
        provider.push_poll(Ok(ProviderUpdate::running("mesh-job-1", 40)));
        provider.push_poll(Err(ProviderError::Transient("connection reset".into())));
        provider.push_poll(Ok(ProviderUpdate::succeeded(
            "mesh-job-1",
            vec!["https://cdn/m.glb".into()],
        )));

        assert_eq!(
            provider.poll("mesh-job-1").await.unwrap().progress_pct,
            40
        );
        assert!(provider.poll("mesh-job-1").await.unwrap_err().is_transient());
        assert_eq!(
            provider.poll("mesh-job-1").await.unwrap().phase,
            ExternalPhase::Succeeded
        );
        // Exhausted script replays the terminal update.
        assert_eq!(
            provider.poll("mesh-job-1").await.unwrap().phase,
            ExternalPhase::Succeeded
        );
    }

    #[tokio::test]
    async fn failed_submit_surfaces_configured_error() {
        let provider = MockGenerationProvider::new("mesh");
        provider.fail_submit(ProviderError::Transient("503".into()));
        assert!(provider.submit(&json!({})).await.unwrap_err().is_transient());
        provider.clear_submit_error();
        assert!(provider.submit(&json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn payment_mock_records_orders() {
        let provider = MockPaymentProvider::new();
        let id = provider
            .create_order(49_900, "INR", &json!({"pack": "creator"}))
            .await
            .unwrap();
        assert_eq!(provider.orders(), vec![(id, 49_900, "INR".to_string())]);
    }
}
