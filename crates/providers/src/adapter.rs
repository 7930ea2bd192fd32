//! Generation provider port.
//!
//! Every vendor is adapted to one contract: submit a job and get back an
//! external id, poll that id for a normalized status update, and parse a
//! signed webhook body into the same update shape. The rest of the system
//! never sees vendor-specific payloads.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;
use crate::signature;

/// Lifecycle phase as reported by the external provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalPhase {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl ExternalPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExternalPhase::Succeeded | ExternalPhase::Failed)
    }
}

/// One normalized status report for an external job, whether it arrived by
/// webhook or by poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUpdate {
    /// Provider-side job identifier.
    pub external_id: String,
    pub phase: ExternalPhase,
    #[serde(default)]
    pub progress_pct: u8,
    /// Download URLs for produced assets. Only meaningful on `Succeeded`.
    #[serde(default)]
    pub artifact_urls: Vec<String>,
    /// Human-readable failure reason. Only meaningful on `Failed`.
    #[serde(default)]
    pub error_detail: Option<String>,
}

impl ProviderUpdate {
    pub fn running(external_id: impl Into<String>, progress_pct: u8) -> Self {
        ProviderUpdate {
            external_id: external_id.into(),
            phase: ExternalPhase::Running,
            progress_pct,
            artifact_urls: Vec::new(),
            error_detail: None,
        }
    }

    pub fn succeeded(external_id: impl Into<String>, artifact_urls: Vec<String>) -> Self {
        ProviderUpdate {
            external_id: external_id.into(),
            phase: ExternalPhase::Succeeded,
            progress_pct: 100,
            artifact_urls,
            error_detail: None,
        }
    }

    pub fn failed(external_id: impl Into<String>, reason: impl Into<String>) -> Self {
        ProviderUpdate {
            external_id: external_id.into(),
            phase: ExternalPhase::Failed,
            progress_pct: 0,
            artifact_urls: Vec::new(),
            error_detail: Some(reason.into()),
        }
    }
}

/// Port to an external generation service.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Short provider name for logs and stored metadata.
    fn name(&self) -> &str;

    /// Submit a job and return the provider-side id.
    async fn submit(&self, input: &Value) -> Result<String, ProviderError>;

    /// Fetch the current status of a previously submitted job.
    async fn poll(&self, external_id: &str) -> Result<ProviderUpdate, ProviderError>;

    /// Verify and decode a webhook delivery. The signature covers the raw
    /// body; verification failure must not reveal which check failed.
    fn parse_webhook(
        &self,
        raw_body: &[u8],
        signature_hex: &str,
        secret: &str,
    ) -> Result<ProviderUpdate, ProviderError> {
        signature::verify(raw_body, signature_hex, secret)?;
        serde_json::from_slice(raw_body)
            .map_err(|err| ProviderError::Malformed(format!("webhook body: {err}")))
    }
}
