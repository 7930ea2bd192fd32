//! Provider webhook intake.

use tracing::warn;

use polyform_jobs::Generation;
use polyform_providers::{ProviderError, WebhookError};

use crate::reconciler::{Reconciler, UpdateSource};

impl Reconciler {
    /// Verify, decode, and apply a provider webhook delivery.
    ///
    /// Every failure is classified for the caller: `Rejected` means the
    /// provider must not redeliver (bad signature, unparseable body),
    /// `Retryable` asks for redelivery (storage trouble, or the delivery
    /// outran the submit step that records the external id).
    pub async fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature: &str,
        secret: &str,
    ) -> Result<Generation, WebhookError> {
        let update = self
            .provider()
            .parse_webhook(raw_body, signature, secret)
            .map_err(|err| {
                if matches!(err, ProviderError::Authentication(_)) {
                    warn!(provider = self.provider().name(), "webhook signature rejected");
                }
                WebhookError::from(err)
            })?;

        let generation = self
            .jobs()
            .find_by_external_id(&update.external_id)
            .map_err(|err| WebhookError::Retryable(err.to_string()))?
            .ok_or_else(|| {
                WebhookError::Retryable(format!(
                    "no generation for external id {}",
                    update.external_id
                ))
            })?;

        self.apply_update(generation.id, &update, UpdateSource::Webhook)
            .await
            .map_err(|err| WebhookError::Retryable(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use polyform_core::UserId;
    use polyform_infra::InMemoryCache;
    use polyform_jobs::generation::milestones;
    use polyform_jobs::{
        Generation, GenerationUpdate, InMemoryJobStore, JobStore, Phase, Project, WorkflowType,
    };
    use polyform_ledger::{
        InMemoryAccountStore, InMemoryTransactionStore, Ledger, LedgerConfig,
    };
    use polyform_providers::signature::sign;
    use polyform_providers::{MockGenerationProvider, ProviderUpdate};

    use crate::reconciler::ReconcileConfig;

    use super::*;

    const SECRET: &str = "whsec_test";

    fn reconciler_with_submitted_job() -> (Arc<Reconciler>, Generation) {
        let jobs: Arc<dyn JobStore> = InMemoryJobStore::arc();
        let ledger = Arc::new(Ledger::new(
            InMemoryAccountStore::arc(),
            InMemoryTransactionStore::arc(),
            LedgerConfig {
                starter_balance: 100,
                ..LedgerConfig::default()
            },
        ));

        let user = UserId::new();
        let project = Project::new(user, WorkflowType::ImageTo3d, json!({"image_url": "i"}));
        jobs.create_project(project.clone()).unwrap();
        let generation = Generation::new(
            user,
            project.id,
            WorkflowType::ImageTo3d,
            json!({"image_url": "i"}),
        );
        jobs.create_generation(generation.clone()).unwrap();
        let (_, generation) = jobs
            .apply(
                generation.id,
                GenerationUpdate::phase(Phase::Generating)
                    .with_progress(milestones::SUBMITTED)
                    .with_external_job_id("mesh-job-7"),
            )
            .unwrap();

        let reconciler = Arc::new(Reconciler::new(
            jobs,
            ledger,
            Arc::new(MockGenerationProvider::new("mesh")),
            InMemoryCache::arc(),
            ReconcileConfig::default(),
        ));
        (reconciler, generation)
    }

    fn signed(update: &ProviderUpdate) -> (Vec<u8>, String) {
        let body = serde_json::to_vec(update).unwrap();
        let signature = sign(&body, SECRET);
        (body, signature)
    }

    #[tokio::test]
    async fn signed_delivery_applies_and_replays_are_no_ops() {
        let (reconciler, generation) = reconciler_with_submitted_job();
        let update = ProviderUpdate::succeeded("mesh-job-7", vec!["https://cdn/m.glb".into()]);
        let (body, signature) = signed(&update);

        let applied = reconciler
            .handle_webhook(&body, &signature, SECRET)
            .await
            .unwrap();
        assert_eq!(applied.id, generation.id);
        assert_eq!(applied.phase, Phase::Completed);

        let replayed = reconciler
            .handle_webhook(&body, &signature, SECRET)
            .await
            .unwrap();
        assert_eq!(replayed.phase, Phase::Completed);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_not_retryable() {
        let (reconciler, _) = reconciler_with_submitted_job();
        let update = ProviderUpdate::succeeded("mesh-job-7", vec![]);
        let body = serde_json::to_vec(&update).unwrap();

        let err = reconciler
            .handle_webhook(&body, &sign(&body, "wrong_secret"), SECRET)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn unknown_external_id_asks_for_redelivery() {
        let (reconciler, _) = reconciler_with_submitted_job();
        let update = ProviderUpdate::succeeded("mesh-job-unseen", vec![]);
        let (body, signature) = signed(&update);

        let err = reconciler
            .handle_webhook(&body, &signature, SECRET)
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "delivery may have outrun the submit record");
    }

    #[tokio::test]
    async fn garbage_body_is_rejected() {
        let (reconciler, _) = reconciler_with_submitted_job();
        let body = b"{\"phase\": 3}".to_vec();
        let signature = sign(&body, SECRET);

        let err = reconciler
            .handle_webhook(&body, &signature, SECRET)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
