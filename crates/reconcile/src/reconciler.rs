//! The reconciler: one write path for every status report.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use polyform_core::{CoreError, CoreResult, ErrorCategory, ErrorDetail, GenerationId};
use polyform_infra::Cache;
use polyform_jobs::generation::milestones;
use polyform_jobs::{ApplyOutcome, CostSchedule, Generation, GenerationUpdate, JobStore, Phase, WorkflowType};
use polyform_ledger::{Correlation, Ledger};
use polyform_providers::{ExternalPhase, GenerationProvider, ProviderUpdate};

/// Where a status report came from. Only used for logs; both sources share
/// one code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Webhook,
    Poll,
}

impl UpdateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateSource::Webhook => "webhook",
            UpdateSource::Poll => "poll",
        }
    }
}

/// Reconciler tuning.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Minimum gap between provider polls for one generation. Webhook
    /// arrivals do not reset it.
    pub poll_cooldown: Duration,
    /// Wall-clock limit from creation to a terminal phase; exceeded records
    /// fail with a timeout category.
    pub completion_budget: Duration,
    pub costs: CostSchedule,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_cooldown: Duration::from_secs(10),
            completion_budget: Duration::from_secs(15 * 60),
            costs: CostSchedule::default(),
        }
    }
}

/// Applies provider status to generations and settles credits on terminal
/// transitions.
pub struct Reconciler {
    jobs: Arc<dyn JobStore>,
    ledger: Arc<Ledger>,
    provider: Arc<dyn GenerationProvider>,
    cache: Arc<dyn Cache>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        ledger: Arc<Ledger>,
        provider: Arc<dyn GenerationProvider>,
        cache: Arc<dyn Cache>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            jobs,
            ledger,
            provider,
            cache,
            config,
        }
    }

    pub fn cost_for(&self, workflow_type: WorkflowType) -> u64 {
        self.config.costs.cost_for(workflow_type)
    }

    pub(crate) fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub(crate) fn provider(&self) -> &Arc<dyn GenerationProvider> {
        &self.provider
    }

    /// Apply one provider status report.
    ///
    /// Replays and late deliveries against a terminal record are accepted as
    /// no-ops. When this call itself performs the terminal transition it
    /// settles credits: debit on success, refund of any pre-debit on failure.
    pub async fn apply_update(
        &self,
        generation_id: GenerationId,
        update: &ProviderUpdate,
        source: UpdateSource,
    ) -> CoreResult<Generation> {
        let patch = translate(update);
        let (outcome, generation) = self.jobs.apply(generation_id, patch)?;

        match outcome {
            ApplyOutcome::Transitioned => {
                info!(
                    %generation_id,
                    source = source.as_str(),
                    phase = ?generation.phase,
                    "generation reached terminal phase"
                );
                match generation.phase {
                    Phase::Completed => self.settle_success(&generation).await,
                    Phase::Failed => self.refund_if_debited(&generation).await,
                    _ => {}
                }
            }
            ApplyOutcome::AlreadyTerminal => {
                debug!(
                    %generation_id,
                    source = source.as_str(),
                    "report after terminal phase ignored"
                );
            }
            ApplyOutcome::Updated => {
                debug!(
                    %generation_id,
                    source = source.as_str(),
                    progress = generation.progress_pct,
                    "generation progressed"
                );
            }
        }

        Ok(generation)
    }

    /// Force a generation into `failed` with the given detail. Used by the
    /// engine when a step errors out and by the completion-budget check.
    pub async fn fail(
        &self,
        generation_id: GenerationId,
        detail: ErrorDetail,
    ) -> CoreResult<Generation> {
        let patch = GenerationUpdate::phase(Phase::Failed).with_error(detail);
        let (outcome, generation) = self.jobs.apply(generation_id, patch)?;

        if outcome == ApplyOutcome::Transitioned {
            warn!(
                %generation_id,
                category = ?generation.error_detail.as_ref().map(|d| d.category),
                "generation failed"
            );
            self.refund_if_debited(&generation).await;
        }
        Ok(generation)
    }

    /// Lazy reconcile-on-read.
    ///
    /// For a non-terminal record with a known external job id, polls the
    /// provider unless a poll ran within the cooldown window. Records past
    /// the completion budget are failed with a timeout category instead.
    pub async fn refresh_if_stale(&self, generation_id: GenerationId) -> CoreResult<Generation> {
        let generation = self
            .jobs
            .get_generation(generation_id)?
            .ok_or(CoreError::NotFound)?;

        if generation.phase.is_terminal() {
            return Ok(generation);
        }

        let budget = chrono::Duration::from_std(self.config.completion_budget)
            .unwrap_or(chrono::Duration::MAX);
        if Utc::now().signed_duration_since(generation.created_at) > budget {
            return self
                .fail(
                    generation_id,
                    ErrorDetail::new(
                        ErrorCategory::Timeout,
                        "generation exceeded its completion deadline",
                    ),
                )
                .await;
        }

        let Some(external_id) = generation.external_job_id().map(str::to_string) else {
            // Not submitted yet; nothing to poll.
            return Ok(generation);
        };

        let cooldown_key = format!("poll_cooldown:{generation_id}");
        match self.cache.get(&cooldown_key).await {
            Ok(Some(_)) => return Ok(generation),
            Ok(None) => {}
            // A broken cache must not block reads; poll without the claim.
            Err(err) => warn!(%generation_id, error = %err, "cooldown lookup failed"),
        }
        // Claim the window before polling so concurrent readers do not
        // stampede the provider.
        if let Err(err) = self
            .cache
            .set(&cooldown_key, "1", self.config.poll_cooldown)
            .await
        {
            warn!(%generation_id, error = %err, "cooldown claim failed");
        }

        match self.provider.poll(&external_id).await {
            Ok(update) => {
                self.apply_update(generation_id, &update, UpdateSource::Poll)
                    .await
            }
            Err(err) => {
                // Served from the stored record; the next read after the
                // cooldown retries.
                debug!(%generation_id, error = %err, "poll failed, serving stored record");
                Ok(generation)
            }
        }
    }

    /// Debit the generation's cost after a billable success. The record is
    /// already terminal, so a charge failure is logged for offline
    /// reconciliation rather than unwound.
    async fn settle_success(&self, generation: &Generation) {
        match self.ledger.has_completed_usage(generation.id) {
            Ok(true) => {
                debug!(generation_id = %generation.id, "usage already recorded, skipping debit");
                return;
            }
            Ok(false) => {}
            Err(err) => {
                error!(generation_id = %generation.id, error = %err, "usage lookup failed, skipping debit");
                return;
            }
        }

        let cost = self.cost_for(generation.workflow_type);
        let correlation = Correlation::for_generation(generation.project_id, generation.id);
        match self
            .ledger
            .debit(generation.user_id, cost, correlation)
            .await
        {
            Ok(balance) => {
                info!(generation_id = %generation.id, cost, balance, "charged completed generation");
            }
            Err(err) => {
                error!(
                    generation_id = %generation.id,
                    cost,
                    error = %err,
                    "completed generation could not be charged"
                );
            }
        }
    }

    /// Return credits if a usage transaction exists for this generation.
    /// No-op otherwise; under debit-after-success a failure normally
    /// precedes any debit.
    async fn refund_if_debited(&self, generation: &Generation) {
        let usage = match self.ledger.completed_usage(generation.id) {
            Ok(usage) => usage,
            Err(err) => {
                error!(generation_id = %generation.id, error = %err, "usage lookup failed, skipping refund");
                return;
            }
        };
        let Some(transaction) = usage else { return };

        let amount = transaction.amount.unsigned_abs();
        let correlation = Correlation::for_generation(generation.project_id, generation.id);
        match self
            .ledger
            .refund(generation.user_id, amount, correlation)
            .await
        {
            Ok(balance) => {
                info!(generation_id = %generation.id, amount, balance, "refunded failed generation");
            }
            Err(err) => {
                error!(generation_id = %generation.id, amount, error = %err, "refund failed");
            }
        }
    }
}

/// Map a provider report onto the generation state machine.
fn translate(update: &ProviderUpdate) -> GenerationUpdate {
    match update.phase {
        ExternalPhase::Queued => {
            GenerationUpdate::phase(Phase::Generating).with_progress(milestones::SUBMITTED)
        }
        ExternalPhase::Running => GenerationUpdate::phase(Phase::Generating)
            .with_progress(milestones::RUNNING.max(update.progress_pct.min(99))),
        ExternalPhase::Succeeded => GenerationUpdate::phase(Phase::Completed)
            .with_progress(milestones::DONE)
            .with_artifacts(&update.artifact_urls),
        ExternalPhase::Failed => {
            let message = update
                .error_detail
                .clone()
                .unwrap_or_else(|| "provider reported failure".to_string());
            GenerationUpdate::phase(Phase::Failed)
                .with_error(ErrorDetail::new(ErrorCategory::Provider, message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyform_core::UserId;
    use polyform_infra::{CacheError, InMemoryCache};
    use polyform_jobs::{InMemoryJobStore, Project};
    use polyform_ledger::store::{InMemoryAccountStore, InMemoryTransactionStore};
    use polyform_ledger::{LedgerConfig, TransactionKind};
    use polyform_providers::{MockGenerationProvider, ProviderError};
    use serde_json::json;

    struct Harness {
        reconciler: Arc<Reconciler>,
        ledger: Arc<Ledger>,
        provider: Arc<MockGenerationProvider>,
        user: UserId,
        generation: Generation,
    }

    async fn harness_with_cache(
        config: ReconcileConfig,
        starter_balance: u64,
        cache: Arc<dyn Cache>,
    ) -> Harness {
        let jobs: Arc<dyn JobStore> = InMemoryJobStore::arc();
        let ledger = Arc::new(Ledger::new(
            InMemoryAccountStore::arc(),
            InMemoryTransactionStore::arc(),
            LedgerConfig {
                starter_balance,
                ..LedgerConfig::default()
            },
        ));
        let provider = Arc::new(MockGenerationProvider::new("mesh"));

        let user = UserId::new();
        let project = Project::new(user, WorkflowType::TextTo3d, json!({"prompt": "a chair"}));
        jobs.create_project(project.clone()).unwrap();
        let generation = Generation::new(
            user,
            project.id,
            WorkflowType::TextTo3d,
            json!({"prompt": "a chair"}),
        );
        jobs.create_generation(generation.clone()).unwrap();
        // Simulate a submitted job awaiting completion.
        let (_, generation) = jobs
            .apply(
                generation.id,
                GenerationUpdate::phase(Phase::Generating)
                    .with_progress(milestones::SUBMITTED)
                    .with_external_job_id("mesh-job-1"),
            )
            .unwrap();

        let reconciler = Arc::new(Reconciler::new(
            jobs,
            ledger.clone(),
            provider.clone(),
            cache,
            config,
        ));

        Harness {
            reconciler,
            ledger,
            provider,
            user,
            generation,
        }
    }

    async fn harness_with(config: ReconcileConfig, starter_balance: u64) -> Harness {
        harness_with_cache(config, starter_balance, InMemoryCache::arc()).await
    }

    async fn harness() -> Harness {
        harness_with(ReconcileConfig::default(), 100).await
    }

    #[tokio::test]
    async fn success_report_completes_and_charges_once() {
        let h = harness().await;
        let update = ProviderUpdate::succeeded("mesh-job-1", vec!["https://cdn/m.glb".into()]);

        let generation = h
            .reconciler
            .apply_update(h.generation.id, &update, UpdateSource::Webhook)
            .await
            .unwrap();
        assert_eq!(generation.phase, Phase::Completed);
        assert_eq!(generation.progress_pct, 100);
        assert!(generation.output_data.contains_key(GenerationUpdate::ARTIFACT_URLS));

        let cost = h.reconciler.cost_for(WorkflowType::TextTo3d);
        assert_eq!(h.ledger.balance(h.user).await.unwrap(), 100 - cost);

        // Replayed delivery: no second charge, record unchanged.
        let replayed = h
            .reconciler
            .apply_update(h.generation.id, &update, UpdateSource::Webhook)
            .await
            .unwrap();
        assert_eq!(replayed.phase, Phase::Completed);
        assert_eq!(h.ledger.balance(h.user).await.unwrap(), 100 - cost);
    }

    #[tokio::test]
    async fn failure_report_records_detail_and_never_charges() {
        let h = harness().await;
        let update = ProviderUpdate::failed("mesh-job-1", "mesh decimation blew up");

        let generation = h
            .reconciler
            .apply_update(h.generation.id, &update, UpdateSource::Poll)
            .await
            .unwrap();
        assert_eq!(generation.phase, Phase::Failed);
        let detail = generation.error_detail.unwrap();
        assert_eq!(detail.category, ErrorCategory::Provider);
        assert!(detail.message.contains("mesh decimation"));

        assert_eq!(h.ledger.balance(h.user).await.unwrap(), 100);
        assert!(h.ledger.transactions(h.user).unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn webhook_and_poll_race_settles_exactly_once() {
        let h = harness().await;
        let update = ProviderUpdate::succeeded("mesh-job-1", vec!["https://cdn/m.glb".into()]);

        let mut handles = Vec::new();
        for source in [UpdateSource::Webhook, UpdateSource::Poll] {
            let reconciler = h.reconciler.clone();
            let update = update.clone();
            let id = h.generation.id;
            handles.push(tokio::spawn(async move {
                reconciler.apply_update(id, &update, source).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let cost = h.reconciler.cost_for(WorkflowType::TextTo3d);
        assert_eq!(h.ledger.balance(h.user).await.unwrap(), 100 - cost);
        let usage: Vec<_> = h
            .ledger
            .transactions(h.user)
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == TransactionKind::Usage)
            .collect();
        assert_eq!(usage.len(), 1, "race must not double-charge");
    }

    #[tokio::test]
    async fn fail_refunds_a_pre_debit() {
        let h = harness().await;
        let correlation =
            Correlation::for_generation(h.generation.project_id, h.generation.id);
        h.ledger.debit(h.user, 30, correlation).await.unwrap();
        assert_eq!(h.ledger.balance(h.user).await.unwrap(), 70);

        h.reconciler
            .fail(
                h.generation.id,
                ErrorDetail::new(ErrorCategory::Timeout, "step deadline exceeded"),
            )
            .await
            .unwrap();

        assert_eq!(h.ledger.balance(h.user).await.unwrap(), 100);
        let kinds: Vec<_> = h
            .ledger
            .transactions(h.user)
            .unwrap()
            .iter()
            .map(|t| t.kind)
            .collect();
        assert_eq!(kinds, vec![TransactionKind::Usage, TransactionKind::Refund]);
    }

    #[tokio::test]
    async fn refresh_polls_then_respects_cooldown() {
        let h = harness().await;
        h.provider
            .push_poll(Ok(ProviderUpdate::running("mesh-job-1", 80)));

        let generation = h.reconciler.refresh_if_stale(h.generation.id).await.unwrap();
        assert_eq!(generation.phase, Phase::Generating);
        assert_eq!(generation.progress_pct, 80);
        assert_eq!(h.provider.poll_count(), 1);

        // Second read inside the cooldown serves the stored record.
        h.reconciler.refresh_if_stale(h.generation.id).await.unwrap();
        assert_eq!(h.provider.poll_count(), 1);
    }

    #[tokio::test]
    async fn refresh_skips_terminal_and_unsubmitted_records() {
        let h = harness().await;
        h.reconciler
            .apply_update(
                h.generation.id,
                &ProviderUpdate::succeeded("mesh-job-1", vec![]),
                UpdateSource::Webhook,
            )
            .await
            .unwrap();
        h.reconciler.refresh_if_stale(h.generation.id).await.unwrap();
        assert_eq!(h.provider.poll_count(), 0, "terminal records are never polled");
    }

    #[tokio::test]
    async fn refresh_fails_records_past_the_completion_budget() {
        let h = harness_with(
            ReconcileConfig {
                completion_budget: Duration::ZERO,
                ..ReconcileConfig::default()
            },
            100,
        )
        .await;

        let generation = h.reconciler.refresh_if_stale(h.generation.id).await.unwrap();
        assert_eq!(generation.phase, Phase::Failed);
        assert_eq!(
            generation.error_detail.unwrap().category,
            ErrorCategory::Timeout
        );
        assert_eq!(h.provider.poll_count(), 0);
    }

    #[tokio::test]
    async fn broken_cache_does_not_block_refresh() {
        struct BrokenCache;

        #[async_trait::async_trait]
        impl Cache for BrokenCache {
            async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
                Err(CacheError::Storage("cache down".into()))
            }
            async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
                Err(CacheError::Storage("cache down".into()))
            }
            async fn invalidate(&self, _key: &str) -> Result<(), CacheError> {
                Err(CacheError::Storage("cache down".into()))
            }
        }

        let h = harness_with_cache(ReconcileConfig::default(), 100, Arc::new(BrokenCache)).await;
        h.provider
            .push_poll(Ok(ProviderUpdate::running("mesh-job-1", 80)));

        let generation = h.reconciler.refresh_if_stale(h.generation.id).await.unwrap();
        assert_eq!(generation.progress_pct, 80);
        assert_eq!(h.provider.poll_count(), 1);

        // With no cooldown claim possible every read polls; none may error.
        h.reconciler.refresh_if_stale(h.generation.id).await.unwrap();
        assert_eq!(h.provider.poll_count(), 2);
    }

    #[tokio::test]
    async fn transient_poll_failure_serves_stored_record() {
        let h = harness().await;
        h.provider
            .push_poll(Err(ProviderError::Transient("connection reset".into())));

        let generation = h.reconciler.refresh_if_stale(h.generation.id).await.unwrap();
        assert_eq!(generation.phase, Phase::Generating);
        assert!(!generation.phase.is_terminal());
    }

    #[tokio::test]
    async fn unknown_generation_is_not_found() {
        let h = harness().await;
        let err = h
            .reconciler
            .refresh_if_stale(GenerationId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound));
    }
}
