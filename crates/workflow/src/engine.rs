//! The workflow engine.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use polyform_core::{
    CoreError, CoreResult, ErrorDetail, GenerationId, ProjectId, RetryPolicy, UserId,
};
use polyform_jobs::generation::milestones;
use polyform_jobs::{Generation, GenerationUpdate, JobStore, Phase, Project, WorkflowType};
use polyform_ledger::Ledger;
use polyform_providers::{ExternalPhase, GenerationProvider, ProviderError, ProviderUpdate};
use polyform_reconcile::{Reconciler, UpdateSource};

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for a single provider call.
    pub step_timeout: Duration,
    /// Gap between polls while awaiting an external job.
    pub poll_interval: Duration,
    /// Overall limit on awaiting one external job.
    pub await_budget: Duration,
    /// Backoff for transient step failures.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            await_budget: Duration::from_secs(10 * 60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Request to start a generation. A `project_id` reruns the workflow inside
/// an existing project; otherwise a fresh project is opened.
#[derive(Debug, Clone)]
pub struct CreateGeneration {
    pub workflow_type: WorkflowType,
    pub input_data: Value,
    pub project_id: Option<ProjectId>,
}

/// Output field holding the rendered source image for the text workflow.
pub const SOURCE_IMAGE_URL: &str = "source_image_url";

/// Drives a generation through its fixed step sequence.
pub struct WorkflowEngine {
    jobs: Arc<dyn JobStore>,
    ledger: Arc<Ledger>,
    providers: crate::ProviderRegistry,
    reconciler: Arc<Reconciler>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        ledger: Arc<Ledger>,
        providers: crate::ProviderRegistry,
        reconciler: Arc<Reconciler>,
        config: EngineConfig,
    ) -> Self {
        Self {
            jobs,
            ledger,
            providers,
            reconciler,
            config,
        }
    }

    /// Create a pending generation: validate input, check the user can
    /// afford the run, open or reuse the project, and assign the sequence
    /// number. The actual debit happens only after a billable success.
    pub async fn create(
        &self,
        user_id: UserId,
        request: CreateGeneration,
    ) -> CoreResult<Generation> {
        validate_input(request.workflow_type, &request.input_data)?;

        let cost = self.reconciler.cost_for(request.workflow_type);
        let balance = self.ledger.balance(user_id).await?;
        if balance < cost {
            return Err(CoreError::InsufficientCredits {
                required: cost,
                available: balance,
            });
        }

        let project = match request.project_id {
            Some(project_id) => {
                let project = self
                    .jobs
                    .get_project(project_id)?
                    .filter(|p| p.user_id == user_id)
                    .ok_or(CoreError::NotFound)?;
                if project.workflow_type != request.workflow_type {
                    return Err(CoreError::validation(format!(
                        "project runs {}, not {}",
                        project.workflow_type.as_str(),
                        request.workflow_type.as_str()
                    )));
                }
                project
            }
            None => {
                let project = Project::new(
                    user_id,
                    request.workflow_type,
                    request.input_data.clone(),
                );
                self.jobs.create_project(project.clone())?;
                project
            }
        };

        let generation = Generation::new(
            user_id,
            project.id,
            request.workflow_type,
            request.input_data,
        );
        self.jobs.create_generation(generation.clone())?;
        let sequence = self.jobs.assign_sequence_number(project.id, generation.id)?;

        info!(
            generation_id = %generation.id,
            project_id = %project.id,
            workflow = request.workflow_type.as_str(),
            sequence,
            "generation created"
        );

        self.jobs
            .get_generation(generation.id)?
            .ok_or_else(|| CoreError::inconsistency("generation vanished after creation"))
    }

    /// Run the step sequence to a terminal phase. Any step error lands the
    /// generation in `failed` with a structured detail; the returned record
    /// is always terminal.
    pub async fn run(&self, generation_id: GenerationId) -> CoreResult<Generation> {
        let generation = self
            .jobs
            .get_generation(generation_id)?
            .ok_or(CoreError::NotFound)?;
        if generation.phase.is_terminal() {
            return Ok(generation);
        }

        match self.drive(&generation).await {
            Ok(finished) => Ok(finished),
            Err(err) => {
                let detail = ErrorDetail::from(&err);
                self.reconciler.fail(generation_id, detail).await
            }
        }
    }

    async fn drive(&self, generation: &Generation) -> CoreResult<Generation> {
        self.jobs.apply(
            generation.id,
            GenerationUpdate::phase(Phase::Generating).with_progress(milestones::STARTED),
        )?;

        let submit_input = match generation.workflow_type {
            WorkflowType::TextTo3d => {
                let image_url = self.generate_source_image(generation).await?;
                self.jobs.apply(
                    generation.id,
                    GenerationUpdate::default()
                        .with_output(SOURCE_IMAGE_URL, Value::String(image_url.clone())),
                )?;
                with_field(&generation.input_data, "image_url", image_url)
            }
            WorkflowType::ImageTo3d | WorkflowType::FloorplanTo3d => {
                generation.input_data.clone()
            }
        };

        let model = self.providers.model.clone();
        let external_id = self
            .with_retry("model_submit", || {
                let model = model.clone();
                let input = submit_input.clone();
                async move { model.submit(&input).await }
            })
            .await?;
        self.jobs.apply(
            generation.id,
            GenerationUpdate::progress(milestones::SUBMITTED)
                .with_external_job_id(external_id.clone()),
        )?;
        debug!(generation_id = %generation.id, external_id = %external_id, "model job submitted");

        self.await_completion(generation.id, &external_id).await
    }

    /// Render the source image for a text prompt and return its URL.
    async fn generate_source_image(&self, generation: &Generation) -> CoreResult<String> {
        let image = self.providers.image.clone();
        let input = generation.input_data.clone();
        let job_id = self
            .with_retry("image_submit", || {
                let image = image.clone();
                let input = input.clone();
                async move { image.submit(&input).await }
            })
            .await?;

        let update = self.await_external(&self.providers.image, &job_id).await?;
        match update.phase {
            ExternalPhase::Succeeded => update
                .artifact_urls
                .first()
                .cloned()
                .ok_or_else(|| CoreError::inconsistency("image job succeeded without an artifact")),
            _ => Err(CoreError::transient(
                update
                    .error_detail
                    .unwrap_or_else(|| "image generation failed".to_string()),
            )),
        }
    }

    /// Poll an intermediate external job (no generation writes) until it is
    /// terminal.
    async fn await_external(
        &self,
        provider: &Arc<dyn GenerationProvider>,
        external_id: &str,
    ) -> CoreResult<ProviderUpdate> {
        let started = Instant::now();
        loop {
            let p = provider.clone();
            let id = external_id.to_string();
            let update = self
                .with_retry("poll", || {
                    let p = p.clone();
                    let id = id.clone();
                    async move { p.poll(&id).await }
                })
                .await?;
            if update.phase.is_terminal() {
                return Ok(update);
            }
            if started.elapsed() > self.config.await_budget {
                return Err(CoreError::timeout(format!(
                    "external job {external_id} did not finish in time"
                )));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Poll the model job, persisting every report through the reconciler so
    /// milestones are visible to readers and the terminal transition settles
    /// exactly once even if a webhook lands first.
    async fn await_completion(
        &self,
        generation_id: GenerationId,
        external_id: &str,
    ) -> CoreResult<Generation> {
        let model = self.providers.model.clone();
        let started = Instant::now();
        loop {
            let p = model.clone();
            let id = external_id.to_string();
            let update = self
                .with_retry("poll", || {
                    let p = p.clone();
                    let id = id.clone();
                    async move { p.poll(&id).await }
                })
                .await?;

            let generation = self
                .reconciler
                .apply_update(generation_id, &update, UpdateSource::Poll)
                .await?;
            if generation.phase.is_terminal() {
                return Ok(generation);
            }
            if started.elapsed() > self.config.await_budget {
                return Err(CoreError::timeout(
                    "generation did not finish within the await budget".to_string(),
                ));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One network step: per-call deadline, bounded backoff for transient
    /// failures, immediate abort on anything else.
    async fn with_retry<T, F, Fut>(&self, step: &str, op: F) -> CoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let failure = match tokio::time::timeout(self.config.step_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if err.is_transient() => CoreError::from(err),
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => CoreError::timeout(format!("step {step} exceeded its call deadline")),
            };

            attempt += 1;
            if !self.config.retry.should_retry(attempt) {
                warn!(step, attempts = attempt, error = %failure, "step retries exhausted");
                return Err(failure);
            }
            debug!(step, attempt, error = %failure, "transient step failure, backing off");
            tokio::time::sleep(self.config.retry.delay_for_attempt(attempt)).await;
        }
    }
}

fn validate_input(workflow_type: WorkflowType, input: &Value) -> CoreResult<()> {
    let field = match workflow_type {
        WorkflowType::TextTo3d => "prompt",
        WorkflowType::ImageTo3d => "image_url",
        WorkflowType::FloorplanTo3d => "floorplan_url",
    };
    match input.get(field).and_then(Value::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(()),
        _ => Err(CoreError::validation(format!("{field} is required"))),
    }
}

fn with_field(input: &Value, key: &str, value: String) -> Value {
    let mut object = match input {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    object.insert(key.to_string(), Value::String(value));
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProviderRegistry;
    use polyform_core::ErrorCategory;
    use polyform_infra::InMemoryCache;
    use polyform_jobs::InMemoryJobStore;
    use polyform_ledger::{
        InMemoryAccountStore, InMemoryTransactionStore, LedgerConfig, TransactionKind,
    };
    use polyform_providers::MockGenerationProvider;
    use polyform_reconcile::ReconcileConfig;
    use serde_json::json;

    struct Harness {
        engine: WorkflowEngine,
        ledger: Arc<Ledger>,
        image: Arc<MockGenerationProvider>,
        model: Arc<MockGenerationProvider>,
        user: UserId,
    }

    fn harness(starter_balance: u64) -> Harness {
        let jobs: Arc<dyn JobStore> = InMemoryJobStore::arc();
        let ledger = Arc::new(Ledger::new(
            InMemoryAccountStore::arc(),
            InMemoryTransactionStore::arc(),
            LedgerConfig {
                starter_balance,
                ..LedgerConfig::default()
            },
        ));
        let image = Arc::new(MockGenerationProvider::new("img"));
        let model = Arc::new(MockGenerationProvider::new("mesh"));
        let reconciler = Arc::new(Reconciler::new(
            jobs.clone(),
            ledger.clone(),
            model.clone(),
            InMemoryCache::arc(),
            ReconcileConfig::default(),
        ));
        let engine = WorkflowEngine::new(
            jobs,
            ledger.clone(),
            ProviderRegistry::new(image.clone(), model.clone()),
            reconciler,
            EngineConfig {
                step_timeout: Duration::from_millis(200),
                poll_interval: Duration::from_millis(1),
                await_budget: Duration::from_millis(500),
                retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
            },
        );
        Harness {
            engine,
            ledger,
            image,
            model,
            user: UserId::new(),
        }
    }

    fn text_request() -> CreateGeneration {
        CreateGeneration {
            workflow_type: WorkflowType::TextTo3d,
            input_data: json!({"prompt": "a walnut chair"}),
            project_id: None,
        }
    }

    fn image_request() -> CreateGeneration {
        CreateGeneration {
            workflow_type: WorkflowType::ImageTo3d,
            input_data: json!({"image_url": "https://cdn/in.png"}),
            project_id: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_missing_input_field() {
        let h = harness(100);
        let err = h
            .engine
            .create(
                h.user,
                CreateGeneration {
                    workflow_type: WorkflowType::TextTo3d,
                    input_data: json!({"prompt": "  "}),
                    project_id: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn create_rejects_unaffordable_run_upfront() {
        let h = harness(5);
        let err = h.engine.create(h.user, text_request()).await.unwrap_err();
        assert!(matches!(err, CoreError::InsufficientCredits { .. }));
    }

    #[tokio::test]
    async fn text_workflow_runs_to_completion_and_charges_after_success() {
        let h = harness(100);
        h.image.push_poll(Ok(ProviderUpdate::succeeded(
            "img-job-1",
            vec!["https://cdn/source.png".into()],
        )));
        h.model.push_poll(Ok(ProviderUpdate::running("mesh-job-1", 60)));
        h.model.push_poll(Ok(ProviderUpdate::succeeded(
            "mesh-job-1",
            vec!["https://cdn/model.glb".into()],
        )));

        let generation = h.engine.create(h.user, text_request()).await.unwrap();
        assert_eq!(generation.sequence_number, Some(1));
        assert_eq!(h.ledger.balance(h.user).await.unwrap(), 100, "no charge before success");

        let finished = h.engine.run(generation.id).await.unwrap();
        assert_eq!(finished.phase, Phase::Completed);
        assert_eq!(finished.progress_pct, 100);
        assert_eq!(
            finished.output_data.get(SOURCE_IMAGE_URL),
            Some(&json!("https://cdn/source.png"))
        );
        assert!(finished.output_data.contains_key(GenerationUpdate::ARTIFACT_URLS));
        assert_eq!(finished.external_job_id(), Some("mesh-job-1"));

        // The model job received the rendered image alongside the prompt.
        let submitted = h.model.submitted();
        assert_eq!(submitted[0]["image_url"], json!("https://cdn/source.png"));
        assert_eq!(submitted[0]["prompt"], json!("a walnut chair"));

        let cost = h.ledger.completed_usage(finished.id).unwrap().unwrap();
        assert_eq!(cost.kind, TransactionKind::Usage);
        assert_eq!(h.ledger.balance(h.user).await.unwrap(), 100 - cost.amount.unsigned_abs());
    }

    #[tokio::test]
    async fn image_workflow_skips_the_image_step() {
        let h = harness(100);
        h.model.push_poll(Ok(ProviderUpdate::succeeded(
            "mesh-job-1",
            vec!["https://cdn/model.glb".into()],
        )));

        let generation = h.engine.create(h.user, image_request()).await.unwrap();
        let finished = h.engine.run(generation.id).await.unwrap();

        assert_eq!(finished.phase, Phase::Completed);
        assert_eq!(h.image.poll_count(), 0);
        assert!(h.image.submitted().is_empty());
    }

    #[tokio::test]
    async fn rejected_submit_fails_without_charge() {
        let h = harness(100);
        h.model
            .fail_submit(ProviderError::Validation("unsupported mesh format".into()));

        let generation = h.engine.create(h.user, image_request()).await.unwrap();
        let finished = h.engine.run(generation.id).await.unwrap();

        assert_eq!(finished.phase, Phase::Failed);
        assert_eq!(
            finished.error_detail.unwrap().category,
            ErrorCategory::Validation
        );
        assert_eq!(h.ledger.balance(h.user).await.unwrap(), 100);
        assert!(h.ledger.transactions(h.user).unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_submit_exhaustion_fails_with_provider_category() {
        let h = harness(100);
        h.model
            .fail_submit(ProviderError::Transient("upstream 503".into()));

        let generation = h.engine.create(h.user, image_request()).await.unwrap();
        let finished = h.engine.run(generation.id).await.unwrap();

        assert_eq!(finished.phase, Phase::Failed);
        assert_eq!(
            finished.error_detail.unwrap().category,
            ErrorCategory::Provider
        );
        assert_eq!(h.ledger.balance(h.user).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn provider_reported_failure_lands_in_failed_without_charge() {
        let h = harness(100);
        h.model
            .push_poll(Ok(ProviderUpdate::failed("mesh-job-1", "mesh exploded")));

        let generation = h.engine.create(h.user, image_request()).await.unwrap();
        let finished = h.engine.run(generation.id).await.unwrap();

        assert_eq!(finished.phase, Phase::Failed);
        let detail = finished.error_detail.unwrap();
        assert_eq!(detail.category, ErrorCategory::Provider);
        assert!(detail.message.contains("mesh exploded"));
        assert_eq!(h.ledger.balance(h.user).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn stuck_model_job_times_out_into_failed() {
        // Empty poll script: the mock keeps answering "running".
        let h = harness(100);

        let generation = h.engine.create(h.user, image_request()).await.unwrap();
        let finished = h.engine.run(generation.id).await.unwrap();

        assert_eq!(finished.phase, Phase::Failed);
        assert_eq!(
            finished.error_detail.unwrap().category,
            ErrorCategory::Timeout
        );
        assert_eq!(h.ledger.balance(h.user).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn rerun_in_existing_project_gets_the_next_sequence_number() {
        let h = harness(100);
        let first = h.engine.create(h.user, image_request()).await.unwrap();

        let second = h
            .engine
            .create(
                h.user,
                CreateGeneration {
                    project_id: Some(first.project_id),
                    ..image_request()
                },
            )
            .await
            .unwrap();

        assert_eq!(second.project_id, first.project_id);
        assert_eq!(second.sequence_number, Some(2));
    }

    #[tokio::test]
    async fn foreign_project_is_invisible() {
        let h = harness(100);
        let first = h.engine.create(h.user, image_request()).await.unwrap();

        let err = h
            .engine
            .create(
                UserId::new(),
                CreateGeneration {
                    project_id: Some(first.project_id),
                    ..image_request()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound));
    }

    #[tokio::test]
    async fn project_workflow_type_must_match() {
        let h = harness(100);
        let first = h.engine.create(h.user, image_request()).await.unwrap();

        let err = h
            .engine
            .create(
                h.user,
                CreateGeneration {
                    project_id: Some(first.project_id),
                    ..text_request()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
