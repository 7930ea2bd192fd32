//! Job storage: projects, generations, and the atomic operations the
//! workflow engine and reconciler both depend on.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use polyform_core::{CoreError, GenerationId, ProjectId};

use crate::generation::{Generation, GenerationUpdate, Project};

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),
    #[error("generation not found: {0}")]
    GenerationNotFound(GenerationId),
    #[error("already exists")]
    AlreadyExists,
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<JobStoreError> for CoreError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::ProjectNotFound(_) | JobStoreError::GenerationNotFound(_) => {
                CoreError::NotFound
            }
            other => CoreError::inconsistency(other.to_string()),
        }
    }
}

/// What an `apply` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// This write moved the generation into a terminal phase. Exactly one
    /// concurrent writer observes this; it owns the post-terminal side
    /// effects (billing).
    Transitioned,
    /// A non-terminal field update was applied.
    Updated,
    /// The record was already terminal; the write was accepted as a no-op
    /// so replayed webhooks stay idempotent.
    AlreadyTerminal,
}

/// Job store abstraction.
///
/// `assign_sequence_number` and `apply` are the two contended operations; an
/// implementation must make each a single atomic unit (one transaction, or
/// one critical section for the in-memory store).
pub trait JobStore: Send + Sync {
    fn create_project(&self, project: Project) -> Result<(), JobStoreError>;

    fn get_project(&self, project_id: ProjectId) -> Result<Option<Project>, JobStoreError>;

    fn create_generation(&self, generation: Generation) -> Result<(), JobStoreError>;

    fn get_generation(
        &self,
        generation_id: GenerationId,
    ) -> Result<Option<Generation>, JobStoreError>;

    fn list_generations(&self, project_id: ProjectId) -> Result<Vec<Generation>, JobStoreError>;

    /// Atomically increment the project's generation counter, stamp the
    /// number onto the generation, and record it as the project's latest.
    /// Two concurrent calls on the same project never receive the same
    /// number.
    fn assign_sequence_number(
        &self,
        project_id: ProjectId,
        generation_id: GenerationId,
    ) -> Result<u32, JobStoreError>;

    /// Apply a partial update under the phase-transition guard: terminal
    /// records are returned unchanged as `AlreadyTerminal`, progress never
    /// decreases, and `merge_output` unions field-by-field into the stored
    /// map.
    fn apply(
        &self,
        generation_id: GenerationId,
        update: GenerationUpdate,
    ) -> Result<(ApplyOutcome, Generation), JobStoreError>;

    /// Look up the generation a provider webhook refers to.
    fn find_by_external_id(&self, external_id: &str)
    -> Result<Option<Generation>, JobStoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    projects: HashMap<ProjectId, Project>,
    generations: HashMap<GenerationId, Generation>,
    by_external_id: HashMap<String, GenerationId>,
}

/// In-memory job store for tests/dev.
///
/// One lock guards projects, generations, and the external-id index so the
/// combined operations stay atomic.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl JobStore for InMemoryJobStore {
    fn create_project(&self, project: Project) -> Result<(), JobStoreError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        if inner.projects.contains_key(&project.id) {
            return Err(JobStoreError::AlreadyExists);
        }
        inner.projects.insert(project.id, project);
        Ok(())
    }

    fn get_project(&self, project_id: ProjectId) -> Result<Option<Project>, JobStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        Ok(inner.projects.get(&project_id).cloned())
    }

    fn create_generation(&self, generation: Generation) -> Result<(), JobStoreError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        if inner.generations.contains_key(&generation.id) {
            return Err(JobStoreError::AlreadyExists);
        }
        if !inner.projects.contains_key(&generation.project_id) {
            return Err(JobStoreError::ProjectNotFound(generation.project_id));
        }
        inner.generations.insert(generation.id, generation);
        Ok(())
    }

    fn get_generation(
        &self,
        generation_id: GenerationId,
    ) -> Result<Option<Generation>, JobStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        Ok(inner.generations.get(&generation_id).cloned())
    }

    fn list_generations(&self, project_id: ProjectId) -> Result<Vec<Generation>, JobStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        let mut result: Vec<_> = inner
            .generations
            .values()
            .filter(|g| g.project_id == project_id)
            .cloned()
            .collect();
        result.sort_by_key(|g| g.created_at);
        Ok(result)
    }

    fn assign_sequence_number(
        &self,
        project_id: ProjectId,
        generation_id: GenerationId,
    ) -> Result<u32, JobStoreError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;

        let project = inner
            .projects
            .get_mut(&project_id)
            .ok_or(JobStoreError::ProjectNotFound(project_id))?;
        project.generation_count += 1;
        project.latest_generation_id = Some(generation_id);
        let number = project.generation_count;

        let generation = inner
            .generations
            .get_mut(&generation_id)
            .ok_or(JobStoreError::GenerationNotFound(generation_id))?;
        generation.sequence_number = Some(number);
        generation.updated_at = Utc::now();

        Ok(number)
    }

    fn apply(
        &self,
        generation_id: GenerationId,
        update: GenerationUpdate,
    ) -> Result<(ApplyOutcome, Generation), JobStoreError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;

        let generation = inner
            .generations
            .get_mut(&generation_id)
            .ok_or(JobStoreError::GenerationNotFound(generation_id))?;

        if generation.phase.is_terminal() {
            return Ok((ApplyOutcome::AlreadyTerminal, generation.clone()));
        }

        let mut outcome = ApplyOutcome::Updated;

        if let Some(next) = update.phase {
            if generation.phase.allows(next) {
                if next.is_terminal() {
                    outcome = ApplyOutcome::Transitioned;
                }
                generation.phase = next;
            }
        }

        if let Some(progress) = update.progress_pct {
            generation.progress_pct = generation.progress_pct.max(progress.min(100));
        }

        for (key, value) in update.merge_output {
            generation.output_data.insert(key, value);
        }

        if let Some(detail) = update.error_detail {
            generation.error_detail = Some(detail);
        }

        generation.updated_at = Utc::now();

        let snapshot = generation.clone();
        if let Some(external_id) = snapshot.external_job_id() {
            inner
                .by_external_id
                .insert(external_id.to_string(), generation_id);
        }

        Ok((outcome, snapshot))
    }

    fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Generation>, JobStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        Ok(inner
            .by_external_id
            .get(external_id)
            .and_then(|id| inner.generations.get(id))
            .cloned())
    }
}
