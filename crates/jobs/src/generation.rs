//! Project and Generation entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use polyform_core::{ErrorDetail, GenerationId, ProjectId, UserId};

/// The fixed step sequence a generation runs. Hard-coded per type, not
/// data-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowType {
    /// Prompt -> source image -> 3D model.
    #[serde(rename = "text_to_3d")]
    TextTo3d,
    /// Uploaded image -> 3D model.
    #[serde(rename = "image_to_3d")]
    ImageTo3d,
    /// Floorplan drawing -> 3D model.
    #[serde(rename = "floorplan_to_3d")]
    FloorplanTo3d,
}

impl WorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::TextTo3d => "text_to_3d",
            WorkflowType::ImageTo3d => "image_to_3d",
            WorkflowType::FloorplanTo3d => "floorplan_to_3d",
        }
    }
}

/// Where a generation is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl Phase {
    /// Terminal phases accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    /// Forward-only ordering used by the transition guard.
    fn rank(&self) -> u8 {
        match self {
            Phase::Pending => 0,
            Phase::Generating => 1,
            Phase::Completed | Phase::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` is a legal forward step.
    pub fn allows(&self, next: Phase) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

/// Progress milestones reported over a generation's lifetime. Monotonicity
/// is enforced by the store, so late reports of an earlier milestone are
/// harmless.
pub mod milestones {
    /// Engine picked the generation up.
    pub const STARTED: u8 = 25;
    /// External job submitted, id recorded.
    pub const SUBMITTED: u8 = 50;
    /// Provider reports the job running.
    pub const RUNNING: u8 = 75;
    /// Terminal success.
    pub const DONE: u8 = 100;
}

/// A thread of generations sharing one input. Ownership never transfers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub user_id: UserId,
    pub workflow_type: WorkflowType,
    pub input_data: Value,
    /// Incremented atomically with each sequence-number assignment.
    pub generation_count: u32,
    pub latest_generation_id: Option<GenerationId>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(user_id: UserId, workflow_type: WorkflowType, input_data: Value) -> Self {
        Self {
            id: ProjectId::new(),
            user_id,
            workflow_type,
            input_data,
            generation_count: 0,
            latest_generation_id: None,
            created_at: Utc::now(),
        }
    }
}

/// One run of a workflow. Created `pending`; mutated only through
/// `JobStore::apply`, which enforces the forward-only phase machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub id: GenerationId,
    pub user_id: UserId,
    pub project_id: ProjectId,
    pub workflow_type: WorkflowType,
    /// Assigned exactly once via the project-scoped counter.
    pub sequence_number: Option<u32>,
    pub phase: Phase,
    /// Monotonically non-decreasing, 0-100.
    pub progress_pct: u8,
    pub input_data: Value,
    /// Merge-only map; partial writes union into it, never overwrite it.
    pub output_data: Map<String, Value>,
    pub error_detail: Option<ErrorDetail>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Generation {
    pub fn new(
        user_id: UserId,
        project_id: ProjectId,
        workflow_type: WorkflowType,
        input_data: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: GenerationId::new(),
            user_id,
            project_id,
            workflow_type,
            sequence_number: None,
            phase: Phase::Pending,
            progress_pct: 0,
            input_data,
            output_data: Map::new(),
            error_detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The provider-side job id, once a submit step has recorded it.
    pub fn external_job_id(&self) -> Option<&str> {
        self.output_data
            .get(GenerationUpdate::EXTERNAL_JOB_ID)
            .and_then(Value::as_str)
    }
}

/// A partial write against a generation. Fields left unset are untouched;
/// `merge_output` is unioned field-by-field into the stored `output_data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationUpdate {
    pub phase: Option<Phase>,
    pub progress_pct: Option<u8>,
    #[serde(default)]
    pub merge_output: Map<String, Value>,
    pub error_detail: Option<ErrorDetail>,
}

impl GenerationUpdate {
    /// Well-known output field carrying the provider's job id.
    pub const EXTERNAL_JOB_ID: &'static str = "external_job_id";
    /// Well-known output field carrying the artifact URL list.
    pub const ARTIFACT_URLS: &'static str = "artifact_urls";

    pub fn phase(phase: Phase) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }

    pub fn progress(progress_pct: u8) -> Self {
        Self {
            progress_pct: Some(progress_pct),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress_pct: u8) -> Self {
        self.progress_pct = Some(progress_pct);
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, value: Value) -> Self {
        self.merge_output.insert(key.into(), value);
        self
    }

    pub fn with_error(mut self, detail: ErrorDetail) -> Self {
        self.error_detail = Some(detail);
        self
    }

    pub fn with_external_job_id(self, external_id: impl Into<String>) -> Self {
        let id = external_id.into();
        self.with_output(Self::EXTERNAL_JOB_ID, Value::String(id))
    }

    pub fn with_artifacts(self, urls: &[String]) -> Self {
        let list = urls.iter().cloned().map(Value::String).collect();
        self.with_output(Self::ARTIFACT_URLS, Value::Array(list))
    }
}
