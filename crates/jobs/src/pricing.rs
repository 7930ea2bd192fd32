//! Credit prices per workflow type.

use serde::{Deserialize, Serialize};

use crate::generation::WorkflowType;

/// Credit cost charged for one billable generation of each type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostSchedule {
    pub text_to_3d: u64,
    pub image_to_3d: u64,
    pub floorplan_to_3d: u64,
}

impl Default for CostSchedule {
    fn default() -> Self {
        Self {
            text_to_3d: 25,
            image_to_3d: 20,
            floorplan_to_3d: 40,
        }
    }
}

impl CostSchedule {
    pub fn cost_for(&self, workflow_type: WorkflowType) -> u64 {
        match workflow_type {
            WorkflowType::TextTo3d => self.text_to_3d,
            WorkflowType::ImageTo3d => self.image_to_3d,
            WorkflowType::FloorplanTo3d => self.floorplan_to_3d,
        }
    }
}
