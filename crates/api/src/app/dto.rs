//! Request/response DTOs and JSON mapping helpers.

use serde::Deserialize;
use serde_json::{json, Value};

use polyform_billing::PaymentOrder;
use polyform_jobs::{Generation, Project, WorkflowType};
use polyform_ledger::Transaction;

#[derive(Debug, Deserialize)]
pub struct CreateGenerationRequest {
    pub workflow_type: WorkflowType,
    pub input_data: Value,
    /// Rerun inside an existing project; omitted opens a new one.
    #[serde(default)]
    pub project_id: Option<uuid::Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Charge in the smallest currency unit.
    pub amount: u64,
    pub currency: String,
    pub credits: u64,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOrderRequest {
    pub payment_id: String,
    pub signature: String,
}

pub fn generation_to_json(generation: &Generation) -> Value {
    json!({
        "id": generation.id,
        "project_id": generation.project_id,
        "workflow_type": generation.workflow_type,
        "sequence_number": generation.sequence_number,
        "phase": generation.phase,
        "progress_pct": generation.progress_pct,
        "input_data": generation.input_data,
        "output_data": generation.output_data,
        "error_detail": generation.error_detail,
        "created_at": generation.created_at,
        "updated_at": generation.updated_at,
    })
}

pub fn project_to_json(project: &Project) -> Value {
    json!({
        "id": project.id,
        "workflow_type": project.workflow_type,
        "input_data": project.input_data,
        "generation_count": project.generation_count,
        "latest_generation_id": project.latest_generation_id,
        "created_at": project.created_at,
    })
}

pub fn transaction_to_json(transaction: &Transaction) -> Value {
    json!({
        "id": transaction.id,
        "kind": transaction.kind,
        "amount": transaction.amount,
        "status": transaction.status,
        "correlation": transaction.correlation,
        "created_at": transaction.created_at,
    })
}

pub fn order_to_json(order: &PaymentOrder) -> Value {
    json!({
        "id": order.id,
        "external_order_id": order.external_order_id,
        "amount": order.amount,
        "currency": order.currency,
        "credits_granted": order.credits_granted,
        "status": order.status,
        "payment_id": order.payment_id,
        "failure_reason": order.failure_reason,
        "created_at": order.created_at,
        "updated_at": order.updated_at,
    })
}
