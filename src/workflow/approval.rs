use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::RecommendedAction;

/// Outbound payload emitted when a run suspends at the approval gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub workflow_id: String,
    pub summary: String,
    pub actions: Vec<RecommendedAction>,
}

/// Inbound human decision, keyed by `workflow_id` out of band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approve: bool,
    pub by: String,
}

/// Out-of-band channel that carries approval requests to a human. The run is
/// already durably suspended before the request is sent; delivery failures
/// leave it resumable.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<()>;
}

/// Channel that surfaces approval requests in the service log. Production
/// deployments replace this with a chat or ticketing integration.
pub struct LogApprovalChannel;

#[async_trait]
impl ApprovalChannel for LogApprovalChannel {
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<()> {
        tracing::info!(
            workflow_id = %request.workflow_id,
            summary = %request.summary,
            actions = request.actions.len(),
            "Awaiting human approval"
        );
        Ok(())
    }
}
