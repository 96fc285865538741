use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::Result;
use crate::model::{ApprovalStatus, ExecutionResult, RecommendedAction};
use crate::policy;
use crate::providers::InfraProvider;

/// Carries out approved actions sequentially, stopping at the first failure.
/// Implementations must re-check executor safety themselves; the gate's
/// verdict is not trusted at execution time.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        approval: ApprovalStatus,
        actions: &[RecommendedAction],
        resource_tags: &HashMap<String, HashMap<String, String>>,
    ) -> Result<Vec<ExecutionResult>>;
}

/// Executor with explicit pre/post snapshots and no hidden side effects. The
/// actual infrastructure mutation is left to deployment-specific impls; this
/// one records what would have been done, which is what local runs and tests
/// need.
pub struct DeterministicExecutor {
    infra: Arc<dyn InfraProvider>,
}

impl DeterministicExecutor {
    pub fn new(infra: Arc<dyn InfraProvider>) -> Self {
        Self { infra }
    }

    async fn snapshot(
        &self,
        action: &RecommendedAction,
    ) -> Result<HashMap<String, serde_json::Value>> {
        if action.target_resource.is_empty() {
            return Ok(HashMap::new());
        }
        let tags = self.infra.resource_tags(&action.target_resource).await?;
        Ok(HashMap::from([(
            "tags".to_string(),
            serde_json::to_value(tags)?,
        )]))
    }
}

#[async_trait]
impl ActionExecutor for DeterministicExecutor {
    async fn execute(
        &self,
        approval: ApprovalStatus,
        actions: &[RecommendedAction],
        resource_tags: &HashMap<String, HashMap<String, String>>,
    ) -> Result<Vec<ExecutionResult>> {
        policy::enforce_executor_safety(approval, actions, resource_tags)?;

        let mut results = Vec::new();

        for action in actions {
            let pre = self.snapshot(action).await?;
            let success = true;
            let details = format!(
                "executed {} on {}",
                action.action_type, action.target_resource
            );
            let post = pre.clone();

            tracing::info!(
                action_id = %action.action_id,
                action_type = %action.action_type,
                target = %action.target_resource,
                "Executed action"
            );

            results.push(ExecutionResult {
                action_id: action.action_id.clone(),
                executed_at: Utc::now(),
                success,
                details,
                rollback_available: true,
                pre_action_snapshot: pre,
                post_action_snapshot: post,
            });

            if !success {
                break;
            }
        }

        Ok(results)
    }
}
