use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{
    ActionRiskLevel, AnalysisResult, CostAnomaly, RecommendedAction, TriageResult,
};
use crate::providers::{CostProvider, TimeWindow};

/// Proposes remediation actions for a triaged anomaly. Implementations may be
/// deterministic or model-driven; either way the policy engine decides what
/// actually runs.
#[async_trait]
pub trait ActionProposer: Send + Sync {
    async fn propose(
        &self,
        anomaly: &CostAnomaly,
        triage: Option<&TriageResult>,
        window: &TimeWindow,
    ) -> Result<AnalysisResult>;
}

/// Deterministic analyst: reviews billing evidence and proposes only safe,
/// reversible actions. Narrative generation stays out of scope here; the
/// narrative field records what was reviewed.
pub struct DeterministicAnalyst {
    cost: Arc<dyn CostProvider>,
}

impl DeterministicAnalyst {
    pub fn new(cost: Arc<dyn CostProvider>) -> Self {
        Self { cost }
    }
}

#[async_trait]
impl ActionProposer for DeterministicAnalyst {
    async fn propose(
        &self,
        anomaly: &CostAnomaly,
        _triage: Option<&TriageResult>,
        window: &TimeWindow,
    ) -> Result<AnalysisResult> {
        let items = self
            .cost
            .billing_line_items(&anomaly.account_id, window, Some(anomaly.service.as_str()))
            .await?;
        let utilization = self.cost.ri_utilization(&anomaly.account_id, window).await?;

        let narrative = format!(
            "{} billing line items reviewed for {} {}..{} (ri utilization {:.0}%); further attribution required",
            items.len(),
            anomaly.service,
            window.start,
            window.end,
            utilization.utilization_percent,
        );

        // safe default: a budget alert to catch recurrence, low risk
        let actions = vec![RecommendedAction {
            action_id: crate::model::short_id(),
            description: format!(
                "create/update budget alert for {} to catch recurrence",
                anomaly.service
            ),
            action_type: "create_budget_alert".to_string(),
            risk_level: ActionRiskLevel::Low,
            estimated_savings_monthly: 0.0,
            target_resource: format!("budget:{}:{}", anomaly.service, anomaly.account_id),
            parameters: HashMap::from([
                ("amount".to_string(), serde_json::json!(0.0)),
                ("threshold_percent".to_string(), serde_json::json!(20.0)),
            ]),
            rollback_procedure: "disable alert / delete budget rule".to_string(),
        }];

        Ok(AnalysisResult {
            root_cause_narrative: narrative,
            affected_resources: Vec::new(),
            recommended_actions: actions,
            estimated_monthly_savings: 0.0,
            confidence: 0.4,
        })
    }
}
