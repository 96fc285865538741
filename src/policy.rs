use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::model::{ActionRiskLevel, ApprovalStatus, RecommendedAction};

/// Outcome of a policy decision over a proposed action set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub approval: ApprovalStatus,
    pub details: String,
}

/// Deterministic approval policy. Analysts (human or model) can *propose*,
/// policy decides.
///
/// Thresholds are compared on the `ActionRiskLevel` total order, not on a
/// separate score table.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    auto_approve_max_risk: ActionRiskLevel,
    deny_min_risk: ActionRiskLevel,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self {
            auto_approve_max_risk: ActionRiskLevel::Low,
            deny_min_risk: ActionRiskLevel::Critical,
        }
    }
}

impl PolicyEngine {
    pub fn new(auto_approve_max_risk: ActionRiskLevel, deny_min_risk: ActionRiskLevel) -> Self {
        Self {
            auto_approve_max_risk,
            deny_min_risk,
        }
    }

    /// Highest risk level among the actions. `None` for an empty set; callers
    /// go through `decide`, which guards the empty case.
    pub fn max_risk(&self, actions: &[RecommendedAction]) -> Option<ActionRiskLevel> {
        actions.iter().map(|a| a.risk_level).max()
    }

    pub fn decide(&self, actions: &[RecommendedAction]) -> PolicyDecision {
        let Some(max_risk) = self.max_risk(actions) else {
            return PolicyDecision {
                approval: ApprovalStatus::Denied,
                details: "no recommended actions".to_string(),
            };
        };

        // hard deny at or above the deny threshold
        if max_risk >= self.deny_min_risk {
            return PolicyDecision {
                approval: ApprovalStatus::Denied,
                details: format!(
                    "critical-risk action(s) present: {}; manual-only",
                    max_risk.as_str()
                ),
            };
        }

        // auto approve at or below the auto-approve threshold
        if max_risk <= self.auto_approve_max_risk {
            return PolicyDecision {
                approval: ApprovalStatus::AutoApproved,
                details: format!("auto-approved; max risk={}", max_risk.as_str()),
            };
        }

        // otherwise require a human
        PolicyDecision {
            approval: ApprovalStatus::Pending,
            details: format!("requires human approval; max risk={}", max_risk.as_str()),
        }
    }
}

/// Safety constraints re-evaluated at execution time, never trusted from the
/// gate decision: tags may change between proposal and execution, and critical
/// actions are never machine-executed even if nominally approved.
pub fn enforce_executor_safety(
    approval: ApprovalStatus,
    actions: &[RecommendedAction],
    resource_tags: &HashMap<String, HashMap<String, String>>,
) -> Result<()> {
    if !approval.permits_execution() {
        return Err(AppError::Policy(format!(
            "cannot execute: approval status is {approval:?}"
        )));
    }

    for action in actions {
        if action.risk_level == ActionRiskLevel::Critical {
            return Err(AppError::Policy(format!(
                "refuse to execute critical action {}",
                action.action_id
            )));
        }

        if !action.target_resource.is_empty() {
            if let Some(tags) = resource_tags.get(&action.target_resource) {
                let protected = tags.get("do-not-modify").map(String::as_str) == Some("true")
                    || tags.get("manual-only").map(String::as_str) == Some("true");
                if protected {
                    return Err(AppError::Policy(format!(
                        "refuse to execute on tagged resource {}: {tags:?}",
                        action.target_resource
                    )));
                }
            }
        }
    }

    Ok(())
}
