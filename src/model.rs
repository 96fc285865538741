use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity derived from the raw daily dollar delta, independent of category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Root-cause category assigned by the triage cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyCategory {
    ExpectedGrowth,
    DeployRelated,
    ConfigDrift,
    PricingChange,
    CreditsRefundsFees,
    Marketplace,
    DataTransfer,
    K8sCostShift,
    CommitmentCoverageDrift,
    Unknown,
}

/// Approval state of a run. `Pending` is the only state a run may suspend from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    AutoApproved,
    TimedOut,
}

impl ApprovalStatus {
    /// Whether the executor may act under this status.
    pub fn permits_execution(self) -> bool {
        matches!(self, ApprovalStatus::Approved | ApprovalStatus::AutoApproved)
    }
}

/// Risk classification of a recommended action.
///
/// Variant order is the total order used for approval thresholds; `Ord` is
/// derived from declaration order so the comparison can never drift from a
/// separate score table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionRiskLevel {
    Low,
    LowMedium,
    Medium,
    High,
    Critical,
}

impl ActionRiskLevel {
    /// Fixed integer score, used for display and external reporting.
    pub fn score(self) -> u8 {
        match self {
            ActionRiskLevel::Low => 10,
            ActionRiskLevel::LowMedium => 20,
            ActionRiskLevel::Medium => 30,
            ActionRiskLevel::High => 40,
            ActionRiskLevel::Critical => 50,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionRiskLevel::Low => "low",
            ActionRiskLevel::LowMedium => "low_medium",
            ActionRiskLevel::Medium => "medium",
            ActionRiskLevel::High => "high",
            ActionRiskLevel::Critical => "critical",
        }
    }
}

/// A detected deviation between expected and actual cost for a
/// service/account/window. Immutable input to the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostAnomaly {
    #[serde(default = "short_id")]
    pub anomaly_id: String,
    #[serde(default = "Utc::now")]
    pub detected_at: DateTime<Utc>,

    pub service: String,
    pub account_id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub team: String,

    #[serde(default)]
    pub expected_daily_cost: f64,
    #[serde(default)]
    pub actual_daily_cost: f64,
    #[serde(default)]
    pub delta_dollars: f64,
    #[serde(default)]
    pub delta_percent: f64,
    #[serde(default)]
    pub z_score: f64,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

impl Default for CostAnomaly {
    fn default() -> Self {
        Self {
            anomaly_id: short_id(),
            detected_at: Utc::now(),
            service: String::new(),
            account_id: String::new(),
            region: String::new(),
            team: String::new(),
            expected_daily_cost: 0.0,
            actual_daily_cost: 0.0,
            delta_dollars: 0.0,
            delta_percent: 0.0,
            z_score: 0.0,
            lookback_days: default_lookback_days(),
        }
    }
}

/// Evidence gathered while triaging: optional numeric deltas plus correlated
/// signals. Absent evidence stays `None`/empty so the cascade can fall through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriageEvidence {
    #[serde(default)]
    pub deploy_correlation: Vec<String>,
    #[serde(default)]
    pub usage_correlation: Vec<String>,
    #[serde(default)]
    pub infra_correlation: Vec<String>,

    pub ri_coverage_delta: Option<f64>,
    pub sp_coverage_delta: Option<f64>,
    pub credits_delta: Option<f64>,
    pub refunds_delta: Option<f64>,
    pub fees_delta: Option<f64>,
    pub marketplace_delta: Option<f64>,
    pub data_transfer_delta: Option<f64>,
    #[serde(default)]
    pub k8s_namespace_deltas: HashMap<String, f64>,
}

/// Outcome of the triage cascade: exactly one category per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageResult {
    pub category: AnomalyCategory,
    pub severity: AnomalySeverity,
    pub confidence: f64,
    pub summary: String,
    pub evidence: TriageEvidence,
}

/// A remediation action proposed by the analyst. `rollback_procedure` is
/// mandatory: an action without a documented way back is not proposable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedAction {
    #[serde(default = "short_id")]
    pub action_id: String,
    pub description: String,
    pub action_type: String,
    pub risk_level: ActionRiskLevel,
    #[serde(default)]
    pub estimated_savings_monthly: f64,
    #[serde(default)]
    pub target_resource: String,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    pub rollback_procedure: String,
}

/// Analyst output: narrative plus proposed actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub root_cause_narrative: String,
    #[serde(default)]
    pub affected_resources: Vec<String>,
    #[serde(default)]
    pub recommended_actions: Vec<RecommendedAction>,
    #[serde(default)]
    pub estimated_monthly_savings: f64,
    #[serde(default)]
    pub confidence: f64,
}

/// Per-action execution record with before/after snapshots for audit and
/// potential rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub action_id: String,
    pub executed_at: DateTime<Utc>,
    pub success: bool,
    pub details: String,
    pub rollback_available: bool,
    #[serde(default)]
    pub pre_action_snapshot: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub post_action_snapshot: HashMap<String, serde_json::Value>,
}

/// Post-execution recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationRecommendation {
    Close,
    Rollback,
    Escalate,
    Monitor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified_at: DateTime<Utc>,
    pub cost_reduction_observed: bool,
    pub observed_savings_daily: f64,
    pub service_health_ok: bool,
    pub health_check_details: String,
    pub recommendation: VerificationRecommendation,
}

/// Tenant/account context, immutable for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: String,
    #[serde(default)]
    pub management_account_id: String,
    #[serde(default = "default_region")]
    pub default_region: String,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            management_account_id: String::new(),
            default_region: default_region(),
        }
    }
}

/// The single mutable record threaded through a run. Every optional field is
/// written by exactly one stage; only `approval` may be rewritten, and only
/// `pending -> {approved, denied, timed_out}` on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub started_at: DateTime<Utc>,

    pub tenant: TenantContext,

    pub anomaly: Option<CostAnomaly>,
    pub triage: Option<TriageResult>,
    pub analysis: Option<AnalysisResult>,

    pub approval: ApprovalStatus,
    #[serde(default)]
    pub approval_details: String,

    #[serde(default)]
    pub executions: Vec<ExecutionResult>,
    pub verification: Option<VerificationResult>,

    pub current_phase: String,
    #[serde(default)]
    pub should_terminate: bool,
    pub error: Option<String>,
}

impl WorkflowState {
    pub fn new(tenant: TenantContext, anomaly: Option<CostAnomaly>) -> Self {
        Self {
            workflow_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            tenant,
            anomaly,
            triage: None,
            analysis: None,
            approval: ApprovalStatus::Pending,
            approval_details: String::new(),
            executions: Vec::new(),
            verification: None,
            current_phase: "watcher".to_string(),
            should_terminate: false,
            error: None,
        }
    }

    /// Actions proposed by the analyst, empty if the stage has not run.
    pub fn recommended_actions(&self) -> &[RecommendedAction] {
        self.analysis
            .as_ref()
            .map(|a| a.recommended_actions.as_slice())
            .unwrap_or_default()
    }
}

/// Short random identifier for anomalies and actions.
pub(crate) fn short_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

fn default_lookback_days() -> u32 {
    30
}

fn default_region() -> String {
    "us-east-1".to_string()
}
