pub mod kubecost;
pub mod stub;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Time window evidence queries are keyed by, as `YYYY-MM-DD` bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
}

impl TimeWindow {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostPoint {
    pub date: String,
    pub amount: f64,
}

/// Daily cost series plus the observed post-remediation savings the verifier
/// reads (zero when no reduction has been measured yet).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostTimeseries {
    #[serde(default)]
    pub points: Vec<CostPoint>,
    #[serde(default)]
    pub observed_savings_daily: f64,
}

/// One itemized billing record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingLineItem {
    #[serde(default)]
    pub line_item_type: String,
    #[serde(default)]
    pub unblended_cost: f64,
    #[serde(default)]
    pub usage_type: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub product_code: String,
}

/// Commitment (reserved-instance or savings-plan) coverage for a window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitmentCoverage {
    #[serde(default)]
    pub coverage_percent: f64,
    #[serde(default)]
    pub coverage_delta: f64,
}

/// Commitment utilization for a window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitmentUtilization {
    #[serde(default)]
    pub utilization_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub deployed_at: String,
}

/// Generic metric snapshot: a baseline value and the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricSnapshot {
    #[serde(default)]
    pub baseline: f64,
    #[serde(default)]
    pub current: f64,
}

/// Per-namespace cost allocation with its delta against the prior window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespaceAllocation {
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub delta: f64,
}

/// Cost/billing evidence. All queries are read-only; absence of data is
/// returned as empty/zero, never as an error, so the triage cascade can fall
/// through.
#[async_trait]
pub trait CostProvider: Send + Sync {
    /// Daily cost series for a service/account over a window.
    async fn cost_timeseries(
        &self,
        service: &str,
        account_id: &str,
        window: &TimeWindow,
    ) -> Result<CostTimeseries>;

    /// Itemized billing records, optionally filtered to a service.
    async fn billing_line_items(
        &self,
        account_id: &str,
        window: &TimeWindow,
        service: Option<&str>,
    ) -> Result<Vec<BillingLineItem>>;

    /// Reserved-instance coverage over the window.
    async fn ri_coverage(&self, account_id: &str, window: &TimeWindow)
        -> Result<CommitmentCoverage>;

    /// Reserved-instance utilization over the window.
    async fn ri_utilization(
        &self,
        account_id: &str,
        window: &TimeWindow,
    ) -> Result<CommitmentUtilization>;

    /// Savings-plan coverage over the window.
    async fn sp_coverage(&self, account_id: &str, window: &TimeWindow)
        -> Result<CommitmentCoverage>;

    /// Savings-plan utilization over the window.
    async fn sp_utilization(
        &self,
        account_id: &str,
        window: &TimeWindow,
    ) -> Result<CommitmentUtilization>;
}

/// Infrastructure evidence: deploy history, metrics, resource tags.
#[async_trait]
pub trait InfraProvider: Send + Sync {
    /// Deploys for a service within the lookback window.
    async fn recent_deploys(&self, service: &str, lookback_hours: u32) -> Result<Vec<DeployEvent>>;

    /// Baseline/current snapshot of a named metric.
    async fn metric_snapshot(&self, resource_id: &str, metric_name: &str)
        -> Result<MetricSnapshot>;

    /// Tags on a resource, empty if the resource is unknown.
    async fn resource_tags(&self, resource_id: &str) -> Result<HashMap<String, String>>;
}

/// Optional Kubernetes cost allocation evidence.
#[async_trait]
pub trait KubeCostProvider: Send + Sync {
    /// Cost per namespace with deltas against the prior window.
    async fn namespace_allocation(&self, window: &str)
        -> Result<HashMap<String, NamespaceAllocation>>;
}
