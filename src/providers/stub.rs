use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::{AppError, Result};
use crate::providers::{
    BillingLineItem, CommitmentCoverage, CommitmentUtilization, CostProvider, CostTimeseries,
    DeployEvent, InfraProvider, KubeCostProvider, MetricSnapshot, NamespaceAllocation, TimeWindow,
};

/// Reads a fixture JSON file, or the type's default when the file is absent.
/// Missing evidence must look like "no evidence", not like a failure.
async fn load_fixture<T: DeserializeOwned + Default>(dir: &Path, name: &str) -> Result<T> {
    let path = dir.join(name);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map_err(|e| AppError::Provider(format!("malformed fixture {}: {e}", path.display())))
}

/// Cost provider backed by fixture files. Good enough for tests and local
/// runs; production swaps in real billing-API clients at construction time.
pub struct StubCostProvider {
    fixtures_dir: PathBuf,
}

impl StubCostProvider {
    pub fn new(fixtures_dir: impl Into<PathBuf>) -> Self {
        Self {
            fixtures_dir: fixtures_dir.into(),
        }
    }
}

#[async_trait]
impl CostProvider for StubCostProvider {
    async fn cost_timeseries(
        &self,
        _service: &str,
        _account_id: &str,
        _window: &TimeWindow,
    ) -> Result<CostTimeseries> {
        load_fixture(&self.fixtures_dir, "cost_timeseries.json").await
    }

    async fn billing_line_items(
        &self,
        _account_id: &str,
        _window: &TimeWindow,
        _service: Option<&str>,
    ) -> Result<Vec<BillingLineItem>> {
        load_fixture(&self.fixtures_dir, "billing_line_items.json").await
    }

    async fn ri_coverage(
        &self,
        _account_id: &str,
        _window: &TimeWindow,
    ) -> Result<CommitmentCoverage> {
        load_fixture(&self.fixtures_dir, "ri_coverage.json").await
    }

    async fn ri_utilization(
        &self,
        _account_id: &str,
        _window: &TimeWindow,
    ) -> Result<CommitmentUtilization> {
        load_fixture(&self.fixtures_dir, "ri_utilization.json").await
    }

    async fn sp_coverage(
        &self,
        _account_id: &str,
        _window: &TimeWindow,
    ) -> Result<CommitmentCoverage> {
        load_fixture(&self.fixtures_dir, "sp_coverage.json").await
    }

    async fn sp_utilization(
        &self,
        _account_id: &str,
        _window: &TimeWindow,
    ) -> Result<CommitmentUtilization> {
        load_fixture(&self.fixtures_dir, "sp_utilization.json").await
    }
}

/// Infrastructure provider backed by fixture files.
pub struct StubInfraProvider {
    fixtures_dir: PathBuf,
}

impl StubInfraProvider {
    pub fn new(fixtures_dir: impl Into<PathBuf>) -> Self {
        Self {
            fixtures_dir: fixtures_dir.into(),
        }
    }
}

#[async_trait]
impl InfraProvider for StubInfraProvider {
    async fn recent_deploys(
        &self,
        _service: &str,
        _lookback_hours: u32,
    ) -> Result<Vec<DeployEvent>> {
        load_fixture(&self.fixtures_dir, "deploys.json").await
    }

    async fn metric_snapshot(
        &self,
        _resource_id: &str,
        _metric_name: &str,
    ) -> Result<MetricSnapshot> {
        load_fixture(&self.fixtures_dir, "metric_snapshot.json").await
    }

    async fn resource_tags(&self, _resource_id: &str) -> Result<HashMap<String, String>> {
        load_fixture(&self.fixtures_dir, "resource_tags.json").await
    }
}

/// KubeCost provider backed by a fixture file.
pub struct StubKubeCostProvider {
    fixtures_dir: PathBuf,
}

impl StubKubeCostProvider {
    pub fn new(fixtures_dir: impl Into<PathBuf>) -> Self {
        Self {
            fixtures_dir: fixtures_dir.into(),
        }
    }
}

#[async_trait]
impl KubeCostProvider for StubKubeCostProvider {
    async fn namespace_allocation(
        &self,
        _window: &str,
    ) -> Result<HashMap<String, NamespaceAllocation>> {
        load_fixture(&self.fixtures_dir, "kubecost_allocation.json").await
    }
}
