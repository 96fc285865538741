use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;
use crate::providers::{KubeCostProvider, NamespaceAllocation};

/// HTTP client for the KubeCost allocation API.
///
/// Queries `GET {base_url}/model/allocation` aggregated by namespace. This is
/// the production counterpart of the fixture-backed stub; which one a
/// deployment gets is decided at construction time in the server wiring.
pub struct KubeCostClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct AllocationResponse {
    #[serde(default)]
    allocations: HashMap<String, NamespaceAllocation>,
}

impl KubeCostClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl KubeCostProvider for KubeCostClient {
    async fn namespace_allocation(
        &self,
        window: &str,
    ) -> Result<HashMap<String, NamespaceAllocation>> {
        let url = format!("{}/model/allocation", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("window", window), ("aggregate", "namespace")])
            .send()
            .await?
            .error_for_status()?;

        let body: AllocationResponse = response.json().await?;
        Ok(body.allocations)
    }
}
