use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::analysis::DeterministicAnalyst;
use crate::api::handlers;
use crate::config::{AppConfig, ProviderMode};
use crate::error::{AppError, Result};
use crate::executor::DeterministicExecutor;
use crate::policy::PolicyEngine;
use crate::providers::kubecost::KubeCostClient;
use crate::providers::stub::{StubCostProvider, StubInfraProvider, StubKubeCostProvider};
use crate::providers::{CostProvider, InfraProvider, KubeCostProvider, TimeWindow};
use crate::verifier::CostVerifier;
use crate::workflow::{Collaborators, FileRunStore, LogApprovalChannel, RunStore, WorkflowEngine};

pub struct AppState {
    pub config: AppConfig,
    pub engine: Arc<WorkflowEngine>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let store = Arc::new(FileRunStore::new(&config.store.base_dir));
        let engine = Self::build_engine(&config, store)?;
        Ok(Self { config, engine })
    }

    /// Wire an engine from configuration: providers selected by mode, policy
    /// thresholds, and the given run store.
    pub fn build_engine(
        config: &AppConfig,
        store: Arc<dyn RunStore>,
    ) -> Result<Arc<WorkflowEngine>> {
        let cost: Arc<dyn CostProvider> =
            Arc::new(StubCostProvider::new(&config.providers.fixtures_dir));
        let infra: Arc<dyn InfraProvider> =
            Arc::new(StubInfraProvider::new(&config.providers.fixtures_dir));

        let kubecost: Option<Arc<dyn KubeCostProvider>> = match config.providers.mode {
            ProviderMode::Stub => Some(Arc::new(StubKubeCostProvider::new(
                &config.providers.fixtures_dir,
            ))),
            ProviderMode::Kubecost => {
                let base_url = config.providers.kubecost_base_url.as_ref().ok_or_else(|| {
                    AppError::Config(
                        "providers.kubecost_base_url is required in kubecost mode".to_string(),
                    )
                })?;
                Some(Arc::new(KubeCostClient::new(base_url.as_str())))
            }
        };

        let collab = Collaborators {
            cost: Arc::clone(&cost),
            infra: Arc::clone(&infra),
            kubecost,
            proposer: Arc::new(DeterministicAnalyst::new(Arc::clone(&cost))),
            executor: Arc::new(DeterministicExecutor::new(Arc::clone(&infra))),
            verifier: Arc::new(CostVerifier::new(Arc::clone(&cost))),
            approvals: Arc::new(LogApprovalChannel),
        };

        let policy = PolicyEngine::new(
            config.policy.auto_approve_max_risk,
            config.policy.deny_min_risk,
        );
        let window = TimeWindow::new(
            config.analysis.window_start.clone(),
            config.analysis.window_end.clone(),
        );

        Ok(Arc::new(WorkflowEngine::new(collab, policy, store, window)))
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/v1/workflows",
            post(handlers::start_workflow).get(handlers::list_workflows),
        )
        .route("/api/v1/workflows/:id", get(handlers::get_workflow))
        .route("/api/v1/workflows/:id/approve", post(handlers::approve_workflow))
        .route("/api/v1/workflows/:id/deny", post(handlers::deny_workflow))
        .route("/health", get(handlers::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
