use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use costmend::analysis::ActionProposer;
use costmend::error::Result;
use costmend::executor::DeterministicExecutor;
use costmend::model::{
    ActionRiskLevel, AnalysisResult, AnomalyCategory, ApprovalStatus, CostAnomaly,
    RecommendedAction, TenantContext, TriageResult, WorkflowState,
};
use costmend::providers::{
    BillingLineItem, CommitmentCoverage, CommitmentUtilization, CostProvider, CostTimeseries,
    DeployEvent, InfraProvider, MetricSnapshot, TimeWindow,
};
use costmend::policy::PolicyEngine;
use costmend::verifier::CostVerifier;
use costmend::workflow::{
    ApprovalChannel, ApprovalDecision, ApprovalRequest, Collaborators, FileRunStore,
    InMemoryRunStore, RunStatus, RunStore, Stage, WorkflowEngine,
};

#[derive(Default, Clone)]
struct TestCost {
    ri_delta: f64,
    sp_delta: f64,
    items: Vec<BillingLineItem>,
    observed_savings_daily: f64,
}

#[async_trait]
impl CostProvider for TestCost {
    async fn cost_timeseries(
        &self,
        _service: &str,
        _account_id: &str,
        _window: &TimeWindow,
    ) -> Result<CostTimeseries> {
        Ok(CostTimeseries {
            points: Vec::new(),
            observed_savings_daily: self.observed_savings_daily,
        })
    }

    async fn billing_line_items(
        &self,
        _account_id: &str,
        _window: &TimeWindow,
        _service: Option<&str>,
    ) -> Result<Vec<BillingLineItem>> {
        Ok(self.items.clone())
    }

    async fn ri_coverage(
        &self,
        _account_id: &str,
        _window: &TimeWindow,
    ) -> Result<CommitmentCoverage> {
        Ok(CommitmentCoverage {
            coverage_percent: 70.0,
            coverage_delta: self.ri_delta,
        })
    }

    async fn ri_utilization(
        &self,
        _account_id: &str,
        _window: &TimeWindow,
    ) -> Result<CommitmentUtilization> {
        Ok(CommitmentUtilization {
            utilization_percent: 90.0,
        })
    }

    async fn sp_coverage(
        &self,
        _account_id: &str,
        _window: &TimeWindow,
    ) -> Result<CommitmentCoverage> {
        Ok(CommitmentCoverage {
            coverage_percent: 45.0,
            coverage_delta: self.sp_delta,
        })
    }

    async fn sp_utilization(
        &self,
        _account_id: &str,
        _window: &TimeWindow,
    ) -> Result<CommitmentUtilization> {
        Ok(CommitmentUtilization {
            utilization_percent: 85.0,
        })
    }
}

#[derive(Default, Clone)]
struct TestInfra {
    deploys: Vec<DeployEvent>,
    metric: MetricSnapshot,
    tags: HashMap<String, String>,
}

#[async_trait]
impl InfraProvider for TestInfra {
    async fn recent_deploys(
        &self,
        _service: &str,
        _lookback_hours: u32,
    ) -> Result<Vec<DeployEvent>> {
        Ok(self.deploys.clone())
    }

    async fn metric_snapshot(
        &self,
        _resource_id: &str,
        _metric_name: &str,
    ) -> Result<MetricSnapshot> {
        Ok(self.metric.clone())
    }

    async fn resource_tags(&self, _resource_id: &str) -> Result<HashMap<String, String>> {
        Ok(self.tags.clone())
    }
}

struct TestProposer {
    actions: Vec<RecommendedAction>,
}

#[async_trait]
impl ActionProposer for TestProposer {
    async fn propose(
        &self,
        _anomaly: &CostAnomaly,
        _triage: Option<&TriageResult>,
        _window: &TimeWindow,
    ) -> Result<AnalysisResult> {
        Ok(AnalysisResult {
            root_cause_narrative: "test analysis".to_string(),
            affected_resources: Vec::new(),
            recommended_actions: self.actions.clone(),
            estimated_monthly_savings: 0.0,
            confidence: 0.5,
        })
    }
}

#[derive(Default)]
struct CapturingChannel {
    requests: Mutex<Vec<ApprovalRequest>>,
}

#[async_trait]
impl ApprovalChannel for CapturingChannel {
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}

fn action(risk: ActionRiskLevel, target: &str) -> RecommendedAction {
    RecommendedAction {
        action_id: format!("act-{}", risk.as_str()),
        description: "resize over-provisioned fleet".to_string(),
        action_type: "resize".to_string(),
        risk_level: risk,
        estimated_savings_monthly: 400.0,
        target_resource: target.to_string(),
        parameters: HashMap::new(),
        rollback_procedure: "restore previous instance size".to_string(),
    }
}

fn anomaly(delta: f64) -> CostAnomaly {
    CostAnomaly {
        service: "EC2".to_string(),
        account_id: "123456789012".to_string(),
        region: "us-east-1".to_string(),
        team: "platform".to_string(),
        expected_daily_cost: 2400.0,
        actual_daily_cost: 2400.0 + delta,
        delta_dollars: delta,
        delta_percent: (delta / 2400.0) * 100.0,
        z_score: 3.2,
        ..CostAnomaly::default()
    }
}

struct Harness {
    engine: WorkflowEngine,
    channel: Arc<CapturingChannel>,
}

fn harness(
    cost: TestCost,
    infra: TestInfra,
    actions: Vec<RecommendedAction>,
    store: Arc<dyn RunStore>,
) -> Harness {
    let cost = Arc::new(cost);
    let infra = Arc::new(infra);
    let channel = Arc::new(CapturingChannel::default());

    let collab = Collaborators {
        cost: cost.clone(),
        infra: infra.clone(),
        kubecost: None,
        proposer: Arc::new(TestProposer { actions }),
        executor: Arc::new(DeterministicExecutor::new(infra)),
        verifier: Arc::new(CostVerifier::new(cost)),
        approvals: channel.clone(),
    };

    let engine = WorkflowEngine::new(
        collab,
        PolicyEngine::default(),
        store,
        TimeWindow::new("2026-02-01", "2026-02-16"),
    );

    Harness { engine, channel }
}

fn start_state(anomaly: Option<CostAnomaly>) -> WorkflowState {
    WorkflowState::new(TenantContext::new("tenant-001"), anomaly)
}

#[tokio::test]
async fn deploy_correlated_anomaly_runs_to_verification() {
    // scenario: quiet billing evidence, one recent deploy, low-risk action
    let infra = TestInfra {
        deploys: vec![DeployEvent {
            id: "deploy-7f3a".to_string(),
            service: "EC2".to_string(),
            deployed_at: "2026-02-15T09:42:00Z".to_string(),
        }],
        ..TestInfra::default()
    };
    let cost = TestCost {
        observed_savings_daily: 120.0,
        ..TestCost::default()
    };
    let h = harness(
        cost,
        infra,
        vec![action(ActionRiskLevel::Low, "arn:aws:ec2:i-0abc")],
        Arc::new(InMemoryRunStore::new()),
    );

    let outcome = h.engine.start(start_state(Some(anomaly(750.0)))).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    let triage = outcome.state.triage.as_ref().unwrap();
    assert_eq!(triage.category, AnomalyCategory::DeployRelated);
    assert_eq!(triage.confidence, 0.7);

    assert_eq!(outcome.state.approval, ApprovalStatus::AutoApproved);
    assert_eq!(outcome.state.executions.len(), 1);
    assert!(outcome.state.executions[0].success);
    assert!(outcome.state.verification.is_some());
    assert_eq!(outcome.state.current_phase, "verifier");
    assert_eq!(
        outcome.visited,
        vec![
            Stage::Watcher,
            Stage::Triager,
            Stage::Analyst,
            Stage::HilGate,
            Stage::Executor,
            Stage::Verifier,
        ]
    );
    // nothing required a human
    assert!(h.channel.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn commitment_drift_wins_over_other_signals() {
    // coverage drift plus loud credit and deploy signals: rule 1 must win
    let cost = TestCost {
        ri_delta: 0.08,
        items: vec![BillingLineItem {
            line_item_type: "Credit".to_string(),
            unblended_cost: -500.0,
            ..BillingLineItem::default()
        }],
        ..TestCost::default()
    };
    let infra = TestInfra {
        deploys: vec![DeployEvent {
            id: "deploy-1".to_string(),
            ..DeployEvent::default()
        }],
        ..TestInfra::default()
    };
    let h = harness(
        cost,
        infra,
        vec![action(ActionRiskLevel::Low, "")],
        Arc::new(InMemoryRunStore::new()),
    );

    let outcome = h.engine.start(start_state(Some(anomaly(750.0)))).await.unwrap();

    let triage = outcome.state.triage.as_ref().unwrap();
    assert_eq!(triage.category, AnomalyCategory::CommitmentCoverageDrift);
    assert_eq!(triage.evidence.ri_coverage_delta, Some(0.08));
}

#[tokio::test]
async fn critical_action_is_denied_without_reaching_executor() {
    let h = harness(
        TestCost::default(),
        TestInfra::default(),
        vec![
            action(ActionRiskLevel::Low, ""),
            action(ActionRiskLevel::Critical, "arn:aws:rds:prod-db"),
        ],
        Arc::new(InMemoryRunStore::new()),
    );

    let outcome = h.engine.start(start_state(Some(anomaly(750.0)))).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.state.approval, ApprovalStatus::Denied);
    assert!(outcome.state.executions.is_empty());
    assert!(!outcome.visited.contains(&Stage::Executor));
    assert_eq!(outcome.state.current_phase, "hil_gate");
}

#[tokio::test]
async fn medium_risk_suspends_then_denied_resume_terminates() {
    let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
    let h = harness(
        TestCost::default(),
        TestInfra::default(),
        vec![action(ActionRiskLevel::Medium, "arn:aws:ec2:i-0abc")],
        store.clone(),
    );

    let outcome = h.engine.start(start_state(Some(anomaly(750.0)))).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Suspended);
    assert_eq!(outcome.state.approval, ApprovalStatus::Pending);
    let workflow_id = outcome.state.workflow_id.clone();

    // the request went out with the run id and the proposed actions
    let requests = h.channel.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].workflow_id, workflow_id);
    assert_eq!(requests[0].actions.len(), 1);

    // the checkpoint is parked with a pending marker
    let checkpoint = store.load(&workflow_id).await.unwrap().unwrap();
    assert!(checkpoint.pending.is_some());

    let resumed = h
        .engine
        .resume(
            &workflow_id,
            ApprovalDecision {
                approve: false,
                by: "alice".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.state.approval, ApprovalStatus::Denied);
    assert_eq!(resumed.state.approval_details, "denied_by=alice");
    assert!(resumed.state.executions.is_empty());
    assert_eq!(resumed.state.current_phase, "hil_gate");
}

#[tokio::test]
async fn second_resume_cannot_commit_a_divergent_outcome() {
    let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
    let h = harness(
        TestCost::default(),
        TestInfra::default(),
        vec![action(ActionRiskLevel::Medium, "")],
        store.clone(),
    );

    let outcome = h.engine.start(start_state(Some(anomaly(750.0)))).await.unwrap();
    let workflow_id = outcome.state.workflow_id.clone();

    h.engine
        .resume(
            &workflow_id,
            ApprovalDecision {
                approve: false,
                by: "alice".to_string(),
            },
        )
        .await
        .unwrap();

    // a conflicting second decision is rejected outright
    let err = h
        .engine
        .resume(
            &workflow_id,
            ApprovalDecision {
                approve: true,
                by: "bob".to_string(),
            },
        )
        .await;
    assert!(err.is_err());

    // and the committed state still reflects the first decision
    let checkpoint = store.load(&workflow_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.state.approval, ApprovalStatus::Denied);
    assert_eq!(checkpoint.state.approval_details, "denied_by=alice");
}

#[tokio::test]
async fn approved_resume_executes_and_verifies() {
    let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
    let cost = TestCost {
        observed_savings_daily: 90.0,
        ..TestCost::default()
    };
    let h = harness(
        cost,
        TestInfra::default(),
        vec![action(ActionRiskLevel::Medium, "arn:aws:ec2:i-0abc")],
        store.clone(),
    );

    let outcome = h.engine.start(start_state(Some(anomaly(750.0)))).await.unwrap();
    let workflow_id = outcome.state.workflow_id.clone();

    let resumed = h
        .engine
        .resume(
            &workflow_id,
            ApprovalDecision {
                approve: true,
                by: "alice".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(resumed.state.approval, ApprovalStatus::Approved);
    assert_eq!(resumed.state.approval_details, "approved_by=alice");
    assert_eq!(resumed.state.executions.len(), 1);
    assert!(resumed.state.verification.is_some());
    assert_eq!(resumed.state.current_phase, "verifier");
    assert_eq!(
        resumed.visited,
        vec![Stage::HilGate, Stage::Executor, Stage::Verifier]
    );
}

#[tokio::test]
async fn suspended_run_resumes_from_durable_storage_alone() {
    // simulate a process restart: suspend against a file store, then resume
    // through a fresh engine over the same directory
    let dir = tempfile::tempdir().unwrap();
    let store_a: Arc<dyn RunStore> = Arc::new(FileRunStore::new(dir.path()));
    let h_a = harness(
        TestCost::default(),
        TestInfra::default(),
        vec![action(ActionRiskLevel::Medium, "")],
        store_a,
    );

    let outcome = h_a.engine.start(start_state(Some(anomaly(750.0)))).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Suspended);
    let workflow_id = outcome.state.workflow_id.clone();
    drop(h_a);

    let store_b: Arc<dyn RunStore> = Arc::new(FileRunStore::new(dir.path()));
    let h_b = harness(
        TestCost::default(),
        TestInfra::default(),
        vec![action(ActionRiskLevel::Medium, "")],
        store_b,
    );

    let resumed = h_b
        .engine
        .resume(
            &workflow_id,
            ApprovalDecision {
                approve: true,
                by: "bob".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.state.approval, ApprovalStatus::Approved);
    // prior stages were not re-run: triage survived the restart
    assert!(resumed.state.triage.is_some());
    assert_eq!(
        resumed.visited,
        vec![Stage::HilGate, Stage::Executor, Stage::Verifier]
    );
}

#[tokio::test]
async fn protected_resource_tags_abort_execution() {
    let infra = TestInfra {
        tags: HashMap::from([("do-not-modify".to_string(), "true".to_string())]),
        ..TestInfra::default()
    };
    let h = harness(
        TestCost::default(),
        infra,
        vec![action(ActionRiskLevel::Low, "arn:aws:ec2:i-0abc")],
        Arc::new(InMemoryRunStore::new()),
    );

    let outcome = h.engine.start(start_state(Some(anomaly(750.0)))).await.unwrap();

    // auto-approved at the gate, but the execution-time tag check refuses
    assert_eq!(outcome.state.approval, ApprovalStatus::AutoApproved);
    assert!(outcome.state.executions.is_empty());
    let error = outcome.state.error.as_ref().unwrap();
    assert!(error.contains("refuse to execute"), "{error}");
    assert_eq!(outcome.state.current_phase, "executor");
    assert!(!outcome.visited.contains(&Stage::Verifier));
}

#[tokio::test]
async fn missing_anomaly_terminates_at_watcher() {
    let h = harness(
        TestCost::default(),
        TestInfra::default(),
        Vec::new(),
        Arc::new(InMemoryRunStore::new()),
    );

    let outcome = h.engine.start(start_state(None)).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(outcome.state.should_terminate);
    assert!(outcome.state.triage.is_none());
    assert_eq!(outcome.state.current_phase, "watcher");
    assert_eq!(outcome.visited, vec![Stage::Watcher]);
}

#[tokio::test]
async fn no_proposed_actions_closes_after_analysis() {
    let h = harness(
        TestCost::default(),
        TestInfra::default(),
        Vec::new(),
        Arc::new(InMemoryRunStore::new()),
    );

    let outcome = h.engine.start(start_state(Some(anomaly(750.0)))).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.state.current_phase, "analyst");
    assert!(!outcome.visited.contains(&Stage::HilGate));
}

#[tokio::test]
async fn default_analyst_proposes_a_reversible_budget_alert() {
    use costmend::analysis::DeterministicAnalyst;

    let cost = Arc::new(TestCost::default());
    let analyst = DeterministicAnalyst::new(cost);
    let analysis = analyst
        .propose(
            &anomaly(750.0),
            None,
            &TimeWindow::new("2026-02-01", "2026-02-16"),
        )
        .await
        .unwrap();

    assert_eq!(analysis.recommended_actions.len(), 1);
    let proposed = &analysis.recommended_actions[0];
    assert_eq!(proposed.action_type, "create_budget_alert");
    assert_eq!(proposed.risk_level, ActionRiskLevel::Low);
    assert_eq!(proposed.target_resource, "budget:EC2:123456789012");
    assert!(!proposed.rollback_procedure.is_empty());
}

#[tokio::test]
async fn unanswered_approval_times_out_as_non_approval() {
    let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
    let h = harness(
        TestCost::default(),
        TestInfra::default(),
        vec![action(ActionRiskLevel::Medium, "")],
        store.clone(),
    );

    let outcome = h.engine.start(start_state(Some(anomaly(750.0)))).await.unwrap();
    let workflow_id = outcome.state.workflow_id.clone();

    // a zero-length window expires the request immediately
    let expired = h
        .engine
        .expire_timed_out(chrono::Duration::zero())
        .await
        .unwrap();
    assert_eq!(expired, vec![workflow_id.clone()]);

    let checkpoint = store.load(&workflow_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.state.approval, ApprovalStatus::TimedOut);
    assert!(checkpoint.state.executions.is_empty());

    // the human shows up late: too late
    let err = h
        .engine
        .resume(
            &workflow_id,
            ApprovalDecision {
                approve: true,
                by: "carol".to_string(),
            },
        )
        .await;
    assert!(err.is_err());
}
