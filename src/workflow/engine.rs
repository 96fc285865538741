use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::analysis::ActionProposer;
use crate::error::{AppError, Result};
use crate::executor::ActionExecutor;
use crate::model::{AnomalyCategory, ApprovalStatus, WorkflowState};
use crate::policy::PolicyEngine;
use crate::providers::{CostProvider, InfraProvider, KubeCostProvider, TimeWindow};
use crate::triage;
use crate::verifier::OutcomeVerifier;
use crate::workflow::approval::{ApprovalChannel, ApprovalDecision, ApprovalRequest};
use crate::workflow::store::{Checkpoint, RunStore};

/// The named stages of a run, in routing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Watcher,
    Triager,
    Analyst,
    HilGate,
    Executor,
    Verifier,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Watcher => "watcher",
            Stage::Triager => "triager",
            Stage::Analyst => "analyst",
            Stage::HilGate => "hil_gate",
            Stage::Executor => "executor",
            Stage::Verifier => "verifier",
        }
    }
}

/// How a run ended up after `start` or `resume` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The run reached termination; the state is final.
    Completed,
    /// The run is durably parked at the approval gate.
    Suspended,
}

/// Final state plus the stages visited during this call, in order.
#[derive(Debug)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub state: WorkflowState,
    pub visited: Vec<Stage>,
}

enum StageOutcome {
    Advance,
    Suspend(ApprovalRequest),
}

/// External collaborators the engine sequences. All are chosen at
/// construction time; the engine itself holds no provider-specific logic.
pub struct Collaborators {
    pub cost: Arc<dyn CostProvider>,
    pub infra: Arc<dyn InfraProvider>,
    pub kubecost: Option<Arc<dyn KubeCostProvider>>,
    pub proposer: Arc<dyn ActionProposer>,
    pub executor: Arc<dyn ActionExecutor>,
    pub verifier: Arc<dyn OutcomeVerifier>,
    pub approvals: Arc<dyn ApprovalChannel>,
}

/// The workflow state machine. Owns routing and checkpointing; stages write
/// their fields on the shared state and never talk to each other directly.
pub struct WorkflowEngine {
    collab: Collaborators,
    policy: PolicyEngine,
    store: Arc<dyn RunStore>,
    window: TimeWindow,
}

impl WorkflowEngine {
    pub fn new(
        collab: Collaborators,
        policy: PolicyEngine,
        store: Arc<dyn RunStore>,
        window: TimeWindow,
    ) -> Self {
        Self {
            collab,
            policy,
            store,
            window,
        }
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Run a new workflow from the entry stage. Returns either the final
    /// state or a suspension marker once the run is durably parked at the
    /// approval gate.
    pub async fn start(&self, state: WorkflowState) -> Result<RunOutcome> {
        tracing::info!(workflow_id = %state.workflow_id, tenant = %state.tenant.tenant_id, "Starting workflow");
        self.drive(state, Stage::Watcher, Vec::new()).await
    }

    /// Resume a suspended run with a human decision. Consuming the pending
    /// marker is atomic, so a second resume for the same run fails instead of
    /// committing a divergent outcome.
    pub async fn resume(&self, workflow_id: &str, decision: ApprovalDecision) -> Result<RunOutcome> {
        let checkpoint = match self.store.claim_pending(workflow_id).await? {
            Some(checkpoint) => checkpoint,
            None => {
                return Err(AppError::Workflow(format!(
                    "workflow {workflow_id} is not awaiting approval"
                )))
            }
        };

        let mut state = checkpoint.state;
        if decision.approve {
            state.approval = ApprovalStatus::Approved;
            state.approval_details = format!("approved_by={}", decision.by);
        } else {
            state.approval = ApprovalStatus::Denied;
            state.approval_details = format!("denied_by={}", decision.by);
        }
        state.current_phase = Stage::HilGate.name().to_string();

        tracing::info!(
            workflow_id = %state.workflow_id,
            approval = ?state.approval,
            by = %decision.by,
            "Resuming suspended workflow"
        );

        self.store
            .save(Checkpoint::completed_stage(state.clone()))
            .await?;

        match route_after(Stage::HilGate, &state) {
            Some(next) => self.drive(state, next, vec![Stage::HilGate]).await,
            None => self.finish(state, vec![Stage::HilGate]).await,
        }
    }

    /// Resolve suspended runs whose approval window has elapsed. `timed_out`
    /// routes as non-approval, the same as denied.
    pub async fn expire_timed_out(&self, timeout: Duration) -> Result<Vec<String>> {
        let cutoff = Utc::now() - timeout;
        let stale = self.store.pending_older_than(cutoff).await?;
        let mut expired = Vec::new();

        for workflow_id in stale {
            let Some(checkpoint) = self.store.claim_pending(&workflow_id).await? else {
                // raced with a concurrent resume; the human decision stands
                continue;
            };

            let mut state = checkpoint.state;
            state.approval = ApprovalStatus::TimedOut;
            state.approval_details = "approval window elapsed".to_string();
            state.current_phase = Stage::HilGate.name().to_string();

            tracing::warn!(workflow_id = %state.workflow_id, "Approval timed out, closing run");

            self.store
                .save(Checkpoint::completed_stage(state.clone()))
                .await?;
            self.finish(state, vec![Stage::HilGate]).await?;
            expired.push(workflow_id);
        }

        Ok(expired)
    }

    /// Dispatch loop: apply the stage, checkpoint, route, repeat.
    async fn drive(
        &self,
        mut state: WorkflowState,
        mut stage: Stage,
        mut visited: Vec<Stage>,
    ) -> Result<RunOutcome> {
        loop {
            let outcome = self.apply_stage(stage, &mut state).await?;
            visited.push(stage);

            tracing::info!(
                workflow_id = %state.workflow_id,
                stage = stage.name(),
                error = state.error.as_deref().unwrap_or(""),
                "Stage complete"
            );

            match outcome {
                StageOutcome::Suspend(request) => {
                    // checkpoint durably before handing control to the human
                    self.store
                        .save(Checkpoint::suspended(state.clone()))
                        .await?;
                    self.collab.approvals.request_approval(&request).await?;
                    return Ok(RunOutcome {
                        status: RunStatus::Suspended,
                        state,
                        visited,
                    });
                }
                StageOutcome::Advance => {
                    self.store
                        .save(Checkpoint::completed_stage(state.clone()))
                        .await?;
                    match route_after(stage, &state) {
                        Some(next) => stage = next,
                        None => return self.finish(state, visited).await,
                    }
                }
            }
        }
    }

    async fn finish(&self, state: WorkflowState, visited: Vec<Stage>) -> Result<RunOutcome> {
        match &state.error {
            Some(error) => tracing::warn!(
                workflow_id = %state.workflow_id,
                phase = %state.current_phase,
                error = %error,
                "Workflow aborted"
            ),
            None => tracing::info!(
                workflow_id = %state.workflow_id,
                phase = %state.current_phase,
                "Workflow complete"
            ),
        }
        self.store
            .save(Checkpoint::completed_stage(state.clone()))
            .await?;
        Ok(RunOutcome {
            status: RunStatus::Completed,
            state,
            visited,
        })
    }

    async fn apply_stage(&self, stage: Stage, state: &mut WorkflowState) -> Result<StageOutcome> {
        state.current_phase = stage.name().to_string();
        match stage {
            Stage::Watcher => self.watcher(state),
            Stage::Triager => self.triager(state).await,
            Stage::Analyst => self.analyst(state).await,
            Stage::HilGate => self.hil_gate(state),
            Stage::Executor => self.executor(state).await,
            Stage::Verifier => self.verifier(state).await,
        }
    }

    // watcher is an external trigger in production; here it only validates
    // that the run was handed an anomaly.
    fn watcher(&self, state: &mut WorkflowState) -> Result<StageOutcome> {
        if state.anomaly.is_none() {
            state.should_terminate = true;
        }
        Ok(StageOutcome::Advance)
    }

    async fn triager(&self, state: &mut WorkflowState) -> Result<StageOutcome> {
        let Some(anomaly) = state.anomaly.clone() else {
            state.error = Some("missing anomaly".to_string());
            return Ok(StageOutcome::Advance);
        };

        let result = triage::triage(
            &anomaly,
            self.collab.cost.as_ref(),
            self.collab.infra.as_ref(),
            self.collab.kubecost.as_deref(),
            &self.window,
        )
        .await;

        tracing::info!(
            workflow_id = %state.workflow_id,
            category = ?result.category,
            severity = ?result.severity,
            confidence = result.confidence,
            "Anomaly triaged"
        );
        state.triage = Some(result);
        Ok(StageOutcome::Advance)
    }

    async fn analyst(&self, state: &mut WorkflowState) -> Result<StageOutcome> {
        let Some(anomaly) = state.anomaly.clone() else {
            state.error = Some("missing anomaly".to_string());
            return Ok(StageOutcome::Advance);
        };

        match self
            .collab
            .proposer
            .propose(&anomaly, state.triage.as_ref(), &self.window)
            .await
        {
            Ok(analysis) => state.analysis = Some(analysis),
            Err(e) => state.error = Some(format!("analysis failed: {e}")),
        }
        Ok(StageOutcome::Advance)
    }

    fn hil_gate(&self, state: &mut WorkflowState) -> Result<StageOutcome> {
        let decision = self.policy.decide(state.recommended_actions());
        state.approval = decision.approval;
        state.approval_details = decision.details;

        tracing::info!(
            workflow_id = %state.workflow_id,
            approval = ?state.approval,
            details = %state.approval_details,
            "Policy verdict"
        );

        // hard stop: park the run until an external decision arrives
        if state.approval == ApprovalStatus::Pending {
            let request = ApprovalRequest {
                workflow_id: state.workflow_id.clone(),
                summary: state
                    .triage
                    .as_ref()
                    .map(|t| t.summary.clone())
                    .unwrap_or_default(),
                actions: state.recommended_actions().to_vec(),
            };
            return Ok(StageOutcome::Suspend(request));
        }

        Ok(StageOutcome::Advance)
    }

    async fn executor(&self, state: &mut WorkflowState) -> Result<StageOutcome> {
        let actions = state.recommended_actions().to_vec();

        // gather current tags; the safety check must see the world as it is
        // now, not as it was at proposal time
        let mut tags_by_resource: HashMap<String, HashMap<String, String>> = HashMap::new();
        for action in &actions {
            if action.target_resource.is_empty() {
                continue;
            }
            let tags = self
                .collab
                .infra
                .resource_tags(&action.target_resource)
                .await
                .unwrap_or_default();
            tags_by_resource.insert(action.target_resource.clone(), tags);
        }

        match self
            .collab
            .executor
            .execute(state.approval, &actions, &tags_by_resource)
            .await
        {
            Ok(results) => state.executions = results,
            Err(AppError::Policy(violation)) => {
                tracing::error!(workflow_id = %state.workflow_id, violation = %violation, "Execution blocked");
                state.error = Some(violation);
            }
            Err(e) => return Err(e),
        }
        Ok(StageOutcome::Advance)
    }

    async fn verifier(&self, state: &mut WorkflowState) -> Result<StageOutcome> {
        let Some(anomaly) = state.anomaly.as_ref() else {
            state.error = Some("missing anomaly".to_string());
            return Ok(StageOutcome::Advance);
        };

        match self
            .collab
            .verifier
            .verify(&anomaly.service, &anomaly.account_id, &self.window)
            .await
        {
            Ok(verification) => {
                tracing::info!(
                    workflow_id = %state.workflow_id,
                    recommendation = ?verification.recommendation,
                    "Outcome verified"
                );
                state.verification = Some(verification);
            }
            Err(e) => state.error = Some(format!("verification failed: {e}")),
        }
        Ok(StageOutcome::Advance)
    }
}

/// Routing table. Evaluated after the stage's update has been applied; an
/// `error` on the state short-circuits everything to termination.
pub fn route_after(stage: Stage, state: &WorkflowState) -> Option<Stage> {
    if state.error.is_some() {
        return None;
    }
    match stage {
        Stage::Watcher => {
            if state.should_terminate {
                None
            } else {
                Some(Stage::Triager)
            }
        }
        Stage::Triager => {
            // close high-confidence benign growth without further action
            let benign = state.triage.as_ref().is_some_and(|t| {
                t.category == AnomalyCategory::ExpectedGrowth && t.confidence >= 0.85
            });
            if benign {
                None
            } else {
                Some(Stage::Analyst)
            }
        }
        Stage::Analyst => {
            if state.recommended_actions().is_empty() {
                None
            } else {
                Some(Stage::HilGate)
            }
        }
        Stage::HilGate => {
            if state.approval.permits_execution() {
                Some(Stage::Executor)
            } else {
                None
            }
        }
        Stage::Executor => Some(Stage::Verifier),
        // a rollback recommendation is recorded, not acted on
        Stage::Verifier => None,
    }
}
