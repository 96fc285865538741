use crate::model::{AnomalyCategory, AnomalySeverity, CostAnomaly, TriageEvidence, TriageResult};
use crate::providers::{
    CostProvider, DeployEvent, InfraProvider, KubeCostProvider, MetricSnapshot, TimeWindow,
};

/// Deploy-history horizon consulted by the deploy-correlation rule.
const DEPLOY_LOOKBACK_HOURS: u32 = 48;

/// Evidence must explain at least this share of the anomaly delta to be
/// considered material.
const MATERIAL_SHARE: f64 = 0.2;

/// Severity breakpoints on the raw daily dollar delta.
pub fn severity_from_delta(delta_dollars_daily: f64) -> AnomalySeverity {
    if delta_dollars_daily >= 5000.0 {
        AnomalySeverity::Critical
    } else if delta_dollars_daily >= 1000.0 {
        AnomalySeverity::High
    } else if delta_dollars_daily >= 200.0 {
        AnomalySeverity::Medium
    } else {
        AnomalySeverity::Low
    }
}

/// `(new - old) / old`, with `old == 0` yielding 1.0 if `new != 0` else 0.0.
pub fn percent_change(new: f64, old: f64) -> f64 {
    if old == 0.0 {
        if new != 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        (new - old) / old
    }
}

/// Non-evidence signals consulted by the later cascade rules.
#[derive(Debug, Clone, Default)]
pub struct TriageSignals {
    pub deploys: Vec<DeployEvent>,
    pub usage_metric: MetricSnapshot,
}

struct RuleMatch {
    category: AnomalyCategory,
    confidence: f64,
    summary: String,
}

type Rule = fn(&CostAnomaly, &mut TriageEvidence, &TriageSignals) -> Option<RuleMatch>;

/// The ordered evidence cascade. The first rule whose threshold is met wins,
/// which is what makes categories mutually exclusive; reordering entries
/// changes semantics, and the order is pinned by tests.
const CASCADE: &[(&str, Rule)] = &[
    ("commitment_coverage_drift", rule_commitment_drift),
    ("credits_refunds_fees", rule_credits_refunds_fees),
    ("marketplace", rule_marketplace),
    ("data_transfer", rule_data_transfer),
    ("k8s_cost_shift", rule_namespace_shift),
    ("deploy_related", rule_deploy_correlation),
    ("expected_growth", rule_expected_growth),
];

fn material_threshold(anomaly: &CostAnomaly) -> f64 {
    // floor the divisor at $1 so tiny deltas don't blow up the ratio
    MATERIAL_SHARE * anomaly.delta_dollars.max(1.0)
}

fn rule_commitment_drift(
    _anomaly: &CostAnomaly,
    ev: &mut TriageEvidence,
    _signals: &TriageSignals,
) -> Option<RuleMatch> {
    let ri = ev.ri_coverage_delta.unwrap_or(0.0);
    let sp = ev.sp_coverage_delta.unwrap_or(0.0);
    // coverage drift often looks like a pricing change but is commitment churn
    if ri.abs() >= 0.05 || sp.abs() >= 0.05 {
        return Some(RuleMatch {
            category: AnomalyCategory::CommitmentCoverageDrift,
            confidence: 0.8,
            summary: "ri/sp coverage shifted materially; investigate commitment coverage/utilization"
                .to_string(),
        });
    }
    None
}

fn rule_credits_refunds_fees(
    anomaly: &CostAnomaly,
    ev: &mut TriageEvidence,
    _signals: &TriageSignals,
) -> Option<RuleMatch> {
    let threshold = material_threshold(anomaly);
    let credits = ev.credits_delta.unwrap_or(0.0);
    let refunds = ev.refunds_delta.unwrap_or(0.0);
    // credits/refunds are typically negative; a drop in credits raises net spend
    if credits.abs() >= threshold || refunds.abs() >= threshold {
        return Some(RuleMatch {
            category: AnomalyCategory::CreditsRefundsFees,
            confidence: 0.75,
            summary: "net spend change driven by credits/refunds/fees movement (not usage)"
                .to_string(),
        });
    }
    None
}

fn rule_marketplace(
    anomaly: &CostAnomaly,
    ev: &mut TriageEvidence,
    _signals: &TriageSignals,
) -> Option<RuleMatch> {
    if ev.marketplace_delta.unwrap_or(0.0) >= material_threshold(anomaly) {
        return Some(RuleMatch {
            category: AnomalyCategory::Marketplace,
            confidence: 0.8,
            summary: "spend appears dominated by marketplace charges (subscription/usage)"
                .to_string(),
        });
    }
    None
}

fn rule_data_transfer(
    anomaly: &CostAnomaly,
    ev: &mut TriageEvidence,
    _signals: &TriageSignals,
) -> Option<RuleMatch> {
    if ev.data_transfer_delta.unwrap_or(0.0) >= material_threshold(anomaly) {
        return Some(RuleMatch {
            category: AnomalyCategory::DataTransfer,
            confidence: 0.85,
            summary: "spike primarily in data transfer usage types".to_string(),
        });
    }
    None
}

fn rule_namespace_shift(
    anomaly: &CostAnomaly,
    ev: &mut TriageEvidence,
    _signals: &TriageSignals,
) -> Option<RuleMatch> {
    let max_delta = ev
        .k8s_namespace_deltas
        .values()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    if !ev.k8s_namespace_deltas.is_empty() && max_delta >= material_threshold(anomaly) {
        return Some(RuleMatch {
            category: AnomalyCategory::K8sCostShift,
            confidence: 0.7,
            summary: "k8s namespace allocation shifted materially (kubecost)".to_string(),
        });
    }
    None
}

fn rule_deploy_correlation(
    _anomaly: &CostAnomaly,
    ev: &mut TriageEvidence,
    signals: &TriageSignals,
) -> Option<RuleMatch> {
    if signals.deploys.is_empty() {
        return None;
    }
    ev.deploy_correlation = signals.deploys.iter().map(|d| d.id.clone()).collect();
    Some(RuleMatch {
        category: AnomalyCategory::DeployRelated,
        confidence: 0.7,
        summary: "recent deploys detected near anomaly window".to_string(),
    })
}

fn rule_expected_growth(
    anomaly: &CostAnomaly,
    ev: &mut TriageEvidence,
    signals: &TriageSignals,
) -> Option<RuleMatch> {
    let baseline = signals.usage_metric.baseline;
    let usage_pct = percent_change(signals.usage_metric.current, baseline);
    let cost_pct = anomaly.delta_percent / 100.0;

    if baseline > 0.0 && usage_pct > 0.0 && (usage_pct - cost_pct).abs() <= 0.15 {
        ev.usage_correlation = vec![format!(
            "usage pct ~{usage_pct:.2} vs cost pct ~{cost_pct:.2}"
        )];
        return Some(RuleMatch {
            category: AnomalyCategory::ExpectedGrowth,
            confidence: 0.8,
            summary: "usage increase roughly explains cost increase".to_string(),
        });
    }
    None
}

/// Pure classification over already-gathered evidence: evaluates the cascade
/// in order, first match wins, `unknown` when nothing fires.
pub fn classify(
    anomaly: &CostAnomaly,
    mut evidence: TriageEvidence,
    signals: &TriageSignals,
) -> TriageResult {
    let severity = severity_from_delta(anomaly.delta_dollars);

    for (name, rule) in CASCADE {
        if let Some(hit) = rule(anomaly, &mut evidence, signals) {
            tracing::debug!(anomaly_id = %anomaly.anomaly_id, rule = name, "Triage rule matched");
            return TriageResult {
                category: hit.category,
                severity,
                confidence: hit.confidence,
                summary: hit.summary,
                evidence,
            };
        }
    }

    TriageResult {
        category: AnomalyCategory::Unknown,
        severity,
        confidence: 0.4,
        summary: "no strong deterministic signal; requires deeper analysis".to_string(),
        evidence,
    }
}

/// Gather all evidence from the providers, then classify. Every collaborator
/// call completes before the decision is made; independent commitment lookups
/// run concurrently. A failing provider degrades to absent evidence rather
/// than failing the stage.
pub async fn triage(
    anomaly: &CostAnomaly,
    cost: &dyn CostProvider,
    infra: &dyn InfraProvider,
    kubecost: Option<&dyn KubeCostProvider>,
    window: &TimeWindow,
) -> TriageResult {
    let mut ev = TriageEvidence::default();

    let (ri, sp) = tokio::join!(
        cost.ri_coverage(&anomaly.account_id, window),
        cost.sp_coverage(&anomaly.account_id, window),
    );
    ev.ri_coverage_delta = Some(degrade("ri_coverage", ri).coverage_delta);
    ev.sp_coverage_delta = Some(degrade("sp_coverage", sp).coverage_delta);

    let items = degrade(
        "billing_line_items",
        cost.billing_line_items(&anomaly.account_id, window, Some(anomaly.service.as_str()))
            .await,
    );

    fn sum_matching(
        items: &[crate::providers::BillingLineItem],
        pred: impl Fn(&crate::providers::BillingLineItem) -> bool,
    ) -> f64 {
        items.iter().filter(|x| pred(x)).map(|x| x.unblended_cost).sum()
    }

    ev.credits_delta = Some(sum_matching(&items, |x| {
        x.line_item_type.eq_ignore_ascii_case("credit")
    }));
    ev.refunds_delta = Some(sum_matching(&items, |x| {
        x.line_item_type.eq_ignore_ascii_case("refund")
    }));
    ev.fees_delta = Some(sum_matching(&items, |x| {
        x.line_item_type.eq_ignore_ascii_case("fee") || x.line_item_type.eq_ignore_ascii_case("rifee")
    }));
    ev.marketplace_delta = Some(sum_matching(&items, |x| {
        x.product_name.to_lowercase().contains("marketplace")
            || x.product_code.to_lowercase().contains("aws marketplace")
    }));
    ev.data_transfer_delta = Some(sum_matching(&items, |x| {
        x.usage_type.to_lowercase().contains("datatransfer")
    }));

    if let Some(kube) = kubecost {
        let allocations = degrade("namespace_allocation", kube.namespace_allocation("24h").await);
        ev.k8s_namespace_deltas = allocations
            .into_iter()
            .map(|(ns, alloc)| (ns, alloc.delta))
            .collect();
    }

    let signals = TriageSignals {
        deploys: degrade(
            "recent_deploys",
            infra
                .recent_deploys(&anomaly.service, DEPLOY_LOOKBACK_HOURS)
                .await,
        ),
        usage_metric: degrade(
            "metric_snapshot",
            infra.metric_snapshot(&anomaly.service, "Requests").await,
        ),
    };

    classify(anomaly, ev, &signals)
}

/// Map a provider failure to absent evidence so the cascade can fall through.
fn degrade<T: Default>(what: &str, result: crate::error::Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(provider_call = what, error = %e, "Evidence unavailable, treating as absent");
            T::default()
        }
    }
}
