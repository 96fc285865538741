use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::Result;
use crate::model::{VerificationRecommendation, VerificationResult};
use crate::providers::{CostProvider, TimeWindow};

/// Re-measures cost and service health after execution and recommends what
/// to do with the run.
#[async_trait]
pub trait OutcomeVerifier: Send + Sync {
    async fn verify(
        &self,
        service: &str,
        account_id: &str,
        window: &TimeWindow,
    ) -> Result<VerificationResult>;
}

/// Verifier that reads observed savings from the cost provider. Health checks
/// are a deployment concern; an unhealthy service recommends rollback, which
/// the workflow records without acting on.
pub struct CostVerifier {
    cost: Arc<dyn CostProvider>,
}

impl CostVerifier {
    pub fn new(cost: Arc<dyn CostProvider>) -> Self {
        Self { cost }
    }

    // placeholder health probe; a deployment wires real checks here
    fn service_health(&self, _service: &str) -> (bool, String) {
        (true, "ok".to_string())
    }
}

#[async_trait]
impl OutcomeVerifier for CostVerifier {
    async fn verify(
        &self,
        service: &str,
        account_id: &str,
        window: &TimeWindow,
    ) -> Result<VerificationResult> {
        let (health_ok, health_details) = self.service_health(service);

        let ts = self.cost.cost_timeseries(service, account_id, window).await?;
        let observed = ts.observed_savings_daily;

        if !health_ok {
            return Ok(VerificationResult {
                verified_at: Utc::now(),
                cost_reduction_observed: false,
                observed_savings_daily: 0.0,
                service_health_ok: false,
                health_check_details: health_details,
                recommendation: VerificationRecommendation::Rollback,
            });
        }

        if observed > 0.0 {
            return Ok(VerificationResult {
                verified_at: Utc::now(),
                cost_reduction_observed: true,
                observed_savings_daily: observed,
                service_health_ok: true,
                health_check_details: health_details,
                recommendation: VerificationRecommendation::Close,
            });
        }

        Ok(VerificationResult {
            verified_at: Utc::now(),
            cost_reduction_observed: false,
            observed_savings_daily: 0.0,
            service_health_ok: true,
            health_check_details: health_details,
            recommendation: VerificationRecommendation::Monitor,
        })
    }
}
