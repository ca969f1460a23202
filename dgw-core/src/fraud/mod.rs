//! Fraud scoring.
//!
//! The `FraudFilterChain` is responsible for:
//! - Running an explicit, ordered list of [`FraudFilter`]s over a donation
//! - Bounding every filter by a timeout (a slow filter contributes zero)
//! - Mapping the cumulative score to a [`RiskAction`] through [`ActionRanges`]
//! - Re-scoring after authorisation with CVV/AVS results

mod field_map;
mod ranges;
mod three_d_secure;
mod verification;

pub use field_map::FieldMapFilter;
pub use ranges::{ActionRange, ActionRanges, RangeError};
pub use three_d_secure::ThreeDSecureRules;
pub use verification::{CVV_MISMATCH_PENALTY, ResponseCodeMaps, VerificationResult};

use crate::donation::DonationData;
use async_trait::async_trait;
use dgw_sdk::objects::RiskAction;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One filter's contribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterScore {
    pub delta: Decimal,
    pub reason: Option<String>,
}

impl FilterScore {
    pub fn zero() -> Self {
        Self {
            delta: Decimal::ZERO,
            reason: None,
        }
    }

    pub fn new(delta: Decimal, reason: impl Into<String>) -> Self {
        Self {
            delta,
            reason: Some(reason.into()),
        }
    }
}

/// A single risk signal.
///
/// Implementations that do I/O must handle their own errors and return
/// [`FilterScore::zero`] rather than fail the donation.
#[async_trait]
pub trait FraudFilter: Send + Sync {
    fn name(&self) -> &str;

    async fn score(&self, data: &DonationData) -> FilterScore;
}

/// Per-filter entry in a [`RiskAssessment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOutcome {
    pub filter: String,
    pub delta: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

/// Result of running the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskAssessment {
    pub score: Decimal,
    pub action: RiskAction,
    pub breakdown: Vec<FilterOutcome>,
    /// 3-D Secure rules forced the action up to `challenge`.
    pub three_d_secure: bool,
}

impl RiskAssessment {
    /// Raise the action to at least `challenge` because 3-D Secure applies.
    pub fn require_three_d_secure(&mut self) {
        self.three_d_secure = true;
        self.action = self.action.max(RiskAction::Challenge);
    }
}

/// Ordered fraud filters plus the score-to-action mapping.
pub struct FraudFilterChain {
    base_score: Decimal,
    ranges: ActionRanges,
    filters: Vec<Arc<dyn FraudFilter>>,
    filter_timeout: Duration,
}

impl FraudFilterChain {
    /// Filters run in the order given.
    pub fn new(
        base_score: Decimal,
        ranges: ActionRanges,
        filters: Vec<Arc<dyn FraudFilter>>,
        filter_timeout: Duration,
    ) -> Self {
        Self {
            base_score,
            ranges,
            filters,
            filter_timeout,
        }
    }

    /// A chain with no filters; every donation scores the base score.
    pub fn passthrough(base_score: Decimal, ranges: ActionRanges) -> Self {
        Self::new(base_score, ranges, Vec::new(), Duration::from_secs(2))
    }

    pub async fn assess(&self, data: &DonationData) -> RiskAssessment {
        let mut score = self.base_score;
        let mut breakdown = Vec::with_capacity(self.filters.len());

        for filter in &self.filters {
            let outcome = match tokio::time::timeout(self.filter_timeout, filter.score(data)).await
            {
                Ok(result) => FilterOutcome {
                    filter: filter.name().to_owned(),
                    delta: result.delta,
                    reason: result.reason,
                    timed_out: false,
                },
                Err(_) => {
                    warn!(
                        filter = filter.name(),
                        timeout_ms = self.filter_timeout.as_millis() as u64,
                        "Fraud filter timed out, scoring zero"
                    );
                    FilterOutcome {
                        filter: filter.name().to_owned(),
                        delta: Decimal::ZERO,
                        reason: None,
                        timed_out: true,
                    }
                }
            };
            score += outcome.delta;
            breakdown.push(outcome);
        }

        let action = self.ranges.action_for(score);
        debug!(score = %score, action = %action, "Fraud assessment complete");
        RiskAssessment {
            score,
            action,
            breakdown,
            three_d_secure: false,
        }
    }

    /// Add post-authorisation signals to an earlier assessment.
    pub fn rescore(&self, prior: &RiskAssessment, extra: Vec<FilterOutcome>) -> RiskAssessment {
        let score = prior.score + extra.iter().map(|o| o.delta).sum::<Decimal>();
        let mut breakdown = prior.breakdown.clone();
        breakdown.extend(extra);
        let mut action = self.ranges.action_for(score);
        if prior.three_d_secure {
            action = action.max(RiskAction::Challenge);
        }
        RiskAssessment {
            score,
            action,
            breakdown,
            three_d_secure: prior.three_d_secure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct Fixed(&'static str, Decimal);

    #[async_trait]
    impl FraudFilter for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        async fn score(&self, _data: &DonationData) -> FilterScore {
            FilterScore::new(self.1, "fixed")
        }
    }

    struct Stuck;

    #[async_trait]
    impl FraudFilter for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn score(&self, _data: &DonationData) -> FilterScore {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            FilterScore::new(dec!(1000), "never")
        }
    }

    fn ranges() -> ActionRanges {
        ActionRanges::new(vec![
            ActionRange::new(RiskAction::Process, dec!(0), dec!(40)),
            ActionRange::new(RiskAction::Review, dec!(40), dec!(60)),
            ActionRange::new(RiskAction::Reject, dec!(60), dec!(1000)),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn sums_filters_in_order() {
        let chain = FraudFilterChain::new(
            dec!(5),
            ranges(),
            vec![Arc::new(Fixed("a", dec!(20))), Arc::new(Fixed("b", dec!(15)))],
            Duration::from_secs(1),
        );
        let risk = chain.assess(&DonationData::default()).await;
        assert_eq!(risk.score, dec!(40));
        // 40 is inside both process and review; the first listed wins
        assert_eq!(risk.action, RiskAction::Process);
        let names: Vec<_> = risk.breakdown.iter().map(|o| o.filter.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_filter_contributes_zero() {
        let chain = FraudFilterChain::new(
            dec!(0),
            ranges(),
            vec![Arc::new(Stuck), Arc::new(Fixed("b", dec!(45)))],
            Duration::from_secs(2),
        );
        let risk = chain.assess(&DonationData::default()).await;
        assert_eq!(risk.score, dec!(45));
        assert_eq!(risk.action, RiskAction::Review);
        assert!(risk.breakdown[0].timed_out);
    }

    #[tokio::test]
    async fn required_three_d_secure_upgrades_process_to_challenge() {
        let chain = FraudFilterChain::passthrough(dec!(0), ActionRanges::default());
        let mut risk = chain.assess(&DonationData::default()).await;
        assert_eq!(risk.action, RiskAction::Process);

        risk.require_three_d_secure();
        assert_eq!(risk.action, RiskAction::Challenge);
        assert!(risk.three_d_secure);
    }

    #[test]
    fn rescore_keeps_challenge_and_can_reject() {
        let chain = FraudFilterChain::passthrough(dec!(0), ranges());
        let mut prior = RiskAssessment {
            score: dec!(10),
            action: RiskAction::Process,
            breakdown: vec![],
            three_d_secure: false,
        };
        prior.require_three_d_secure();

        let cvv = FilterOutcome {
            filter: "cvv".into(),
            delta: dec!(0),
            reason: None,
            timed_out: false,
        };
        assert_eq!(chain.rescore(&prior, vec![cvv.clone()]).action, RiskAction::Challenge);

        let avs = FilterOutcome {
            delta: dec!(100),
            filter: "avs".into(),
            ..cvv
        };
        let after = chain.rescore(&prior, vec![avs]);
        assert_eq!(after.score, dec!(110));
        assert_eq!(after.action, RiskAction::Reject);
    }
}
