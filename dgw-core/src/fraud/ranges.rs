use dgw_sdk::objects::RiskAction;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("range for {action} has min {min} above max {max}")]
    Inverted {
        action: RiskAction,
        min: Decimal,
        max: Decimal,
    },
}

/// Inclusive score range mapped to an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRange {
    pub action: RiskAction,
    pub min: Decimal,
    pub max: Decimal,
}

impl ActionRange {
    pub fn new(action: RiskAction, min: Decimal, max: Decimal) -> Self {
        Self { action, min, max }
    }

    pub fn contains(&self, score: Decimal) -> bool {
        self.min <= score && score <= self.max
    }
}

/// Ordered action ranges. The first range containing the score wins and a
/// score outside every range is processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRanges(Vec<ActionRange>);

impl ActionRanges {
    pub fn new(ranges: Vec<ActionRange>) -> Result<Self, RangeError> {
        if let Some(bad) = ranges.iter().find(|r| r.min > r.max) {
            return Err(RangeError::Inverted {
                action: bad.action,
                min: bad.min,
                max: bad.max,
            });
        }
        Ok(Self(ranges))
    }

    pub fn action_for(&self, score: Decimal) -> RiskAction {
        self.0
            .iter()
            .find(|r| r.contains(score))
            .map(|r| r.action)
            .unwrap_or(RiskAction::Process)
    }

    pub fn ranges(&self) -> &[ActionRange] {
        &self.0
    }
}

impl Default for ActionRanges {
    /// Process 0 to 100; the other actions are disabled with `[-1, -1]`.
    fn default() -> Self {
        let disabled = -Decimal::ONE;
        Self(vec![
            ActionRange::new(RiskAction::Process, Decimal::ZERO, Decimal::ONE_HUNDRED),
            ActionRange::new(RiskAction::Review, disabled, disabled),
            ActionRange::new(RiskAction::Challenge, disabled, disabled),
            ActionRange::new(RiskAction::Reject, disabled, disabled),
        ])
    }
}
