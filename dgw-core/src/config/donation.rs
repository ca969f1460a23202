//! Per-deployment donation settings.

use super::{OrphanConfig, ResultPages};
use crate::currency::RateTable;
use crate::fraud::{ActionRanges, ThreeDSecureRules};
use crate::queue::QueueRoutes;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::time::Duration;

/// Everything the orchestration core reads while handling a donation.
#[derive(Debug, Clone)]
pub struct DonationConfig {
    /// Smallest accepted donation, in USD.
    pub price_floor: Decimal,
    /// Largest accepted donation, in USD.
    pub price_ceiling: Decimal,
    /// Currency to convert to when the donor's currency is unsupported.
    pub fallback_currency: Option<String>,
    /// Tell the donor when a fallback conversion happened.
    pub notify_on_convert: bool,
    /// Total attempts for one gateway call when transport fails.
    pub retry_loop_count: u32,
    /// Base delay between gateway attempts; doubled per attempt.
    pub retry_backoff: Duration,
    pub gateway_timeout: Duration,
    pub queue_timeout: Duration,
    pub filter_timeout: Duration,
    /// ISO 3166 alpha-2 codes that may not donate.
    pub forbidden_countries: BTreeSet<String>,
    pub three_d_secure: ThreeDSecureRules,
    pub rates: RateTable,
    pub risk: RiskConfig,
    pub pages: ResultPages,
    pub orphans: OrphanConfig,
    pub queues: QueueRoutes,
    /// Form shown when a request is not processed immediately.
    pub default_form: String,
    /// HMAC key for donor anti-forgery tokens.
    pub token_salt: Box<[u8]>,
}

/// Fraud scoring settings.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Score every assessment starts from.
    pub base_score: Decimal,
    pub action_ranges: ActionRanges,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_score: Decimal::ZERO,
            action_ranges: ActionRanges::default(),
        }
    }
}

impl Default for DonationConfig {
    fn default() -> Self {
        Self {
            price_floor: Decimal::new(100, 2),
            price_ceiling: Decimal::new(1_000_000, 2),
            fallback_currency: None,
            notify_on_convert: true,
            retry_loop_count: 3,
            retry_backoff: Duration::from_millis(250),
            gateway_timeout: Duration::from_secs(5),
            queue_timeout: Duration::from_secs(1),
            filter_timeout: Duration::from_secs(2),
            forbidden_countries: BTreeSet::new(),
            three_d_secure: ThreeDSecureRules::default(),
            rates: RateTable::default(),
            risk: RiskConfig::default(),
            pages: ResultPages::default(),
            orphans: OrphanConfig::default(),
            queues: QueueRoutes::default(),
            default_form: "donate-default".to_owned(),
            token_salt: Box::default(),
        }
    }
}

impl DonationConfig {
    /// The configured fallback currency, upper-cased.
    pub fn fallback_currency(&self) -> Option<String> {
        self.fallback_currency
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_ascii_uppercase)
    }
}
