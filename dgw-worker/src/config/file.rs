//! TOML file configuration structures.
//!
//! These structs map directly onto `dgw-config.toml`. Keys left out keep the
//! built-in defaults of `DonationConfig`.

use dgw_sdk::objects::{FinalStatus, RiskAction};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub donation: DonationSection,
    /// Units of each currency per 1 USD. Empty keeps the built-in table.
    #[serde(default)]
    pub rates: BTreeMap<String, Decimal>,
    #[serde(default)]
    pub risk: RiskSection,
    /// Currency to the countries forcing 3-D Secure; an empty list means
    /// every country. Absent keeps the built-in rule.
    #[serde(default)]
    pub three_d_secure: Option<BTreeMap<String, Vec<String>>>,
    /// Logical queue key to backend queue name. An empty name disables the
    /// queue.
    #[serde(default)]
    pub queues: BTreeMap<String, String>,
    #[serde(default)]
    pub orphans: OrphanSection,
    #[serde(default)]
    pub pages: PagesSection,
    #[serde(default)]
    pub gateways: Vec<GatewaySection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DonationSection {
    pub price_floor: Option<Decimal>,
    pub price_ceiling: Option<Decimal>,
    pub fallback_currency: Option<String>,
    pub notify_on_convert: Option<bool>,
    pub retry_loop_count: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub gateway_timeout_secs: Option<u64>,
    pub queue_timeout_ms: Option<u64>,
    pub filter_timeout_ms: Option<u64>,
    pub forbidden_countries: Option<Vec<String>>,
    pub default_form: Option<String>,
    /// HMAC key for donor anti-forgery tokens.
    pub token_salt: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RiskSection {
    pub base_score: Option<Decimal>,
    /// Ordered; the first range containing a score decides the action.
    #[serde(default)]
    pub ranges: Vec<RangeSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RangeSection {
    pub action: RiskAction,
    pub min: Decimal,
    pub max: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrphanSection {
    pub enabled: Option<bool>,
    pub horizon_secs: Option<u64>,
    pub interval_secs: Option<u64>,
    pub max_per_execute: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PagesSection {
    pub thank_you: Option<String>,
    pub fail: Option<String>,
    pub return_url: Option<String>,
    pub go_to_thank_you_on: Option<Vec<FinalStatus>>,
}

/// One payment gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewaySection {
    DirectCard {
        name: String,
        endpoint: Url,
        api_key: String,
        notification_secret: String,
        currencies: Vec<String>,
        #[serde(default)]
        response_codes: ResponseCodeProfile,
    },
    HostedPage {
        name: String,
        endpoint: Url,
        api_key: String,
        notification_secret: String,
        currencies: Vec<String>,
        #[serde(default)]
        iframe: bool,
    },
}

impl GatewaySection {
    pub fn name(&self) -> &str {
        match self {
            Self::DirectCard { name, .. } | Self::HostedPage { name, .. } => name,
        }
    }
}

/// Which CVV/AVS code tables a card gateway speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCodeProfile {
    #[default]
    GlobalCollect,
    Worldpay,
}
