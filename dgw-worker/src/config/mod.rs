//! Configuration module for dgw-worker.
//!
//! Reads `dgw-config.toml`, validates it and builds the immutable
//! `DonationConfig` plus the gateway settings the sweepers run against.

pub mod file;

use crate::config::file::{FileConfig, GatewaySection, ResponseCodeProfile};
use dgw_core::config::{DonationConfig, OrphanConfig, ResultPages, RiskConfig};
use dgw_core::currency::RateTable;
use dgw_core::fraud::{ActionRange, ActionRanges, ResponseCodeMaps, ThreeDSecureRules};
use dgw_core::gateway::GatewayAdapter;
use dgw_core::gateways::{
    DirectCardConfig, DirectCardGateway, HostedPageConfig, HostedPageGateway,
};
use dgw_core::queue::QueueRoutes;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// A configured gateway, ready to be instantiated.
#[derive(Debug, Clone)]
pub enum GatewaySettings {
    DirectCard(DirectCardConfig),
    HostedPage(HostedPageConfig),
}

impl GatewaySettings {
    pub fn name(&self) -> &str {
        match self {
            Self::DirectCard(c) => &c.name,
            Self::HostedPage(c) => &c.name,
        }
    }

    pub fn build(&self) -> Arc<dyn GatewayAdapter> {
        match self {
            Self::DirectCard(c) => Arc::new(DirectCardGateway::new(c.clone())),
            Self::HostedPage(c) => Arc::new(HostedPageGateway::new(c.clone())),
        }
    }
}

/// Loaded configuration result containing all parts.
pub struct LoadedConfig {
    pub donation: DonationConfig,
    pub gateways: Vec<GatewaySettings>,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
        }
    }

    /// Read, validate and build the configuration.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let file_config: FileConfig = toml::from_str(&config_content)?;
        build_loaded_config(file_config)
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

fn build_loaded_config(file: FileConfig) -> Result<LoadedConfig, ConfigError> {
    let donation = build_donation_config(&file)?;
    let gateways = build_gateways(file.gateways)?;

    for gateway in &gateways {
        let currencies = match gateway {
            GatewaySettings::DirectCard(c) => &c.currencies,
            GatewaySettings::HostedPage(c) => &c.currencies,
        };
        if let Some(missing) = currencies.iter().find(|c| !donation.rates.contains(c)) {
            return Err(invalid(format!(
                "gateway {} accepts {missing}, which has no exchange rate",
                gateway.name()
            )));
        }
    }

    Ok(LoadedConfig { donation, gateways })
}

fn build_donation_config(file: &FileConfig) -> Result<DonationConfig, ConfigError> {
    let defaults = DonationConfig::default();
    let d = &file.donation;

    if d.token_salt.trim().is_empty() {
        return Err(invalid("donation.token_salt must be set"));
    }

    let rates = if file.rates.is_empty() {
        defaults.rates.clone()
    } else {
        let mut rates = RateTable::empty();
        for (currency, rate) in &file.rates {
            rates
                .insert(currency, *rate)
                .map_err(|e| invalid(format!("rates: {e}")))?;
        }
        rates
    };

    let price_floor = d.price_floor.unwrap_or(defaults.price_floor);
    let price_ceiling = d.price_ceiling.unwrap_or(defaults.price_ceiling);
    if price_floor > price_ceiling {
        return Err(invalid(format!(
            "price_floor {price_floor} is above price_ceiling {price_ceiling}"
        )));
    }

    let fallback_currency = d.fallback_currency.clone().or(defaults.fallback_currency);
    let mut config = DonationConfig {
        price_floor,
        price_ceiling,
        fallback_currency,
        notify_on_convert: d.notify_on_convert.unwrap_or(defaults.notify_on_convert),
        retry_loop_count: d.retry_loop_count.unwrap_or(defaults.retry_loop_count),
        retry_backoff: d
            .retry_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_backoff),
        gateway_timeout: d
            .gateway_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.gateway_timeout),
        queue_timeout: d
            .queue_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.queue_timeout),
        filter_timeout: d
            .filter_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.filter_timeout),
        forbidden_countries: d
            .forbidden_countries
            .as_ref()
            .map(|countries| {
                countries
                    .iter()
                    .map(|c| c.trim().to_ascii_uppercase())
                    .collect()
            })
            .unwrap_or(defaults.forbidden_countries),
        three_d_secure: build_three_d_secure(file),
        rates,
        risk: build_risk(file)?,
        pages: build_pages(file),
        orphans: build_orphans(file)?,
        queues: file
            .queues
            .iter()
            .fold(QueueRoutes::default(), |routes, (key, name)| {
                routes.with_route(key, name)
            }),
        default_form: d.default_form.clone().unwrap_or(defaults.default_form),
        token_salt: d.token_salt.clone().into_bytes().into_boxed_slice(),
    };

    if let Some(fallback) = config.fallback_currency() {
        if !config.rates.contains(&fallback) {
            return Err(invalid(format!(
                "fallback currency {fallback} is not in the rate table"
            )));
        }
        config.fallback_currency = Some(fallback);
    }

    Ok(config)
}

fn build_three_d_secure(file: &FileConfig) -> ThreeDSecureRules {
    match &file.three_d_secure {
        Some(rules) => rules
            .iter()
            .fold(ThreeDSecureRules::none(), |acc, (currency, countries)| {
                acc.with_rule(currency, countries)
            }),
        None => ThreeDSecureRules::default(),
    }
}

fn build_risk(file: &FileConfig) -> Result<RiskConfig, ConfigError> {
    let defaults = RiskConfig::default();
    let action_ranges = if file.risk.ranges.is_empty() {
        defaults.action_ranges
    } else {
        let ranges = file
            .risk
            .ranges
            .iter()
            .map(|r| ActionRange::new(r.action, r.min, r.max))
            .collect();
        ActionRanges::new(ranges).map_err(|e| invalid(format!("risk.ranges: {e}")))?
    };
    Ok(RiskConfig {
        base_score: file.risk.base_score.unwrap_or(defaults.base_score),
        action_ranges,
    })
}

fn build_pages(file: &FileConfig) -> ResultPages {
    let defaults = ResultPages::default();
    let p = file.pages.clone();
    ResultPages {
        thank_you: p.thank_you.unwrap_or(defaults.thank_you),
        fail: p.fail.unwrap_or(defaults.fail),
        return_url: p.return_url.unwrap_or(defaults.return_url),
        go_to_thank_you_on: p.go_to_thank_you_on.unwrap_or(defaults.go_to_thank_you_on),
    }
}

fn build_orphans(file: &FileConfig) -> Result<OrphanConfig, ConfigError> {
    let defaults = OrphanConfig::default();
    let o = &file.orphans;
    let config = OrphanConfig {
        enabled: o.enabled.unwrap_or(defaults.enabled),
        horizon: o
            .horizon_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.horizon),
        interval: o
            .interval_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.interval),
        max_per_execute: o.max_per_execute.unwrap_or(defaults.max_per_execute),
    };
    if config.interval.is_zero() {
        return Err(invalid("orphans.interval_secs must be positive"));
    }
    if config.max_per_execute == 0 {
        return Err(invalid("orphans.max_per_execute must be positive"));
    }
    Ok(config)
}

fn build_gateways(sections: Vec<GatewaySection>) -> Result<Vec<GatewaySettings>, ConfigError> {
    let mut names = BTreeSet::new();
    let mut gateways = Vec::with_capacity(sections.len());

    for section in sections {
        let name = section.name().trim().to_owned();
        if name.is_empty() {
            return Err(invalid("gateway with an empty name"));
        }
        if !names.insert(name.clone()) {
            return Err(invalid(format!("gateway {name} is configured twice")));
        }

        let settings = match section {
            GatewaySection::DirectCard {
                endpoint,
                api_key,
                notification_secret,
                currencies,
                response_codes,
                ..
            } => GatewaySettings::DirectCard(DirectCardConfig {
                endpoint: checked_endpoint(&name, endpoint)?,
                notification_secret: checked_secret(&name, notification_secret)?,
                api_key,
                currencies: checked_currencies(&name, currencies)?,
                response_codes: match response_codes {
                    ResponseCodeProfile::GlobalCollect => ResponseCodeMaps::global_collect(),
                    ResponseCodeProfile::Worldpay => ResponseCodeMaps::worldpay(),
                },
                name,
            }),
            GatewaySection::HostedPage {
                endpoint,
                api_key,
                notification_secret,
                currencies,
                iframe,
                ..
            } => GatewaySettings::HostedPage(HostedPageConfig {
                endpoint: checked_endpoint(&name, endpoint)?,
                notification_secret: checked_secret(&name, notification_secret)?,
                api_key,
                currencies: checked_currencies(&name, currencies)?,
                iframe,
                name,
            }),
        };
        gateways.push(settings);
    }

    Ok(gateways)
}

fn checked_endpoint(gateway: &str, endpoint: url::Url) -> Result<url::Url, ConfigError> {
    // Paths are joined onto the endpoint, which drops a last segment
    // without a trailing slash.
    if !endpoint.path().ends_with('/') {
        return Err(invalid(format!(
            "gateway {gateway}: endpoint {endpoint} must end with '/'"
        )));
    }
    Ok(endpoint)
}

fn checked_secret(gateway: &str, secret: String) -> Result<Box<[u8]>, ConfigError> {
    if secret.trim().is_empty() {
        return Err(invalid(format!(
            "gateway {gateway}: notification_secret must be set"
        )));
    }
    Ok(secret.into_bytes().into_boxed_slice())
}

fn checked_currencies(
    gateway: &str,
    currencies: Vec<String>,
) -> Result<BTreeSet<String>, ConfigError> {
    let currencies: BTreeSet<String> = currencies
        .iter()
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .collect();
    if currencies.is_empty() {
        return Err(invalid(format!("gateway {gateway} accepts no currency")));
    }
    Ok(currencies)
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dgw_core::gateway::GatewayFlow;
    use dgw_core::queue::QueueName;
    use dgw_sdk::objects::RiskAction;
    use rust_decimal_macros::dec;

    const BASE: &str = r#"
[donation]
token_salt = "salt"
fallback_currency = "eur"

[[gateways]]
kind = "direct_card"
name = "card"
endpoint = "https://api.card.test/v1/"
api_key = "k1"
notification_secret = "s1"
currencies = ["usd", "EUR"]
"#;

    fn load(toml_str: &str) -> Result<LoadedConfig, ConfigError> {
        build_loaded_config(toml::from_str(toml_str)?)
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let loaded = load(BASE).unwrap();
        let defaults = DonationConfig::default();

        assert_eq!(loaded.donation.price_floor, defaults.price_floor);
        assert_eq!(loaded.donation.retry_loop_count, 3);
        assert_eq!(loaded.donation.fallback_currency.as_deref(), Some("EUR"));
        assert_eq!(loaded.donation.orphans, OrphanConfig::default());
        assert!(loaded.donation.three_d_secure.requires("INR", Some("IN")));
        assert_eq!(
            loaded.donation.risk.action_ranges.action_for(dec!(50)),
            RiskAction::Process
        );
        assert_eq!(&*loaded.donation.token_salt, b"salt");
    }

    #[test]
    fn test_gateways_are_built() {
        let loaded = load(BASE).unwrap();
        assert_eq!(loaded.gateways.len(), 1);
        let GatewaySettings::DirectCard(card) = &loaded.gateways[0] else {
            panic!("expected a direct card gateway");
        };
        assert!(card.currencies.contains("USD"));

        let gateway = loaded.gateways[0].build();
        assert_eq!(gateway.name(), "card");
        assert_eq!(gateway.flow(), GatewayFlow::Direct);
        assert_eq!(gateway.limbo_queue(), QueueName::GatewayLimbo("card".to_owned()));
    }

    #[test]
    fn test_disabled_queue_route() {
        let loaded = load(&format!("{BASE}\n[queues]\npayments-init = \"\"\n")).unwrap();
        assert_eq!(loaded.donation.queues.resolve(&QueueName::Init), None);
        assert_eq!(
            loaded.donation.queues.resolve(&QueueName::Completed).as_deref(),
            Some("completed")
        );
    }

    #[test]
    fn test_fallback_must_have_rate() {
        let toml_str = BASE.replace("fallback_currency = \"eur\"", "fallback_currency = \"XTS\"");
        assert!(matches!(load(&toml_str), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let toml_str = format!(
            "{BASE}\n[[risk.ranges]]\naction = \"reject\"\nmin = \"90\"\nmax = \"10\"\n"
        );
        assert!(matches!(load(&toml_str), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_missing_secrets_rejected() {
        let no_salt = BASE.replace("token_salt = \"salt\"", "token_salt = \"\"");
        assert!(matches!(load(&no_salt), Err(ConfigError::ValidationError(_))));

        let no_secret = BASE.replace("notification_secret = \"s1\"", "notification_secret = \" \"");
        assert!(matches!(load(&no_secret), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_duplicate_gateway_rejected() {
        let toml_str = format!(
            r#"{BASE}
[[gateways]]
kind = "hosted_page"
name = "card"
endpoint = "https://checkout.hosted.test/"
api_key = "k2"
notification_secret = "s2"
currencies = ["USD"]
"#
        );
        assert!(matches!(load(&toml_str), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_endpoint_needs_trailing_slash() {
        let toml_str = BASE.replace("https://api.card.test/v1/", "https://api.card.test/v1");
        assert!(matches!(load(&toml_str), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_gateway_currency_needs_rate() {
        let toml_str = BASE.replace("[\"usd\", \"EUR\"]", "[\"XTS\"]");
        assert!(matches!(load(&toml_str), Err(ConfigError::ValidationError(_))));
    }
}
