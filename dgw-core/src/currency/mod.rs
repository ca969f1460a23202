//! Currency conversion through a USD-based rate table.
//!
//! Rates are "units of currency per 1 USD". Conversion goes through USD and
//! floors the final amount to whole units, so a converted amount never
//! exceeds the value the donor entered.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use thiserror::Error;

/// The currency every rate is expressed against.
pub const BASE_CURRENCY: &str = "USD";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CurrencyError {
    /// A currency is missing from the rate table.
    #[error("unsupported currency {0}")]
    UnsupportedCurrency(String),

    /// A rate was zero or negative.
    #[error("invalid rate {rate} for {currency}")]
    InvalidRate { currency: String, rate: Decimal },

    /// Decimal arithmetic overflowed.
    #[error("amount out of range while converting {0}")]
    Overflow(String),
}

/// Exchange rates against [`BASE_CURRENCY`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateTable {
    rates: BTreeMap<String, Decimal>,
}

impl RateTable {
    pub fn empty() -> Self {
        Self {
            rates: BTreeMap::new(),
        }
    }

    /// Insert or replace the rate for `currency`.
    pub fn insert(&mut self, currency: &str, rate: Decimal) -> Result<(), CurrencyError> {
        let currency = currency.trim().to_ascii_uppercase();
        if rate <= Decimal::ZERO {
            return Err(CurrencyError::InvalidRate { currency, rate });
        }
        self.rates.insert(currency, rate);
        Ok(())
    }

    pub fn with_rate(mut self, currency: &str, rate: Decimal) -> Result<Self, CurrencyError> {
        self.insert(currency, rate)?;
        Ok(self)
    }

    /// Units of `currency` per 1 USD. USD itself is always known.
    pub fn rate(&self, currency: &str) -> Option<Decimal> {
        if currency == BASE_CURRENCY {
            return Some(Decimal::ONE);
        }
        self.rates.get(currency).copied()
    }

    pub fn contains(&self, currency: &str) -> bool {
        self.rate(currency).is_some()
    }

    /// Unfloored USD value of `amount`, used for price floor/ceiling checks.
    pub fn to_usd(&self, amount: Decimal, currency: &str) -> Option<Decimal> {
        amount.checked_div(self.rate(currency)?)
    }

    pub fn currencies(&self) -> impl Iterator<Item = &str> {
        std::iter::once(BASE_CURRENCY).chain(self.rates.keys().map(String::as_str))
    }
}

impl Default for RateTable {
    /// A small built-in table; deployments replace it from configuration.
    fn default() -> Self {
        let rates = [
            ("AUD", Decimal::new(152, 2)),
            ("BRL", Decimal::new(540, 2)),
            ("CAD", Decimal::new(137, 2)),
            ("CHF", Decimal::new(88, 2)),
            ("EUR", Decimal::new(92, 2)),
            ("GBP", Decimal::new(79, 2)),
            ("INR", Decimal::new(8320, 2)),
            ("JPY", Decimal::new(14950, 2)),
            ("MXN", Decimal::new(1710, 2)),
            ("SEK", Decimal::new(1050, 2)),
        ];
        Self {
            rates: rates
                .into_iter()
                .map(|(code, rate)| (code.to_owned(), rate))
                .collect(),
        }
    }
}

/// Convert `amount` from one currency to another through USD.
///
/// The final step is floored to whole units of the target currency.
pub fn convert(
    amount: Decimal,
    from: &str,
    to: &str,
    rates: &RateTable,
) -> Result<Decimal, CurrencyError> {
    let from_rate = rates
        .rate(from)
        .ok_or_else(|| CurrencyError::UnsupportedCurrency(from.to_owned()))?;
    let to_rate = rates
        .rate(to)
        .ok_or_else(|| CurrencyError::UnsupportedCurrency(to.to_owned()))?;

    let usd = amount
        .checked_div(from_rate)
        .ok_or_else(|| CurrencyError::Overflow(from.to_owned()))?;
    let target = usd
        .checked_mul(to_rate)
        .ok_or_else(|| CurrencyError::Overflow(to.to_owned()))?;
    Ok(target.floor())
}
