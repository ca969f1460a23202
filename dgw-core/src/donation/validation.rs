//! Donor-correctable validation.
//!
//! Problems found here never become `Err`: they are returned as a field to
//! message-key map and shown back to the donor.

use super::{DonationData, fields, messages};
use crate::config::DonationConfig;
use std::collections::BTreeMap;

/// Field name to message key.
pub type FieldErrors = BTreeMap<String, String>;

/// The fields every gateway needs.
pub const BASE_REQUIRED: [&str; 3] = [fields::AMOUNT, fields::CURRENCY_CODE, fields::PAYMENT_METHOD];

pub struct ValidationContext<'a> {
    pub config: &'a DonationConfig,
    /// Extra fields required by the gateway.
    pub required_fields: &'a [&'static str],
    pub supports_currency: &'a (dyn Fn(&str) -> bool + Sync),
    /// Date used for card expiry checks.
    pub today: time::Date,
}

/// Validate staged donor data. An empty map means the data is acceptable.
pub fn validate(data: &DonationData, ctx: &ValidationContext<'_>) -> FieldErrors {
    let mut errors = FieldErrors::new();
    let mut flag = |field: &str, key: &str| {
        errors
            .entry(field.to_owned())
            .or_insert_with(|| key.to_owned());
    };

    for field in BASE_REQUIRED.iter().chain(ctx.required_fields) {
        if !data.has(field) {
            flag(field, messages::REQUIRED);
        }
    }

    if let Some(currency) = data.currency_code() {
        let well_formed = currency.len() == 3 && currency.bytes().all(|b| b.is_ascii_uppercase());
        if !well_formed || !(ctx.supports_currency)(currency) {
            flag(fields::CURRENCY_CODE, messages::INVALID_CURRENCY);
        }
    }

    if data.has(fields::AMOUNT) {
        match data.amount() {
            Some(amount) if amount > rust_decimal::Decimal::ZERO => {
                let currency = data.currency_code().unwrap_or_default();
                let usd = ctx
                    .config
                    .rates
                    .to_usd(amount, currency)
                    .unwrap_or(amount);
                if usd < ctx.config.price_floor {
                    flag(fields::AMOUNT, messages::AMOUNT_TOO_SMALL);
                } else if usd > ctx.config.price_ceiling {
                    flag(fields::AMOUNT, messages::AMOUNT_TOO_LARGE);
                }
            }
            _ => flag(fields::AMOUNT, messages::INVALID_AMOUNT),
        }
    }

    if let Some(country) = data.country() {
        if ctx.config.forbidden_countries.contains(country) {
            flag(fields::COUNTRY, messages::COUNTRY_FORBIDDEN);
        }
    }

    if let Some(email) = data.get(fields::EMAIL) {
        if !is_plausible_email(email) {
            flag(fields::EMAIL, messages::INVALID_EMAIL);
        }
    }

    if let Some(card) = data.get(fields::CARD_NUM) {
        if !luhn_valid(card) {
            flag(fields::CARD_NUM, messages::CARD_NUM);
        }
    }

    if let Some(expiration) = data.get(fields::EXPIRATION) {
        if !expiration_valid(expiration, ctx.today) {
            flag(fields::EXPIRATION, messages::EXPIRATION);
        }
    }

    errors
}

fn is_plausible_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) || email.matches('@').count() != 1 {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains("..")
        }
        None => false,
    }
}

/// Luhn checksum over a 12 to 19 digit card number.
pub fn luhn_valid(number: &str) -> bool {
    if !(12..=19).contains(&number.len()) || !number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let sum: u32 = number
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                digit
            }
        })
        .sum();
    sum % 10 == 0
}

/// `MMYY` expiry that is not before the month of `today`.
fn expiration_valid(expiration: &str, today: time::Date) -> bool {
    if expiration.len() != 4 || !expiration.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let (Ok(month), Ok(year)) = (expiration[..2].parse::<u8>(), expiration[2..].parse::<i32>())
    else {
        return false;
    };
    if !(1..=12).contains(&month) {
        return false;
    }
    (2000 + year, month) >= (today.year(), u8::from(today.month()))
}
