//! Donor data staging.
//!
//! `DonationData` is the canonical, normalised view of everything the donor
//! (or the session, or gateway defaults) supplied for one attempt. It is
//! built once by [`DonationData::stage`] and afterwards only grows through
//! [`DonationData::add_request_data`]; the `order_id` never changes once set.

pub mod fields;
pub mod messages;
pub mod validation;

use dgw_sdk::objects::OrderId;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

pub use validation::{FieldErrors, ValidationContext, validate};

/// Flat field-name to value map, as received from forms or sessions.
pub type FieldMap = BTreeMap<String, String>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StagingError {
    /// Something tried to replace an assigned order id.
    #[error("order id {current} cannot be replaced by {requested}")]
    OrderIdReassigned { current: OrderId, requested: String },
}

/// Normalised donor data for one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DonationData {
    fields: FieldMap,
}

impl DonationData {
    /// Merge request, session and default values, highest precedence first.
    ///
    /// Empty values are treated as absent so a blank form input never masks
    /// a session or default value.
    pub fn stage(request: &FieldMap, session: &FieldMap, defaults: &FieldMap) -> Self {
        let mut fields = FieldMap::new();
        for layer in [defaults, session, request] {
            for (name, value) in layer {
                if let Some(value) = normalize(name, value) {
                    fields.insert(name.clone(), value);
                }
            }
        }
        Self { fields }
    }

    /// Merge `delta` into the data. Fields absent from `delta` are kept.
    ///
    /// Fails without changing anything when `delta` carries an `order_id`
    /// different from the assigned one.
    pub fn add_request_data(&mut self, delta: FieldMap) -> Result<(), StagingError> {
        let normalized: Vec<(String, String)> = delta
            .into_iter()
            .filter_map(|(name, value)| normalize(&name, &value).map(|v| (name, v)))
            .collect();

        if let Some(current) = self.order_id() {
            if let Some((_, requested)) = normalized
                .iter()
                .find(|(name, value)| name == fields::ORDER_ID && value != current.as_str())
            {
                return Err(StagingError::OrderIdReassigned {
                    current,
                    requested: requested.clone(),
                });
            }
        }

        self.fields.extend(normalized);
        Ok(())
    }

    /// Return the order id, generating one first if none is staged.
    pub fn ensure_order_id(&mut self) -> OrderId {
        if let Some(id) = self.order_id() {
            return id;
        }
        let id = OrderId::generate();
        self.fields
            .insert(fields::ORDER_ID.to_owned(), id.as_str().to_owned());
        id
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.get(fields::ORDER_ID)
            .and_then(|s| OrderId::from_str(s).ok())
    }

    pub fn amount(&self) -> Option<Decimal> {
        self.get(fields::AMOUNT)
            .and_then(|s| Decimal::from_str(s).ok())
    }

    pub fn currency_code(&self) -> Option<&str> {
        self.get(fields::CURRENCY_CODE)
    }

    pub fn country(&self) -> Option<&str> {
        self.get(fields::COUNTRY)
    }

    /// Domain part of the email address, if any.
    pub fn email_domain(&self) -> Option<&str> {
        self.get(fields::EMAIL)
            .and_then(|e| e.rsplit_once('@'))
            .map(|(_, domain)| domain)
    }

    /// Every field, including limbo-only PII.
    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Every field except limbo-only PII.
    pub fn scrubbed(&self) -> FieldMap {
        self.fields
            .iter()
            .filter(|(name, _)| !fields::is_limbo_only(name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Fields suitable for the donor session.
    pub fn session_fields(&self) -> FieldMap {
        self.fields
            .iter()
            .filter(|(name, _)| !fields::NEVER_PERSISTED.contains(&name.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

fn normalize(name: &str, value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let value = match name {
        fields::CURRENCY_CODE | fields::COUNTRY => value.to_ascii_uppercase(),
        fields::EMAIL => value.to_lowercase(),
        fields::CARD_NUM => value.chars().filter(|c| *c != ' ' && *c != '-').collect(),
        fields::AMOUNT => match Decimal::from_str(value) {
            Ok(amount) => format!("{:.2}", amount.round_dp(2)),
            Err(_) => value.to_owned(),
        },
        fields::ORDER_ID => OrderId::from_str(value).ok()?.as_str().to_owned(),
        _ => value.to_owned(),
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn request_beats_session_beats_defaults() {
        let request = map(&[("amount", "10"), ("email", " ")]);
        let session = map(&[("amount", "5"), ("email", "Donor@Example.org"), ("country", "us")]);
        let defaults = map(&[("country", "FR"), ("currency_code", "usd"), ("language", "en")]);

        let data = DonationData::stage(&request, &session, &defaults);
        assert_eq!(data.get("amount"), Some("10.00"));
        assert_eq!(data.get("email"), Some("donor@example.org"));
        assert_eq!(data.get("country"), Some("US"));
        assert_eq!(data.get("currency_code"), Some("USD"));
        assert_eq!(data.get("language"), Some("en"));
        assert_eq!(data.email_domain(), Some("example.org"));
    }

    #[test]
    fn card_numbers_are_compacted_and_bad_amounts_kept_for_validation() {
        let data = DonationData::stage(
            &map(&[("card_num", "4111 1111-1111 1111"), ("amount", "ten")]),
            &FieldMap::new(),
            &FieldMap::new(),
        );
        assert_eq!(data.get("card_num"), Some("4111111111111111"));
        assert_eq!(data.get("amount"), Some("ten"));
        assert_eq!(data.amount(), None);
    }

    #[test]
    fn order_id_is_assigned_once() {
        let mut data = DonationData::default();
        let id = data.ensure_order_id();
        assert_eq!(data.ensure_order_id(), id);

        let err = data
            .add_request_data(map(&[("order_id", "someone-else"), ("amount", "3")]))
            .unwrap_err();
        assert!(matches!(err, StagingError::OrderIdReassigned { .. }));
        // nothing from the rejected delta was applied
        assert_eq!(data.get("amount"), None);

        data.add_request_data(map(&[("order_id", id.as_str()), ("amount", "3")]))
            .unwrap();
        assert_eq!(data.get("amount"), Some("3.00"));
    }

    #[test]
    fn add_request_data_never_removes_fields() {
        let mut data =
            DonationData::stage(&map(&[("email", "a@b.org")]), &FieldMap::new(), &FieldMap::new());
        data.add_request_data(map(&[("email", ""), ("country", "de")]))
            .unwrap();
        assert_eq!(data.get("email"), Some("a@b.org"));
        assert_eq!(data.get("country"), Some("DE"));
    }

    #[test]
    fn scrubbed_drops_limbo_only_fields() {
        let data = DonationData::stage(
            &map(&[
                ("first_name", "Ada"),
                ("street", "1 Main St"),
                ("card_num", "4111111111111111"),
                ("cvv", "123"),
                ("email", "ada@example.org"),
                ("amount", "20"),
            ]),
            &FieldMap::new(),
            &FieldMap::new(),
        );
        let scrubbed = data.scrubbed();
        assert!(scrubbed.keys().all(|k| !fields::is_limbo_only(k)));
        assert_eq!(scrubbed.get("email").map(String::as_str), Some("ada@example.org"));

        let session = data.session_fields();
        assert!(session.contains_key("first_name"));
        assert!(!session.contains_key("cvv"));
        assert!(!session.contains_key("card_num"));
    }
}
