//! Canonical donor field names.

pub const AMOUNT: &str = "amount";
pub const CURRENCY_CODE: &str = "currency_code";
pub const EMAIL: &str = "email";
pub const FIRST_NAME: &str = "first_name";
pub const LAST_NAME: &str = "last_name";
pub const STREET: &str = "street";
pub const STREET_SUPPLEMENTAL: &str = "street_supplemental";
pub const CITY: &str = "city";
pub const STATE_PROVINCE: &str = "state_province";
pub const POSTAL_CODE: &str = "postal_code";
pub const COUNTRY: &str = "country";
pub const CARD_NUM: &str = "card_num";
pub const CARD_TYPE: &str = "card_type";
pub const CVV: &str = "cvv";
/// Card expiry as `MMYY`.
pub const EXPIRATION: &str = "expiration";
pub const PAYMENT_METHOD: &str = "payment_method";
pub const PAYMENT_SUBMETHOD: &str = "payment_submethod";
pub const ORDER_ID: &str = "order_id";
pub const UTM_SOURCE: &str = "utm_source";
pub const UTM_MEDIUM: &str = "utm_medium";
pub const UTM_CAMPAIGN: &str = "utm_campaign";
pub const LANGUAGE: &str = "language";
pub const REFERRER: &str = "referrer";
pub const USER_IP: &str = "user_ip";
/// `1`/`true` asks for immediate processing without a form round trip.
pub const REDIRECT: &str = "redirect";
/// Name of the form the donor came from.
pub const FFNAME: &str = "ffname";
/// Pseudo field for errors that belong to no single input.
pub const GENERAL: &str = "general";

/// Fields that may only ever be written to a limbo queue.
pub const LIMBO_ONLY: [&str; 11] = [
    FIRST_NAME,
    LAST_NAME,
    STREET,
    STREET_SUPPLEMENTAL,
    CITY,
    STATE_PROVINCE,
    POSTAL_CODE,
    CARD_NUM,
    CARD_TYPE,
    CVV,
    EXPIRATION,
];

/// Fields that are never written to the donor session.
pub const NEVER_PERSISTED: [&str; 2] = [CVV, CARD_NUM];

pub fn is_limbo_only(field: &str) -> bool {
    LIMBO_ONLY.contains(&field)
}
