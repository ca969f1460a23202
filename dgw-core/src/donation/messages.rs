//! Message keys attached to field and transaction errors.
//!
//! The caller resolves these against its own message catalog.

pub const REQUIRED: &str = "donate_interface-error-msg-required";
pub const INVALID_AMOUNT: &str = "donate_interface-error-msg-invalid-amount";
pub const AMOUNT_TOO_SMALL: &str = "donate_interface-smallamount-error";
pub const AMOUNT_TOO_LARGE: &str = "donate_interface-bigamount-error";
pub const INVALID_CURRENCY: &str = "donate_interface-error-msg-invalid-currency";
pub const COUNTRY_FORBIDDEN: &str = "donate_interface-error-msg-country-forbidden";
pub const INVALID_EMAIL: &str = "donate_interface-error-msg-invalid-email";
pub const CARD_NUM: &str = "donate_interface-error-msg-card-num";
pub const EXPIRATION: &str = "donate_interface-error-msg-expiration";
pub const FALLBACK_CURRENCY_NOTICE: &str = "donate_interface-fallback-currency-notice";
pub const TOKEN_MISMATCH: &str = "donate_interface-token-mismatch";
pub const PROCESSING_ERROR: &str = "donate_interface-processing-error";

/// Transaction error code for "no results yet".
pub const INTERNAL_NO_RESULTS_CODE: &str = "internal-0000";
pub const INTERNAL_NO_RESULTS: &str = "Internal error: no results yet.";

/// Transaction error code for an exhausted gateway retry budget.
pub const INTERNAL_GATEWAY_UNREACHABLE_CODE: &str = "internal-0001";
pub const INTERNAL_GATEWAY_UNREACHABLE: &str = "donate_interface-processing-error-retry";
