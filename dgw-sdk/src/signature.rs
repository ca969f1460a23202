//! HMAC-SHA256 helpers for donor tokens and gateway callbacks.
//!
//! Two schemes live here:
//!
//! * **Donor tokens**: an anti-forgery value bound to one `order_id`,
//!   `{nonce}.{HMAC-SHA256("{order_id}.{nonce}", salt)}`, both parts base64.
//!   Tokens are stored in the donor session and compared on every return.
//!
//! * **Parameter signing** (gateway callbacks):
//!   `HMAC-SHA256("{timestamp}.{canonical_params}", secret)`, carried as
//!   `{unix_timestamp}.{base64_signature}`. Canonical parameters are the
//!   URL-encoded `key=value` pairs sorted by key and joined with `&`.

use crate::objects::OrderId;
use std::collections::BTreeMap;

/// Parameter name carrying the gateway signature on callbacks.
pub const SIGNATURE_PARAM: &str = "signature";

/// Maximum allowed age of a callback signature (in seconds).
pub const MAX_SIGNATURE_AGE: i64 = 5 * 60;

/// Errors produced by signature operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid signature format")]
    InvalidFormat,
    #[error("invalid base64 encoding")]
    InvalidBase64,
    #[error("invalid signature")]
    SignatureMismatch,
    #[error("signature expired")]
    Expired,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

fn hmac_key(key: &[u8]) -> ring::hmac::Key {
    ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key)
}

fn b64(bytes: &[u8]) -> String {
    fast32::base64::RFC4648_NOPAD.encode(bytes)
}

fn unb64(s: &str) -> Result<Vec<u8>, SignatureError> {
    fast32::base64::RFC4648_NOPAD
        .decode_str(s)
        .map_err(|_| SignatureError::InvalidBase64)
}

// ---------------------------------------------------------------------------
// Donor tokens
// ---------------------------------------------------------------------------

/// Mint a fresh anti-forgery token for `order_id`.
pub fn mint_donor_token(salt: &[u8], order_id: &OrderId) -> String {
    let nonce = b64(&rand::random::<[u8; 16]>());
    let data = format!("{order_id}.{nonce}");
    let tag = ring::hmac::sign(&hmac_key(salt), data.as_bytes());
    format!("{nonce}.{}", b64(tag.as_ref()))
}

/// Check that `token` was minted with `salt` for `order_id`.
pub fn verify_donor_token(
    salt: &[u8],
    order_id: &OrderId,
    token: &str,
) -> Result<(), SignatureError> {
    let (nonce, tag) = token.split_once('.').ok_or(SignatureError::InvalidFormat)?;
    if nonce.is_empty() {
        return Err(SignatureError::InvalidFormat);
    }
    let tag = unb64(tag)?;
    let data = format!("{order_id}.{nonce}");
    ring::hmac::verify(&hmac_key(salt), data.as_bytes(), &tag)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Parameter signing
// ---------------------------------------------------------------------------

/// Canonical form of a parameter map. The signature parameter itself is
/// excluded.
pub fn canonical_params(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .filter(|(k, _)| k.as_str() != SIGNATURE_PARAM)
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Sign `params` at the current time, returning `{timestamp}.{base64}`.
pub fn sign_params(params: &BTreeMap<String, String>, key: &[u8]) -> String {
    sign_params_at(params, key, time::OffsetDateTime::now_utc().unix_timestamp())
}

/// Sign `params` as of `timestamp`.
pub fn sign_params_at(params: &BTreeMap<String, String>, key: &[u8], timestamp: i64) -> String {
    let data = format!("{timestamp}.{}", canonical_params(params));
    let tag = ring::hmac::sign(&hmac_key(key), data.as_bytes());
    format_signature(timestamp, tag.as_ref())
}

/// Verify a `{timestamp}.{base64}` signature over `params` and its freshness.
pub fn verify_params(
    params: &BTreeMap<String, String>,
    signature: &str,
    key: &[u8],
) -> Result<(), SignatureError> {
    let (timestamp, tag) = parse_signature(signature)?;
    let data = format!("{timestamp}.{}", canonical_params(params));
    ring::hmac::verify(&hmac_key(key), data.as_bytes(), &tag)?;
    check_timestamp(timestamp)
}

/// Parse `{timestamp}.{base64}` into its parts.
pub fn parse_signature(value: &str) -> Result<(i64, Box<[u8]>), SignatureError> {
    let (timestamp, tag) = value.split_once('.').ok_or(SignatureError::InvalidFormat)?;
    let timestamp: i64 = timestamp.parse().map_err(|_| SignatureError::InvalidFormat)?;
    Ok((timestamp, unb64(tag)?.into_boxed_slice()))
}

/// Format a `{timestamp}.{base64}` value from its parts.
pub fn format_signature(timestamp: i64, signature: &[u8]) -> String {
    format!("{timestamp}.{}", b64(signature))
}

/// Check that a signature timestamp is within [`MAX_SIGNATURE_AGE`].
pub fn check_timestamp(timestamp: i64) -> Result<(), SignatureError> {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    if now - timestamp > MAX_SIGNATURE_AGE {
        return Err(SignatureError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BTreeMap<String, String> {
        [("order_id", "42"), ("status", "complete"), ("note", "a b&c")]
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect()
    }

    #[test]
    fn donor_token_is_bound_to_salt_and_order() {
        let order: OrderId = "order-1".parse().unwrap();
        let other: OrderId = "order-2".parse().unwrap();
        let token = mint_donor_token(b"salt", &order);

        assert_eq!(verify_donor_token(b"salt", &order, &token), Ok(()));
        assert_eq!(
            verify_donor_token(b"salt", &other, &token),
            Err(SignatureError::SignatureMismatch)
        );
        assert_eq!(
            verify_donor_token(b"pepper", &order, &token),
            Err(SignatureError::SignatureMismatch)
        );
        assert_eq!(
            verify_donor_token(b"salt", &order, "garbage"),
            Err(SignatureError::InvalidFormat)
        );
    }

    #[test]
    fn canonical_params_skip_signature_and_encode() {
        let mut p = params();
        p.insert(SIGNATURE_PARAM.to_owned(), "whatever".to_owned());
        assert_eq!(canonical_params(&p), "note=a%20b%26c&order_id=42&status=complete");
    }

    #[test]
    fn param_signature_round_trip() {
        let sig = sign_params(&params(), b"secret");
        assert_eq!(verify_params(&params(), &sig, b"secret"), Ok(()));

        let mut tampered = params();
        tampered.insert("status".to_owned(), "failed".to_owned());
        assert_eq!(
            verify_params(&tampered, &sig, b"secret"),
            Err(SignatureError::SignatureMismatch)
        );
    }

    #[test]
    fn stale_signature_is_rejected() {
        let old = time::OffsetDateTime::now_utc().unix_timestamp() - MAX_SIGNATURE_AGE - 10;
        let sig = sign_params_at(&params(), b"secret", old);
        assert_eq!(
            verify_params(&params(), &sig, b"secret"),
            Err(SignatureError::Expired)
        );
    }
}
