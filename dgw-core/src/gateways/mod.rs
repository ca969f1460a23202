//! Concrete gateway adapters.
//!
//! - `DirectCardGateway`: server-to-server card authorisation with CVV/AVS
//!   results and a status query for reconciliation
//! - `HostedPageGateway`: hosted payment page reached by redirect or iframe,
//!   settled by signed notifications

pub mod direct_card;
pub mod hosted_page;

pub use direct_card::{DirectCardConfig, DirectCardGateway};
pub use hosted_page::{HostedPageConfig, HostedPageGateway};

use crate::gateway::{GatewayError, GatewayOutcome};
use dgw_sdk::objects::GatewayNotification;
use dgw_sdk::signature::verify_params;

/// Check the HMAC signature on a notification and that the signed params
/// name the order the notification is delivered for.
fn verify_signed(notification: &GatewayNotification, secret: &[u8]) -> Result<(), GatewayError> {
    let signature = notification
        .signature
        .as_deref()
        .ok_or(GatewayError::Unsigned)?;
    verify_params(&notification.params, signature, secret)?;
    match notification.param("order_id") {
        Some(signed) if signed == notification.order_id.as_str() => Ok(()),
        Some(signed) => Err(GatewayError::Malformed(format!(
            "notification for {} signed for order {signed}",
            notification.order_id
        ))),
        None => Err(GatewayError::Malformed(
            "notification without signed order_id".to_owned(),
        )),
    }
}

/// Shared reading of the `status` vocabulary both adapters use.
fn outcome_from_status(
    status: &str,
    code: Option<&str>,
    message: Option<&str>,
) -> Option<GatewayOutcome> {
    match status {
        "approved" | "complete" | "captured" => Some(GatewayOutcome::Approved),
        "pending" | "authorized" => Some(GatewayOutcome::Pending),
        "declined" | "failed" | "refused" => Some(GatewayOutcome::Declined {
            code: code.unwrap_or("declined").to_owned(),
            message: message
                .unwrap_or(crate::donation::messages::PROCESSING_ERROR)
                .to_owned(),
        }),
        "cancelled" | "canceled" => Some(GatewayOutcome::Cancelled),
        _ => None,
    }
}

fn http_client(timeout: std::time::Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dgw_sdk::signature::sign_params;
    use std::collections::BTreeMap;

    fn notification(params: &[(&str, &str)]) -> GatewayNotification {
        GatewayNotification {
            gateway: "hosted".to_owned(),
            order_id: "o-1".parse().unwrap(),
            params: params
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect::<BTreeMap<_, _>>(),
            signature: None,
        }
    }

    #[test]
    fn test_unsigned_notification_is_rejected() {
        let n = notification(&[("order_id", "o-1"), ("status", "complete")]);
        assert!(matches!(verify_signed(&n, b"secret"), Err(GatewayError::Unsigned)));
    }

    #[test]
    fn test_signed_notification_verifies() {
        let mut n = notification(&[("order_id", "o-1"), ("status", "complete")]);
        n.signature = Some(sign_params(&n.params, b"secret"));
        assert!(verify_signed(&n, b"secret").is_ok());
        assert!(matches!(
            verify_signed(&n, b"other"),
            Err(GatewayError::Signature(_))
        ));
    }

    #[test]
    fn test_signature_is_bound_to_order() {
        let mut n = notification(&[("order_id", "paid-order"), ("status", "approved")]);
        n.signature = Some(sign_params(&n.params, b"secret"));
        n.order_id = "victim-order".parse().unwrap();
        assert!(matches!(
            verify_signed(&n, b"secret"),
            Err(GatewayError::Malformed(_))
        ));
    }

    #[test]
    fn test_signed_params_without_order_are_rejected() {
        let mut n = notification(&[("status", "approved")]);
        n.signature = Some(sign_params(&n.params, b"secret"));
        assert!(matches!(
            verify_signed(&n, b"secret"),
            Err(GatewayError::Malformed(_))
        ));
    }

    #[test]
    fn test_status_vocabulary() {
        assert_eq!(outcome_from_status("complete", None, None), Some(GatewayOutcome::Approved));
        assert_eq!(
            outcome_from_status("declined", Some("05"), Some("Do not honour")),
            Some(GatewayOutcome::Declined {
                code: "05".to_owned(),
                message: "Do not honour".to_owned(),
            })
        );
        assert_eq!(outcome_from_status("mystery", None, None), None);
    }
}
