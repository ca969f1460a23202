//! Asynchronous gateway notifications.

use super::OrderId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A server-to-server callback or donor return carrying gateway parameters.
///
/// `signature` is the gateway's `{timestamp}.{base64}` value, when the
/// gateway signs its callbacks. The parameters are kept verbatim; each
/// gateway adapter decides which of them it trusts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayNotification {
    pub gateway: String,
    pub order_id: OrderId,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl GatewayNotification {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}
