//! Queue wire format.

use super::OrderId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Keys owned by the envelope; never carried in `fields`.
pub const RESERVED_KEYS: [&str; 3] = ["order_id", "gateway", "date"];

/// A transaction snapshot published to a named queue.
///
/// Serialized as one flat JSON object: the envelope keys plus every
/// transaction field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub order_id: OrderId,
    pub gateway: String,
    /// Unix timestamp (seconds) at which the message was built.
    pub date: i64,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl QueueMessage {
    pub fn new(
        order_id: OrderId,
        gateway: impl Into<String>,
        date: i64,
        mut fields: BTreeMap<String, String>,
    ) -> Self {
        for key in RESERVED_KEYS {
            fields.remove(key);
        }
        Self {
            order_id,
            gateway: gateway.into(),
            date,
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        if !RESERVED_KEYS.contains(&name) {
            self.fields.insert(name.to_owned(), value.into());
        }
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_keys_are_not_duplicated_in_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("order_id".to_owned(), "spoofed".to_owned());
        fields.insert("amount".to_owned(), "10.00".to_owned());
        let msg = QueueMessage::new("abc".parse().unwrap(), "hosted", 1_700_000_000, fields)
            .with_field("date", "overwritten?");

        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["order_id"], "abc");
        assert_eq!(json["amount"], "10.00");
        assert_eq!(json["date"], 1_700_000_000);
        assert_eq!(QueueMessage::from_json(&msg.to_json().unwrap()).unwrap(), msg);
    }
}
