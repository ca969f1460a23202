//! Donation attempt identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier of one donation attempt.
///
/// Assigned once when donor data is staged and never changed afterwards.
/// Generated ids are UUIDv7 in simple (hyphen-less) form so they sort by
/// creation time, but ids handed back by a gateway are accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OrderIdError {
    #[error("order id is empty")]
    Empty,
    #[error("order id contains invalid character {0:?}")]
    InvalidCharacter(char),
}

impl OrderId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for OrderId {
    type Err = OrderIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(OrderIdError::Empty);
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_' || *c == '.'))
        {
            return Err(OrderIdError::InvalidCharacter(c));
        }
        Ok(Self(s.to_owned()))
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_parseable() {
        let a = OrderId::generate();
        let b = OrderId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert_eq!(a.as_str().parse::<OrderId>().unwrap(), a);
    }

    #[test]
    fn rejects_empty_and_odd_characters() {
        assert_eq!("  ".parse::<OrderId>(), Err(OrderIdError::Empty));
        assert_eq!(
            "12/34".parse::<OrderId>(),
            Err(OrderIdError::InvalidCharacter('/'))
        );
        assert_eq!("12345.1".parse::<OrderId>().unwrap().as_str(), "12345.1");
    }
}
