//! Card verification response codes.
//!
//! Gateways report a CVV result and one or two AVS results after
//! authorisation. These tables turn them into a fraud score contribution.

use super::FilterOutcome;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Score added when the CVV did not match.
pub const CVV_MISMATCH_PENALTY: Decimal = Decimal::ONE_HUNDRED;

/// Verification codes as returned by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationResult {
    pub cvv: Option<String>,
    /// The AVS code, or the address half for split-AVS gateways.
    pub avs_address: Option<String>,
    /// The postal-code half for split-AVS gateways.
    pub avs_zip: Option<String>,
}

impl VerificationResult {
    pub fn is_empty(&self) -> bool {
        self.cvv.is_none() && self.avs_address.is_none() && self.avs_zip.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AvsTable {
    Combined(BTreeMap<&'static str, u8>),
    Split {
        address: BTreeMap<&'static str, u8>,
        zip: BTreeMap<&'static str, u8>,
    },
}

/// CVV and AVS code tables for one gateway family.
///
/// Codes missing from a table are scored like the empty code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCodeMaps {
    cvv: BTreeMap<&'static str, bool>,
    avs: AvsTable,
}

impl ResponseCodeMaps {
    /// Single-letter AVS codes, numeric CVV flags.
    pub fn global_collect() -> Self {
        let cvv = [
            ("M", true),
            ("N", false),
            ("P", true),
            ("S", false),
            ("U", true),
            ("Y", false),
            ("0", true),
            ("", false),
        ];
        let avs = [
            ("A", 50),
            ("B", 50),
            ("C", 50),
            ("D", 0),
            ("E", 100),
            ("F", 0),
            ("G", 50),
            ("I", 50),
            ("M", 0),
            ("N", 100),
            ("P", 50),
            ("R", 100),
            ("S", 50),
            ("U", 50),
            ("W", 50),
            ("X", 0),
            ("Y", 0),
            ("Z", 50),
            ("0", 25),
            ("", 100),
        ];
        Self {
            cvv: cvv.into_iter().collect(),
            avs: AvsTable::Combined(avs.into_iter().collect()),
        }
    }

    /// Numeric CVV codes, separate address and postal-code AVS results.
    pub fn worldpay() -> Self {
        let cvv = [
            ("0", false),
            ("1", true),
            ("2", false),
            ("3", false),
            ("4", false),
            ("5", false),
            ("6", false),
            ("7", false),
            ("8", false),
            ("9", false),
            ("", false),
        ];
        let address = [
            ("0", 50),
            ("1", 0),
            ("2", 12),
            ("3", 50),
            ("4", 12),
            ("9", 12),
            ("", 50),
        ];
        let zip = [
            ("0", 50),
            ("1", 0),
            ("2", 12),
            ("3", 0),
            ("4", 0),
            ("5", 12),
            ("9", 12),
            ("", 50),
        ];
        Self {
            cvv: cvv.into_iter().collect(),
            avs: AvsTable::Split {
                address: address.into_iter().collect(),
                zip: zip.into_iter().collect(),
            },
        }
    }

    pub fn cvv_matches(&self, code: Option<&str>) -> bool {
        lookup(&self.cvv, code).unwrap_or(false)
    }

    pub fn avs_penalty(&self, address: Option<&str>, zip: Option<&str>) -> Decimal {
        let points = match &self.avs {
            AvsTable::Combined(table) => lookup(table, address).unwrap_or(100),
            AvsTable::Split { address: a, zip: z } => {
                lookup(a, address).unwrap_or(50) + lookup(z, zip).unwrap_or(50)
            }
        };
        Decimal::from(points)
    }

    /// Score contributions for a verification result.
    pub fn outcomes(&self, result: &VerificationResult) -> Vec<FilterOutcome> {
        let cvv_ok = self.cvv_matches(result.cvv.as_deref());
        vec![
            FilterOutcome {
                filter: "cvv".to_owned(),
                delta: if cvv_ok {
                    Decimal::ZERO
                } else {
                    CVV_MISMATCH_PENALTY
                },
                reason: Some(format!("cvv={}", result.cvv.as_deref().unwrap_or(""))),
                timed_out: false,
            },
            FilterOutcome {
                filter: "avs".to_owned(),
                delta: self.avs_penalty(result.avs_address.as_deref(), result.avs_zip.as_deref()),
                reason: Some(format!(
                    "avs={}/{}",
                    result.avs_address.as_deref().unwrap_or(""),
                    result.avs_zip.as_deref().unwrap_or("")
                )),
                timed_out: false,
            },
        ]
    }
}

fn lookup<T: Copy>(table: &BTreeMap<&'static str, T>, code: Option<&str>) -> Option<T> {
    let code = code.map(str::trim).unwrap_or("");
    table.get(code).or_else(|| table.get("")).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn global_collect_tables() {
        let maps = ResponseCodeMaps::global_collect();
        assert!(maps.cvv_matches(Some("M")));
        assert!(maps.cvv_matches(Some("0")));
        assert!(!maps.cvv_matches(Some("N")));
        assert!(!maps.cvv_matches(None));
        assert_eq!(maps.avs_penalty(Some("Y"), None), dec!(0));
        assert_eq!(maps.avs_penalty(Some("0"), None), dec!(25));
        assert_eq!(maps.avs_penalty(Some("E"), None), dec!(100));
        // unknown codes score like a missing code
        assert_eq!(maps.avs_penalty(Some("Q"), None), dec!(100));
    }

    #[test]
    fn worldpay_adds_address_and_zip() {
        let maps = ResponseCodeMaps::worldpay();
        assert!(maps.cvv_matches(Some("1")));
        assert!(!maps.cvv_matches(Some("2")));
        assert_eq!(maps.avs_penalty(Some("1"), Some("1")), dec!(0));
        assert_eq!(maps.avs_penalty(Some("2"), Some("5")), dec!(24));
        assert_eq!(maps.avs_penalty(None, None), dec!(100));
    }

    #[test]
    fn outcomes_penalise_cvv_mismatch() {
        let maps = ResponseCodeMaps::global_collect();
        let result = VerificationResult {
            cvv: Some("N".into()),
            avs_address: Some("M".into()),
            avs_zip: None,
        };
        let total: Decimal = maps.outcomes(&result).iter().map(|o| o.delta).sum();
        assert_eq!(total, CVV_MISMATCH_PENALTY);
    }
}
