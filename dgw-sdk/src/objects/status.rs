//! Lifecycle and risk vocabulary shared by the core and its consumers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Final status of a donation attempt.
///
/// `Complete`, `Failed` and `Cancelled` are terminal. `Pending` may only
/// move on through an asynchronous source (gateway notification, donor
/// return or orphan sweep). `Revised` marks an attempt whose currency was
/// replaced by the configured fallback and carries no outcome yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalStatus {
    Pending,
    Complete,
    Failed,
    Revised,
    Cancelled,
}

/// Where a status change originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    /// The synchronous reply to our own gateway call.
    Synchronous,
    /// A gateway notification, donor return, or orphan sweep re-query.
    Asynchronous,
}

impl FinalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Whether an attempt currently at `from` may move to `to`.
    pub fn can_transition(from: Option<Self>, to: Self, source: StatusSource) -> bool {
        match from {
            None | Some(Self::Revised) => true,
            Some(Self::Pending) => {
                to == Self::Pending
                    || (to.is_terminal() && source == StatusSource::Asynchronous)
            }
            Some(_) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Revised => "revised",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown final status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for FinalStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            "revised" => Ok(Self::Revised),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}

/// Action chosen from a cumulative fraud score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskAction {
    Process,
    Review,
    Challenge,
    Reject,
}

impl RiskAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Review => "review",
            Self::Challenge => "challenge",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for RiskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_never_move() {
        for from in [FinalStatus::Complete, FinalStatus::Failed, FinalStatus::Cancelled] {
            for to in [
                FinalStatus::Pending,
                FinalStatus::Complete,
                FinalStatus::Failed,
                FinalStatus::Revised,
                FinalStatus::Cancelled,
            ] {
                assert!(!FinalStatus::can_transition(
                    Some(from),
                    to,
                    StatusSource::Asynchronous
                ));
            }
        }
    }

    #[test]
    fn pending_resolves_only_asynchronously() {
        let pending = Some(FinalStatus::Pending);
        assert!(!FinalStatus::can_transition(
            pending,
            FinalStatus::Complete,
            StatusSource::Synchronous
        ));
        assert!(FinalStatus::can_transition(
            pending,
            FinalStatus::Complete,
            StatusSource::Asynchronous
        ));
        assert!(!FinalStatus::can_transition(
            pending,
            FinalStatus::Revised,
            StatusSource::Asynchronous
        ));
    }

    #[test]
    fn wire_names_are_lowercase() {
        assert_eq!(
            serde_json::to_string(&FinalStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
        assert_eq!("revised".parse::<FinalStatus>().unwrap(), FinalStatus::Revised);
        assert_eq!(RiskAction::Challenge.to_string(), "challenge");
    }
}
