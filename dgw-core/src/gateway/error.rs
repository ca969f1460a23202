use crate::donation::StagingError;
use crate::queue::QueueError;
use crate::session::SessionError;
use super::TransactionState;
use dgw_sdk::signature::SignatureError;
use std::fmt;
use thiserror::Error;

/// Failure to reach the gateway at all. Always worth retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("gateway call timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    /// The gateway answered with a 5xx status.
    #[error("gateway unavailable (HTTP {0})")]
    Unavailable(u16),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The gateway answered but the answer makes no sense.
    #[error("malformed gateway response: {0}")]
    Malformed(String),

    /// The request could not be built from the donor data.
    #[error("cannot build gateway request: {0}")]
    Request(String),

    #[error("notification signature rejected: {0}")]
    Signature(#[from] SignatureError),

    #[error("notification is not signed")]
    Unsigned,
}

/// Why a request was refused outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenReason {
    /// No donor data in the session for this order.
    NoSession,
    /// The anti-forgery token is missing or wrong.
    TokenMismatch,
}

impl fmt::Display for ForbiddenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSession => f.write_str("no session data for order"),
            Self::TokenMismatch => f.write_str("token mismatch"),
        }
    }
}

/// Errors surfaced by [`DonationProcessor`](super::DonationProcessor).
///
/// Donor-correctable problems are never errors; they come back as a
/// `PaymentResult`.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Deployment misconfiguration; needs an operator.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Equivalent of HTTP 403.
    #[error("forbidden: {0}")]
    Forbidden(ForbiddenReason),

    #[error("invalid transaction transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: TransactionState,
        to: TransactionState,
    },

    #[error("notification for gateway {got} sent to {expected}")]
    WrongGateway { expected: String, got: String },

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}
