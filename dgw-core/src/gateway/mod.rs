//! Gateway contract and the transaction state machine that drives it.
//!
//! Every payment provider implements [`GatewayAdapter`]: how to build a
//! request from donor data, how to send it, and how to read the answer.
//! [`DonationProcessor`] owns everything else (validation, fraud scoring,
//! retries, limbo staging, finalization) and is generic over the adapter.

mod error;
mod http;
mod processor;
mod returns;
mod transaction;

pub use error::{ForbiddenReason, GatewayError, OrchestrationError, TransportError};
pub use http::send_json;
pub use processor::{DonationProcessor, FormCheck};
pub use returns::{NotificationAck, ResultRequest};
pub use transaction::{Transaction, TransactionState};

use crate::donation::{DonationData, FieldMap};
use crate::fraud::{ResponseCodeMaps, VerificationResult};
use crate::queue::QueueName;
use async_trait::async_trait;
use dgw_sdk::objects::{FinalStatus, GatewayNotification, OrderId};
use std::time::Duration;
use url::Url;

/// How the donor interacts with the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayFlow {
    /// Server-to-server authorisation; the answer is final or pending.
    Direct,
    /// The donor is sent to a hosted page and comes back later.
    Redirect,
    /// The hosted page is framed inside ours.
    Iframe,
}

/// Per-call options decided by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub order_id: OrderId,
    /// Ask the gateway for a 3-D Secure challenge.
    pub three_d_secure: bool,
    /// Where the gateway sends the donor back to.
    pub return_url: Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A fully built gateway call.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRequest {
    pub method: HttpMethod,
    pub endpoint: Url,
    pub headers: Vec<(String, String)>,
    pub payload: Option<serde_json::Value>,
}

/// The gateway's answer before interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// What the gateway said happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    Approved,
    Pending,
    Declined { code: String, message: String },
    Cancelled,
    /// Continue on a hosted page.
    Redirect { url: String },
    /// Continue in a framed hosted page.
    Iframe { url: String },
}

impl GatewayOutcome {
    /// The final status this outcome settles on, if it settles at all.
    pub fn final_status(&self) -> Option<FinalStatus> {
        match self {
            Self::Approved => Some(FinalStatus::Complete),
            Self::Pending => Some(FinalStatus::Pending),
            Self::Declined { .. } => Some(FinalStatus::Failed),
            Self::Cancelled => Some(FinalStatus::Cancelled),
            Self::Redirect { .. } | Self::Iframe { .. } => None,
        }
    }
}

/// A gateway answer mapped into domain terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedResponse {
    pub outcome: GatewayOutcome,
    pub gateway_txn_id: Option<String>,
    pub verification: VerificationResult,
}

impl MappedResponse {
    pub fn new(outcome: GatewayOutcome) -> Self {
        Self {
            outcome,
            gateway_txn_id: None,
            verification: VerificationResult::default(),
        }
    }

    pub fn with_txn_id(mut self, id: Option<String>) -> Self {
        self.gateway_txn_id = id;
        self
    }
}

/// One payment provider.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    /// Short identifier, also used in queue names.
    fn name(&self) -> &str;

    fn flow(&self) -> GatewayFlow;

    fn supports_currency(&self, currency: &str) -> bool;

    /// Fields this gateway needs on top of amount, currency and method.
    fn required_fields(&self) -> &[&'static str];

    /// Lowest-precedence values when staging donor data.
    fn defaults(&self) -> FieldMap {
        FieldMap::new()
    }

    /// Where donor records wait while the donor is away.
    fn limbo_queue(&self) -> QueueName {
        QueueName::Limbo
    }

    /// CVV/AVS tables, for gateways that report card verification.
    fn response_codes(&self) -> Option<&ResponseCodeMaps> {
        None
    }

    fn build_request(
        &self,
        data: &DonationData,
        options: &RequestOptions,
    ) -> Result<GatewayRequest, GatewayError>;

    async fn send(
        &self,
        request: &GatewayRequest,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError>;

    fn map_response(&self, response: &RawResponse) -> Result<MappedResponse, GatewayError>;

    /// Authenticate and read an asynchronous notification.
    fn verify_notification(
        &self,
        notification: &GatewayNotification,
    ) -> Result<MappedResponse, GatewayError>;

    /// Ask the gateway what became of an order. `None` when it cannot tell.
    async fn query_status(
        &self,
        _order_id: &OrderId,
        _timeout: Duration,
    ) -> Result<Option<MappedResponse>, GatewayError> {
        Ok(None)
    }

    /// Void an authorisation.
    async fn cancel(&self, _order_id: &OrderId, _timeout: Duration) -> Result<(), GatewayError> {
        Ok(())
    }
}
