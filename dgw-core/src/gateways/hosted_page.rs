//! Hosted payment page gateway.
//!
//! We create a checkout session, send the donor to the returned URL (or
//! frame it) and wait. The gateway settles the order through a signed
//! notification, the donor return, or a later status query.

use super::{http_client, outcome_from_status, verify_signed};
use crate::donation::{DonationData, fields};
use crate::gateway::{
    GatewayAdapter, GatewayError, GatewayFlow, GatewayOutcome, GatewayRequest, HttpMethod,
    MappedResponse, RawResponse, RequestOptions, TransportError, send_json,
};
use async_trait::async_trait;
use dgw_sdk::objects::{GatewayNotification, OrderId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use url::Url;

const REQUIRED_FIELDS: [&str; 2] = [fields::EMAIL, fields::COUNTRY];

#[derive(Debug, Clone)]
pub struct HostedPageConfig {
    pub name: String,
    /// API base, ending in `/`.
    pub endpoint: Url,
    pub api_key: String,
    /// HMAC key shared with the gateway for notifications and returns.
    pub notification_secret: Box<[u8]>,
    pub currencies: BTreeSet<String>,
    /// Frame the hosted page instead of redirecting.
    pub iframe: bool,
}

pub struct HostedPageGateway {
    config: HostedPageConfig,
    http_client: reqwest::Client,
}

impl HostedPageGateway {
    pub fn new(config: HostedPageConfig) -> Self {
        Self {
            config,
            http_client: http_client(Duration::from_secs(30)),
        }
    }

    fn url(&self, path: &str) -> Result<Url, GatewayError> {
        self.config
            .endpoint
            .join(path)
            .map_err(|e| GatewayError::Request(format!("bad endpoint path {path}: {e}")))
    }

    fn auth_headers(&self) -> Vec<(String, String)> {
        vec![("X-Api-Key".to_owned(), self.config.api_key.clone())]
    }
}

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    order_id: &'a str,
    amount: &'a str,
    currency: &'a str,
    country: &'a str,
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_submethod: Option<&'a str>,
    three_d_secure: bool,
    return_url: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    status: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    session_url: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn field<'a>(data: &'a DonationData, name: &str) -> Result<&'a str, GatewayError> {
    data.get(name)
        .ok_or_else(|| GatewayError::Request(format!("missing {name}")))
}

#[async_trait]
impl GatewayAdapter for HostedPageGateway {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn flow(&self) -> GatewayFlow {
        if self.config.iframe {
            GatewayFlow::Iframe
        } else {
            GatewayFlow::Redirect
        }
    }

    fn supports_currency(&self, currency: &str) -> bool {
        self.config.currencies.contains(currency)
    }

    fn required_fields(&self) -> &[&'static str] {
        &REQUIRED_FIELDS
    }

    fn build_request(
        &self,
        data: &DonationData,
        options: &RequestOptions,
    ) -> Result<GatewayRequest, GatewayError> {
        let mut return_url = options.return_url.clone();
        return_url
            .query_pairs_mut()
            .append_pair("order_id", options.order_id.as_str());

        let body = SessionRequest {
            order_id: options.order_id.as_str(),
            amount: field(data, fields::AMOUNT)?,
            currency: field(data, fields::CURRENCY_CODE)?,
            country: field(data, fields::COUNTRY)?,
            email: field(data, fields::EMAIL)?,
            language: data.get(fields::LANGUAGE),
            payment_submethod: data.get(fields::PAYMENT_SUBMETHOD),
            three_d_secure: options.three_d_secure,
            return_url: return_url.into(),
        };
        let payload =
            serde_json::to_value(&body).map_err(|e| GatewayError::Request(e.to_string()))?;
        Ok(GatewayRequest {
            method: HttpMethod::Post,
            endpoint: self.url("sessions")?,
            headers: self.auth_headers(),
            payload: Some(payload),
        })
    }

    async fn send(
        &self,
        request: &GatewayRequest,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        send_json(&self.http_client, request, timeout).await
    }

    fn map_response(&self, response: &RawResponse) -> Result<MappedResponse, GatewayError> {
        let session: SessionResponse = serde_json::from_str(&response.body)
            .map_err(|e| GatewayError::Malformed(format!("invalid JSON: {e}")))?;

        let outcome = match session.status.as_str() {
            "created" | "open" => {
                let url = session.session_url.ok_or_else(|| {
                    GatewayError::Malformed("session without session_url".to_owned())
                })?;
                if self.config.iframe {
                    GatewayOutcome::Iframe { url }
                } else {
                    GatewayOutcome::Redirect { url }
                }
            }
            other => outcome_from_status(other, session.code.as_deref(), session.message.as_deref())
                .ok_or_else(|| GatewayError::Malformed(format!("unknown status {other}")))?,
        };
        Ok(MappedResponse::new(outcome).with_txn_id(session.session_id))
    }

    fn verify_notification(
        &self,
        notification: &GatewayNotification,
    ) -> Result<MappedResponse, GatewayError> {
        verify_signed(notification, &self.config.notification_secret)?;
        let status = notification
            .param("status")
            .ok_or_else(|| GatewayError::Malformed("notification without status".to_owned()))?;
        let outcome =
            outcome_from_status(status, notification.param("code"), notification.param("message"))
                .ok_or_else(|| GatewayError::Malformed(format!("unknown status {status}")))?;
        Ok(MappedResponse::new(outcome)
            .with_txn_id(notification.param("session_id").map(str::to_owned)))
    }

    async fn query_status(
        &self,
        order_id: &OrderId,
        timeout: Duration,
    ) -> Result<Option<MappedResponse>, GatewayError> {
        let request = GatewayRequest {
            method: HttpMethod::Get,
            endpoint: self.url(&format!("sessions/{order_id}"))?,
            headers: self.auth_headers(),
            payload: None,
        };
        let response = send_json(&self.http_client, &request, timeout).await?;
        if response.status == 404 {
            return Ok(None);
        }
        let mapped = self.map_response(&response)?;
        // A session still open tells us nothing.
        Ok(mapped.outcome.final_status().map(|_| mapped))
    }
}
