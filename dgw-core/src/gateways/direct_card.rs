//! Server-to-server card authorisation over JSON.
//!
//! `POST {endpoint}/payments` authorises, `GET {endpoint}/payments/{id}`
//! reports status and `POST {endpoint}/payments/{id}/cancel` voids.
//! Card verification results come back with the authorisation.

use super::{http_client, outcome_from_status, verify_signed};
use crate::donation::{DonationData, FieldMap, fields};
use crate::fraud::{ResponseCodeMaps, VerificationResult};
use crate::gateway::{
    GatewayAdapter, GatewayError, GatewayFlow, GatewayOutcome, GatewayRequest, HttpMethod,
    MappedResponse, RawResponse, RequestOptions, TransportError, send_json,
};
use crate::queue::QueueName;
use async_trait::async_trait;
use dgw_sdk::objects::{GatewayNotification, OrderId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use url::Url;

const REQUIRED_FIELDS: [&str; 10] = [
    fields::EMAIL,
    fields::FIRST_NAME,
    fields::LAST_NAME,
    fields::STREET,
    fields::CITY,
    fields::POSTAL_CODE,
    fields::COUNTRY,
    fields::CARD_NUM,
    fields::CVV,
    fields::EXPIRATION,
];

#[derive(Debug, Clone)]
pub struct DirectCardConfig {
    pub name: String,
    /// API base, ending in `/`.
    pub endpoint: Url,
    pub api_key: String,
    /// HMAC key for status notifications.
    pub notification_secret: Box<[u8]>,
    pub currencies: BTreeSet<String>,
    pub response_codes: ResponseCodeMaps,
}

pub struct DirectCardGateway {
    config: DirectCardConfig,
    http_client: reqwest::Client,
}

impl DirectCardGateway {
    pub fn new(config: DirectCardConfig) -> Self {
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
        vec![(
            "Authorization".to_owned(),
            format!("Bearer {}", self.config.api_key),
        )]
    }

    fn read_payment(body: &str) -> Result<MappedResponse, GatewayError> {
        let payment: PaymentResponse = serde_json::from_str(body)
            .map_err(|e| GatewayError::Malformed(format!("invalid JSON: {e}")))?;
        payment.into_mapped()
    }
}

#[derive(Debug, Serialize)]
struct PaymentRequest<'a> {
    order_id: &'a str,
    amount: &'a str,
    currency: &'a str,
    email: &'a str,
    card: Card<'a>,
    billing: Billing<'a>,
    three_d_secure: bool,
    return_url: &'a str,
}

#[derive(Debug, Serialize)]
struct Card<'a> {
    number: &'a str,
    cvv: &'a str,
    expiry: &'a str,
    holder: String,
}

#[derive(Debug, Serialize)]
struct Billing<'a> {
    street: &'a str,
    city: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a str>,
    postal_code: &'a str,
    country: &'a str,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    status: String,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    redirect_url: Option<String>,
    #[serde(default)]
    cvv_result: Option<String>,
    #[serde(default)]
    avs_result: Option<String>,
}

impl PaymentResponse {
    fn into_mapped(self) -> Result<MappedResponse, GatewayError> {
        let outcome = if self.status == "challenge" {
            let url = self.redirect_url.ok_or_else(|| {
                GatewayError::Malformed("challenge without redirect_url".to_owned())
            })?;
            GatewayOutcome::Redirect { url }
        } else {
            outcome_from_status(&self.status, self.code.as_deref(), self.message.as_deref())
                .ok_or_else(|| GatewayError::Malformed(format!("unknown status {}", self.status)))?
        };
        Ok(MappedResponse {
            outcome,
            gateway_txn_id: self.transaction_id,
            verification: VerificationResult {
                cvv: self.cvv_result,
                avs_address: self.avs_result,
                avs_zip: None,
            },
        })
    }
}

fn field<'a>(data: &'a DonationData, name: &str) -> Result<&'a str, GatewayError> {
    data.get(name)
        .ok_or_else(|| GatewayError::Request(format!("missing {name}")))
}

#[async_trait]
impl GatewayAdapter for DirectCardGateway {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn flow(&self) -> GatewayFlow {
        GatewayFlow::Direct
    }

    fn supports_currency(&self, currency: &str) -> bool {
        self.config.currencies.contains(currency)
    }

    fn required_fields(&self) -> &[&'static str] {
        &REQUIRED_FIELDS
    }

    fn defaults(&self) -> FieldMap {
        FieldMap::from([(fields::PAYMENT_METHOD.to_owned(), "cc".to_owned())])
    }

    fn limbo_queue(&self) -> QueueName {
        QueueName::GatewayLimbo(self.config.name.clone())
    }

    fn response_codes(&self) -> Option<&ResponseCodeMaps> {
        Some(&self.config.response_codes)
    }

    fn build_request(
        &self,
        data: &DonationData,
        options: &RequestOptions,
    ) -> Result<GatewayRequest, GatewayError> {
        let holder = format!(
            "{} {}",
            field(data, fields::FIRST_NAME)?,
            field(data, fields::LAST_NAME)?
        );
        let body = PaymentRequest {
            order_id: options.order_id.as_str(),
            amount: field(data, fields::AMOUNT)?,
            currency: field(data, fields::CURRENCY_CODE)?,
            email: field(data, fields::EMAIL)?,
            card: Card {
                number: field(data, fields::CARD_NUM)?,
                cvv: field(data, fields::CVV)?,
                expiry: field(data, fields::EXPIRATION)?,
                holder,
            },
            billing: Billing {
                street: field(data, fields::STREET)?,
                city: field(data, fields::CITY)?,
                state: data.get(fields::STATE_PROVINCE),
                postal_code: field(data, fields::POSTAL_CODE)?,
                country: field(data, fields::COUNTRY)?,
            },
            three_d_secure: options.three_d_secure,
            return_url: options.return_url.as_str(),
        };
        let payload =
            serde_json::to_value(&body).map_err(|e| GatewayError::Request(e.to_string()))?;
        Ok(GatewayRequest {
            method: HttpMethod::Post,
            endpoint: self.url("payments")?,
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
        Self::read_payment(&response.body)
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
            .with_txn_id(notification.param("transaction_id").map(str::to_owned)))
    }

    async fn query_status(
        &self,
        order_id: &OrderId,
        timeout: Duration,
    ) -> Result<Option<MappedResponse>, GatewayError> {
        let request = GatewayRequest {
            method: HttpMethod::Get,
            endpoint: self.url(&format!("payments/{order_id}"))?,
            headers: self.auth_headers(),
            payload: None,
        };
        let response = send_json(&self.http_client, &request, timeout).await?;
        if response.status == 404 {
            return Ok(None);
        }
        Self::read_payment(&response.body).map(Some)
    }

    async fn cancel(&self, order_id: &OrderId, timeout: Duration) -> Result<(), GatewayError> {
        let request = GatewayRequest {
            method: HttpMethod::Post,
            endpoint: self.url(&format!("payments/{order_id}/cancel"))?,
            headers: self.auth_headers(),
            payload: None,
        };
        let response = send_json(&self.http_client, &request, timeout).await?;
        if !(200..300).contains(&response.status) {
            return Err(GatewayError::Malformed(format!(
                "cancel answered HTTP {}",
                response.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> DirectCardGateway {
        DirectCardGateway::new(DirectCardConfig {
            name: "card".to_owned(),
            endpoint: Url::parse("https://api.gateway.test/v1/").unwrap(),
            api_key: "key".to_owned(),
            notification_secret: b"secret".to_vec().into_boxed_slice(),
            currencies: ["USD", "EUR"].into_iter().map(str::to_owned).collect(),
            response_codes: ResponseCodeMaps::global_collect(),
        })
    }

    fn donor() -> DonationData {
        let request: FieldMap = [
            ("amount", "25"),
            ("currency_code", "usd"),
            ("email", "ada@example.org"),
            ("first_name", "Ada"),
            ("last_name", "Lovelace"),
            ("street", "1 Main St"),
            ("city", "Springfield"),
            ("postal_code", "12345"),
            ("country", "us"),
            ("card_num", "4111 1111 1111 1111"),
            ("cvv", "123"),
            ("expiration", "1230"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
        DonationData::stage(&request, &FieldMap::new(), &FieldMap::new())
    }

    #[test]
    fn test_build_request() {
        let gw = gateway();
        let options = RequestOptions {
            order_id: "o-1".parse().unwrap(),
            three_d_secure: true,
            return_url: Url::parse("https://payments.example.org/result").unwrap(),
        };
        let request = gw.build_request(&donor(), &options).unwrap();
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(
            request.endpoint.as_str(),
            "https://api.gateway.test/v1/payments"
        );
        let payload = request.payload.unwrap();
        assert_eq!(payload["amount"], "25.00");
        assert_eq!(payload["currency"], "USD");
        assert_eq!(payload["card"]["number"], "4111111111111111");
        assert_eq!(payload["card"]["holder"], "Ada Lovelace");
        assert_eq!(payload["three_d_secure"], true);
        assert!(payload["billing"].get("state").is_none());
    }

    #[test]
    fn test_build_request_needs_card() {
        let gw = gateway();
        let data = DonationData::stage(&FieldMap::new(), &FieldMap::new(), &FieldMap::new());
        let options = RequestOptions {
            order_id: "o-1".parse().unwrap(),
            three_d_secure: false,
            return_url: Url::parse("https://payments.example.org/result").unwrap(),
        };
        assert!(matches!(
            gw.build_request(&data, &options),
            Err(GatewayError::Request(_))
        ));
    }

    #[test]
    fn test_map_approved_with_verification() {
        let gw = gateway();
        let mapped = gw
            .map_response(&RawResponse {
                status: 200,
                body: r#"{"status":"approved","transaction_id":"T-9","cvv_result":"N","avs_result":"Y"}"#
                    .to_owned(),
            })
            .unwrap();
        assert_eq!(mapped.outcome, GatewayOutcome::Approved);
        assert_eq!(mapped.gateway_txn_id.as_deref(), Some("T-9"));
        assert_eq!(mapped.verification.cvv.as_deref(), Some("N"));
    }

    #[test]
    fn test_map_challenge_and_malformed() {
        let gw = gateway();
        let challenge = gw
            .map_response(&RawResponse {
                status: 200,
                body: r#"{"status":"challenge","redirect_url":"https://acs.test/x"}"#.to_owned(),
            })
            .unwrap();
        assert_eq!(
            challenge.outcome,
            GatewayOutcome::Redirect {
                url: "https://acs.test/x".to_owned()
            }
        );

        for body in ["not json", r#"{"status":"maybe"}"#, r#"{"status":"challenge"}"#] {
            let result = gw.map_response(&RawResponse {
                status: 200,
                body: body.to_owned(),
            });
            assert!(matches!(result, Err(GatewayError::Malformed(_))), "{body}");
        }
    }

    #[test]
    fn test_declined_carries_code() {
        let gw = gateway();
        let mapped = gw
            .map_response(&RawResponse {
                status: 402,
                body: r#"{"status":"declined","code":"430285","message":"Not authorised"}"#
                    .to_owned(),
            })
            .unwrap();
        assert_eq!(
            mapped.outcome,
            GatewayOutcome::Declined {
                code: "430285".to_owned(),
                message: "Not authorised".to_owned()
            }
        );
    }

    fn signed_notification(delivered_for: &str, params: &[(&str, &str)]) -> GatewayNotification {
        let params: std::collections::BTreeMap<String, String> = params
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        let signature = dgw_sdk::signature::sign_params(&params, b"secret");
        GatewayNotification {
            gateway: "card".to_owned(),
            order_id: delivered_for.parse().unwrap(),
            params,
            signature: Some(signature),
        }
    }

    #[test]
    fn test_notification_settles_signed_order() {
        let notification = signed_notification(
            "paid-order",
            &[("order_id", "paid-order"), ("status", "approved"), ("transaction_id", "T-1")],
        );
        let mapped = gateway().verify_notification(&notification).unwrap();
        assert_eq!(mapped.outcome, GatewayOutcome::Approved);
        assert_eq!(mapped.gateway_txn_id.as_deref(), Some("T-1"));
    }

    #[test]
    fn test_notification_cannot_be_retargeted() {
        let notification = signed_notification(
            "victim-order",
            &[("order_id", "paid-order"), ("status", "approved")],
        );
        assert!(matches!(
            gateway().verify_notification(&notification),
            Err(GatewayError::Malformed(_))
        ));

        let unbound = signed_notification("victim-order", &[("status", "approved")]);
        assert!(matches!(
            gateway().verify_notification(&unbound),
            Err(GatewayError::Malformed(_))
        ));
    }

    #[test]
    fn test_limbo_queue_is_gateway_specific() {
        assert_eq!(gateway().limbo_queue().key(), "card-cc-limbo");
    }
}
