use super::{GatewayRequest, HttpMethod, RawResponse, TransportError};
use std::time::Duration;

/// Send a JSON gateway request.
///
/// 5xx answers are transport failures; every other status is handed back
/// for the adapter to interpret.
pub async fn send_json(
    client: &reqwest::Client,
    request: &GatewayRequest,
    timeout: Duration,
) -> Result<RawResponse, TransportError> {
    let mut builder = match request.method {
        HttpMethod::Get => client.get(request.endpoint.clone()),
        HttpMethod::Post => client.post(request.endpoint.clone()),
    }
    .timeout(timeout);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(payload) = &request.payload {
        builder = builder.json(payload);
    }

    let response = builder.send().await?;
    let status = response.status();
    if status.is_server_error() {
        return Err(TransportError::Unavailable(status.as_u16()));
    }
    let body = response.text().await?;
    Ok(RawResponse {
        status: status.as_u16(),
        body,
    })
}
