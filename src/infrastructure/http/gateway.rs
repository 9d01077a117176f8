use crate::application::ports::{GatewayRequest, GatewayResponse, RequestGateway};
use crate::shared::error::{Result, SyncError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::time::Duration;

/// HTTP implementation of the request gateway.
///
/// Connection-level failures surface as `SyncError::Offline` so the caller
/// queues the mutation; non-2xx responses surface as `SyncError::Rejected`
/// carrying the status and response body.
pub struct ReqwestGateway {
    client: reqwest::Client,
}

impl ReqwestGateway {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    // Only connection failures count as offline. Request build errors
    // (bad body, redirect loops) would replay forever, so they stay
    // `Internal` and surface immediately.
    fn classify(err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(err.to_string())
        } else if err.is_connect() {
            SyncError::Offline(err.to_string())
        } else {
            SyncError::Internal(err.to_string())
        }
    }
}

#[async_trait]
impl RequestGateway for ReqwestGateway {
    async fn send(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| SyncError::Validation(format!("Invalid HTTP method {}", request.method)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| SyncError::Validation(format!("Invalid header name {name}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| SyncError::Validation(format!("Invalid header value for {name}")))?;
            headers.insert(name, value);
        }

        let mut builder = self.client.request(method, &request.url).headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(Self::classify)?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(SyncError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(GatewayResponse {
            status: status.as_u16(),
            body: if body.is_empty() { None } else { Some(body) },
        })
    }
}
