use std::time::Duration;

use async_trait::async_trait;
use hyper::{HeaderMap, StatusCode};

use crate::config::InvokerConfig;
use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::HttpClientError;

/// Backend HTTP client used by the router filter. A trait seam so tests can
/// inject a stub backend.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send the inbound request to `modify_host`, honoring `timeout_ms`
    async fn send(
        &self,
        request: &GatewayRequest,
        modify_host: &str,
        timeout_ms: u64,
    ) -> Result<GatewayResponse, HttpClientError>;
}

/// reqwest-backed client with a shared connection pool
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(config: &InvokerConfig) -> Result<Self, HttpClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(|e| HttpClientError::Connect(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(
        &self,
        request: &GatewayRequest,
        modify_host: &str,
        timeout_ms: u64,
    ) -> Result<GatewayResponse, HttpClientError> {
        let url = request.backend_url(modify_host);

        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in request.headers.iter() {
            // Hop-by-hop headers stay behind; Host is rewritten below.
            if name == hyper::header::HOST
                || name == hyper::header::CONNECTION
                || name == hyper::header::CONTENT_LENGTH
            {
                continue;
            }
            headers.insert(name.clone(), value.clone());
        }

        let response = self
            .client
            .request(request.method.clone(), &url)
            .headers(headers)
            .header(hyper::header::HOST, modify_host)
            .body(request.body.clone())
            .timeout(Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HttpClientError::Timeout(timeout_ms)
                } else if e.is_connect() {
                    HttpClientError::Connect(e.to_string())
                } else {
                    HttpClientError::Read(e.to_string())
                }
            })?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| HttpClientError::Read(e.to_string()))?;

        let mut response_headers = HeaderMap::new();
        for (name, value) in response.headers().iter() {
            response_headers.insert(name.clone(), value.clone());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| HttpClientError::Read(e.to_string()))?;

        Ok(GatewayResponse::new(status, response_headers, body))
    }
}
