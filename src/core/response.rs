use bytes::Bytes;
use hyper::{HeaderMap, StatusCode};

use crate::error::GatewayError;

/// Represents a response written back to the client
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// HTTP status code
    pub status: StatusCode,

    /// HTTP headers
    pub headers: HeaderMap,

    /// Response body
    pub body: Bytes,
}

impl GatewayResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Gateway-originated error response with the `{code, message}` body
    pub fn from_error(error: &GatewayError) -> Self {
        let body = serde_json::json!({
            "code": error.code(),
            "message": error.client_message(),
        });

        let mut headers = HeaderMap::new();
        headers.insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("application/json"),
        );

        Self::new(
            error.status_code(),
            headers,
            Bytes::from(body.to_string()),
        )
    }

    /// Configured circuit breaker fallback, relayed verbatim with 200
    pub fn fallback(body: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            "x-gateway-fallback",
            hyper::header::HeaderValue::from_static("GATEWAY_FALLBACK"),
        );
        Self::new(StatusCode::OK, headers, Bytes::from(body.to_string()))
    }
}
