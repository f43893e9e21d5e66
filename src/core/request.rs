use std::net::IpAddr;
use std::time::SystemTime;

use bytes::Bytes;
use hyper::{HeaderMap, Method, Uri};

use crate::utils::generate_id;

/// Represents a parsed inbound request to the gateway
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// Target service `service_id:version`, from the `uniqueId` header
    pub unique_id: String,

    /// HTTP method
    pub method: Method,

    /// Request URI
    pub uri: Uri,

    /// Path component of the URI
    pub path: String,

    /// Client IP (first `X-Forwarded-For` token, else transport peer)
    pub client_ip: IpAddr,

    /// Inbound Host header
    pub host: Option<String>,

    /// HTTP headers
    pub headers: HeaderMap,

    /// Request body
    pub body: Bytes,

    /// Content type of the body, if declared
    pub content_type: Option<String>,

    /// Body charset, defaults to utf-8
    pub charset: String,

    /// Authenticated user, when an upstream auth layer set one
    pub user_id: Option<String>,

    /// Backend `ip:port` chosen by the load balancer
    modify_host: Option<String>,

    /// Request timestamp
    pub timestamp: SystemTime,

    /// Request ID for tracing
    pub request_id: String,
}

impl GatewayRequest {
    pub fn new(
        unique_id: String,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        client_ip: IpAddr,
    ) -> Self {
        let path = uri.path().to_string();
        let host = headers
            .get(hyper::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_type = headers
            .get(hyper::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let charset = content_type
            .as_deref()
            .and_then(|ct| ct.split("charset=").nth(1))
            .map(|c| c.trim().to_string())
            .unwrap_or_else(|| "utf-8".to_string());

        Self {
            unique_id,
            method,
            uri,
            path,
            client_ip,
            host,
            headers,
            body,
            content_type,
            charset,
            user_id: None,
            modify_host: None,
            timestamp: SystemTime::now(),
            request_id: generate_id(),
        }
    }

    /// Get a header value as a string
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    /// Rewrite the backend host the router will call
    pub fn set_modify_host(&mut self, host: String) {
        self.modify_host = Some(host);
    }

    pub fn modify_host(&self) -> Option<&str> {
        self.modify_host.as_deref()
    }

    /// Full backend URL for the rewritten host, keeping path and query
    pub fn backend_url(&self, modify_host: &str) -> String {
        match self.uri.path_and_query() {
            Some(pq) => format!("http://{}{}", modify_host, pq),
            None => format!("http://{}{}", modify_host, self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> GatewayRequest {
        GatewayRequest::new(
            "user:1.0.0".to_string(),
            Method::GET,
            uri.parse().unwrap(),
            HeaderMap::new(),
            Bytes::new(),
            "127.0.0.1".parse().unwrap(),
        )
    }

    #[test]
    fn backend_url_keeps_query() {
        let req = request("/user/list?page=2");
        assert_eq!(
            req.backend_url("10.0.0.3:8080"),
            "http://10.0.0.3:8080/user/list?page=2"
        );
    }

    #[test]
    fn modify_host_roundtrip() {
        let mut req = request("/user/list");
        assert!(req.modify_host().is_none());
        req.set_modify_host("10.0.0.3:8080".to_string());
        assert_eq!(req.modify_host(), Some("10.0.0.3:8080"));
    }
}
