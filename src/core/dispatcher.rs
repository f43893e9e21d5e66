use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use hyper::header::HeaderValue;
use hyper::{HeaderMap, Method, Uri};

use crate::core::context::GatewayContext;
use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::GatewayError;
use crate::filter::GatewayFilterChainFactory;
use crate::models::Rule;
use crate::registry::Registry;

/// Entry point of the request-processing core: turns an inbound request
/// into a context, drives the rule's filter chain and produces the response
/// written back to the client.
pub struct Dispatcher {
    registry: Arc<Registry>,
    chain_factory: Arc<GatewayFilterChainFactory>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, chain_factory: Arc<GatewayFilterChainFactory>) -> Self {
        Self {
            registry,
            chain_factory,
        }
    }

    /// Process one inbound request. Errors never escape: they are mapped to
    /// the JSON error shape here.
    pub async fn dispatch(
        &self,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        peer_addr: SocketAddr,
    ) -> GatewayResponse {
        match self.try_dispatch(method, uri, headers, body, peer_addr).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!("Request failed: {} ({})", error, error.code());
                GatewayResponse::from_error(&error)
            }
        }
    }

    async fn try_dispatch(
        &self,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        peer_addr: SocketAddr,
    ) -> Result<GatewayResponse, GatewayError> {
        let unique_id = headers
            .get("uniqueid")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::InvalidRequest("missing uniqueId header".into()))?;

        let client_ip = extract_client_ip(&headers, peer_addr);
        let keep_alive = is_keep_alive(&headers);

        let definition = self
            .registry
            .get_definition(&unique_id)
            .ok_or_else(|| GatewayError::ServiceDefinitionNotFound(unique_id.clone()))?;

        let request = GatewayRequest::new(unique_id, method, uri, headers, body, client_ip);
        let rule = self.resolve_rule(&definition.service_id, &request.path)?;

        let mut ctx = GatewayContext::new(definition.protocol, keep_alive, request, rule.clone());
        tracing::debug!(
            "Dispatching {:?} request {} via rule {}",
            ctx.protocol,
            ctx.request().request_id,
            rule.id
        );

        let chain = self.chain_factory.get_chain(&rule);
        chain.execute(&mut ctx).await;

        let keep_alive = ctx.keep_alive;
        let mut response = match (ctx.take_response(), ctx.take_throwable()) {
            (Some(response), _) => response,
            (None, Some(error)) => {
                tracing::warn!("Chain ended with error: {} ({})", error, error.code());
                GatewayResponse::from_error(&error)
            }
            (None, None) => {
                tracing::error!("Chain produced neither response nor error");
                GatewayResponse::from_error(&GatewayError::InternalError(
                    "no response produced".into(),
                ))
            }
        };

        if !keep_alive {
            response
                .headers
                .insert(hyper::header::CONNECTION, HeaderValue::from_static("close"));
        }
        Ok(response)
    }

    /// Exact-path lookup first, then the first rule (in rule order) whose
    /// prefix is a prefix of the path.
    pub(crate) fn resolve_rule(
        &self,
        service_id: &str,
        path: &str,
    ) -> Result<Arc<Rule>, GatewayError> {
        if let Some(rule) = self.registry.get_rule_by_path(service_id, path) {
            return Ok(rule);
        }

        self.registry
            .get_rules_by_service(service_id)
            .into_iter()
            .find(|rule| !rule.prefix.is_empty() && path.starts_with(&rule.prefix))
            .ok_or_else(|| GatewayError::PathNoMatched(path.to_string()))
    }
}

/// First `X-Forwarded-For` token when present and parseable, else the
/// transport peer address.
fn extract_client_ip(headers: &HeaderMap, peer_addr: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_else(|| peer_addr.ip())
}

/// HTTP/1.1 defaults to keep-alive unless the client says close
fn is_keep_alive(headers: &HeaderMap) -> bool {
    headers
        .get(hyper::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| !v.eq_ignore_ascii_case("close"))
        .unwrap_or(true)
}
