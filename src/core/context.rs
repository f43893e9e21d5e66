use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::GatewayError;
use crate::models::{Protocol, Rule};

/// Lifecycle of a request context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Filters are still executing
    Running,
    /// A response has been set
    Written,
    /// The chain must not run further filters
    Terminated,
}

/// Per-request state owned by the worker driving the filter chain.
///
/// Exactly one of `response` / `throwable` is observed by the result stage.
/// `Terminated` is reached from `Written` or from a terminating filter;
/// `terminated()` is idempotent.
pub struct GatewayContext {
    pub protocol: Protocol,
    pub keep_alive: bool,
    /// Canary marker set by the gray filter, consumed by the load balancer
    pub gray: bool,
    request: GatewayRequest,
    rule: Arc<Rule>,
    response: Option<GatewayResponse>,
    throwable: Option<GatewayError>,
    attributes: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
    state: ContextState,
}

impl GatewayContext {
    pub fn new(protocol: Protocol, keep_alive: bool, request: GatewayRequest, rule: Arc<Rule>) -> Self {
        Self {
            protocol,
            keep_alive,
            gray: false,
            request,
            rule,
            response: None,
            throwable: None,
            attributes: HashMap::new(),
            state: ContextState::Running,
        }
    }

    pub fn request(&self) -> &GatewayRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut GatewayRequest {
        &mut self.request
    }

    pub fn rule(&self) -> &Arc<Rule> {
        &self.rule
    }

    pub fn unique_id(&self) -> &str {
        &self.request.unique_id
    }

    pub fn response(&self) -> Option<&GatewayResponse> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, response: GatewayResponse) {
        self.response = Some(response);
    }

    pub fn take_response(&mut self) -> Option<GatewayResponse> {
        self.response.take()
    }

    pub fn throwable(&self) -> Option<&GatewayError> {
        self.throwable.as_ref()
    }

    pub fn set_throwable(&mut self, error: GatewayError) {
        self.throwable = Some(error);
    }

    pub fn take_throwable(&mut self) -> Option<GatewayError> {
        self.throwable.take()
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Mark the response as written
    pub fn written(&mut self) {
        if self.state == ContextState::Running {
            self.state = ContextState::Written;
        }
    }

    /// Stop the chain. Idempotent.
    pub fn terminated(&mut self) {
        self.state = ContextState::Terminated;
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ContextState::Terminated
    }

    pub fn set_attribute<T: Any + Send + Sync>(&mut self, key: &'static str, value: T) {
        self.attributes.insert(key, Box::new(value));
    }

    pub fn attribute<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.attributes.get(key).and_then(|v| v.downcast_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use hyper::{HeaderMap, Method, StatusCode};

    fn context() -> GatewayContext {
        let request = GatewayRequest::new(
            "user:1.0.0".to_string(),
            Method::GET,
            "/user/ping".parse().unwrap(),
            HeaderMap::new(),
            Bytes::new(),
            "127.0.0.1".parse().unwrap(),
        );
        GatewayContext::new(
            Protocol::Http,
            true,
            request,
            Arc::new(Rule::new("r1", "user", "/user", 0)),
        )
    }

    #[test]
    fn lifecycle_running_written_terminated() {
        let mut ctx = context();
        assert_eq!(ctx.state(), ContextState::Running);

        ctx.set_response(GatewayResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::new(),
        ));
        ctx.written();
        assert_eq!(ctx.state(), ContextState::Written);

        ctx.terminated();
        assert!(ctx.is_terminated());
        // idempotent
        ctx.terminated();
        assert!(ctx.is_terminated());
    }

    #[test]
    fn written_does_not_resurrect_terminated() {
        let mut ctx = context();
        ctx.terminated();
        ctx.written();
        assert!(ctx.is_terminated());
    }

    #[test]
    fn typed_attributes() {
        let mut ctx = context();
        ctx.set_attribute("start_time", 42u64);
        assert_eq!(ctx.attribute::<u64>("start_time"), Some(&42));
        assert!(ctx.attribute::<String>("start_time").is_none());
        assert!(ctx.attribute::<u64>("missing").is_none());
    }
}
