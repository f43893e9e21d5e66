use std::sync::Arc;

use async_trait::async_trait;

use crate::breaker::{BreakerManager, CircuitBreaker, CircuitBreakerConfig};
use crate::core::context::GatewayContext;
use crate::core::response::GatewayResponse;
use crate::error::{ConfigError, GatewayError};
use crate::filter::{
    Filter, ATTR_BREAKER, ATTR_BREAKER_START, CIRCUIT_BREAKER_FILTER_ID,
    CIRCUIT_BREAKER_FILTER_ORDER, CIRCUIT_BREAKER_RESULT_FILTER_ID,
    CIRCUIT_BREAKER_RESULT_FILTER_ORDER,
};
use crate::metrics::MetricsSink;
use crate::utils::now_ms;

fn parse_breaker_config(raw: &str) -> Result<CircuitBreakerConfig, ConfigError> {
    if raw.is_empty() {
        return Ok(CircuitBreakerConfig::default());
    }
    serde_json::from_str(raw)
        .map_err(|e| ConfigError::ValidationError(format!("circuit_breaker_filter config: {}", e)))
}

/// Admission side of the circuit breaker. On reject it writes the configured
/// fallback (or the 503) and terminates; on admit it stashes the breaker and
/// the start time for the result filter.
pub struct CircuitBreakerFilter {
    manager: Arc<BreakerManager>,
    metrics: Arc<dyn MetricsSink>,
}

impl CircuitBreakerFilter {
    pub fn new(manager: Arc<BreakerManager>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { manager, metrics }
    }
}

#[async_trait]
impl Filter for CircuitBreakerFilter {
    fn id(&self) -> &'static str {
        CIRCUIT_BREAKER_FILTER_ID
    }

    fn name(&self) -> &'static str {
        "circuit breaker filter"
    }

    fn order(&self) -> i32 {
        CIRCUIT_BREAKER_FILTER_ORDER
    }

    async fn do_filter(&self, ctx: &mut GatewayContext) -> Result<(), GatewayError> {
        let Some(filter_config) = ctx.rule().filter_config(CIRCUIT_BREAKER_FILTER_ID) else {
            return Ok(());
        };

        let config = parse_breaker_config(&filter_config.config)?;
        let unique_id = ctx.unique_id().to_string();
        let breaker = self.manager.get_or_create(&unique_id, config.clone())?;

        if !breaker.allow_request() {
            tracing::warn!("Circuit breaker is OPEN for service: {}", unique_id);
            self.metrics.incr_counter("gateway.circuit_breaker", "rejected");

            let response = match &config.fallback_response {
                Some(body) => GatewayResponse::fallback(body),
                None => GatewayResponse::from_error(&GatewayError::ServiceUnavailable(format!(
                    "circuit open for {}",
                    unique_id
                ))),
            };
            ctx.set_response(response);
            ctx.written();
            ctx.terminated();
            return Ok(());
        }

        ctx.set_attribute(ATTR_BREAKER_START, now_ms());
        ctx.set_attribute(ATTR_BREAKER, breaker);
        self.metrics.incr_counter("gateway.circuit_breaker", "allowed");
        Ok(())
    }
}

/// Result side of the circuit breaker: reads the stash, classifies the
/// outcome and records it. Runs in the chain's result stage so it sees the
/// request no matter how it ended.
pub struct CircuitBreakerResultFilter {
    metrics: Arc<dyn MetricsSink>,
}

impl CircuitBreakerResultFilter {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self { metrics }
    }

    /// A backend response below 500 with no error is a success; 5xx,
    /// transport errors and a missing response are failures. 4xx is not a
    /// failure.
    fn is_successful(ctx: &GatewayContext) -> bool {
        if ctx.throwable().is_some() {
            return false;
        }
        match ctx.response() {
            Some(response) => response.status.as_u16() < 500,
            None => false,
        }
    }
}

#[async_trait]
impl Filter for CircuitBreakerResultFilter {
    fn id(&self) -> &'static str {
        CIRCUIT_BREAKER_RESULT_FILTER_ID
    }

    fn name(&self) -> &'static str {
        "circuit breaker result filter"
    }

    fn order(&self) -> i32 {
        CIRCUIT_BREAKER_RESULT_FILTER_ORDER
    }

    async fn do_filter(&self, ctx: &mut GatewayContext) -> Result<(), GatewayError> {
        let breaker = ctx.attribute::<Arc<CircuitBreaker>>(ATTR_BREAKER).cloned();
        let start_time = ctx.attribute::<u64>(ATTR_BREAKER_START).copied();

        let (Some(breaker), Some(start_time)) = (breaker, start_time) else {
            return Ok(());
        };

        let response_time = now_ms().saturating_sub(start_time);
        let success = Self::is_successful(ctx);
        breaker.record_result(success, response_time);

        if success {
            tracing::debug!(
                "Circuit breaker recorded SUCCESS for {}, rt: {}ms, state: {}",
                ctx.unique_id(),
                response_time,
                breaker.state()
            );
        } else {
            let status = ctx.response().map(|r| r.status.as_u16());
            tracing::warn!(
                "Circuit breaker recorded FAILURE for {}, status: {:?}, error: {:?}, rt: {}ms, state: {}",
                ctx.unique_id(),
                status,
                ctx.throwable().map(|e| e.code()),
                response_time,
                breaker.state()
            );
        }

        self.metrics.incr_counter(
            "gateway.circuit_breaker",
            if success { "success" } else { "failure" },
        );
        self.metrics
            .observe_latency("gateway.backend", ctx.unique_id(), response_time);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use hyper::{HeaderMap, Method, StatusCode};

    use crate::breaker::BreakerState;
    use crate::core::request::GatewayRequest;
    use crate::error::HttpClientError;
    use crate::metrics::{NoopMetricsSink, TracingMetricsSink};
    use crate::models::{Protocol, Rule};

    fn breaker_rule(config: &str) -> Rule {
        let mut rule = Rule::new("r1", "user", "/user", 0);
        rule.add_filter_config(CIRCUIT_BREAKER_FILTER_ID, config);
        rule
    }

    fn context_with_rule(rule: Rule) -> GatewayContext {
        let request = GatewayRequest::new(
            "user:1.0.0".to_string(),
            Method::GET,
            "/user/ping".parse().unwrap(),
            HeaderMap::new(),
            Bytes::new(),
            "127.0.0.1".parse().unwrap(),
        );
        GatewayContext::new(Protocol::Http, true, request, Arc::new(rule))
    }

    fn filters() -> (Arc<BreakerManager>, CircuitBreakerFilter, CircuitBreakerResultFilter) {
        let manager = Arc::new(BreakerManager::new());
        let metrics: Arc<dyn MetricsSink> = Arc::new(NoopMetricsSink);
        (
            manager.clone(),
            CircuitBreakerFilter::new(manager, metrics.clone()),
            CircuitBreakerResultFilter::new(metrics),
        )
    }

    #[tokio::test]
    async fn admit_stashes_breaker_and_start_time() {
        let (_, admission, _) = filters();
        let mut ctx = context_with_rule(breaker_rule("{}"));
        admission.do_filter(&mut ctx).await.unwrap();

        assert!(!ctx.is_terminated());
        assert!(ctx.attribute::<Arc<CircuitBreaker>>(ATTR_BREAKER).is_some());
        assert!(ctx.attribute::<u64>(ATTR_BREAKER_START).is_some());
    }

    #[tokio::test]
    async fn unconfigured_rule_is_ignored() {
        let (_, admission, result) = filters();
        let mut ctx = context_with_rule(Rule::new("r1", "user", "/user", 0));
        admission.do_filter(&mut ctx).await.unwrap();
        assert!(ctx.attribute::<Arc<CircuitBreaker>>(ATTR_BREAKER).is_none());
        // Result filter without a stash is a no-op.
        result.do_filter(&mut ctx).await.unwrap();
    }

    #[tokio::test]
    async fn open_breaker_writes_503_and_terminates() {
        let (manager, admission, _) = filters();
        let mut ctx = context_with_rule(breaker_rule("{}"));
        admission.do_filter(&mut ctx).await.unwrap();
        manager.force_open("user:1.0.0");

        let mut ctx = context_with_rule(breaker_rule("{}"));
        admission.do_filter(&mut ctx).await.unwrap();
        assert!(ctx.is_terminated());
        let response = ctx.response().unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn open_breaker_with_fallback_writes_200() {
        let (manager, admission, _) = filters();
        let config = r#"{"fallbackResponse":"{\"degraded\":true}"}"#;
        let mut ctx = context_with_rule(breaker_rule(config));
        admission.do_filter(&mut ctx).await.unwrap();
        manager.force_open("user:1.0.0");

        let mut ctx = context_with_rule(breaker_rule(config));
        admission.do_filter(&mut ctx).await.unwrap();
        assert!(ctx.is_terminated());
        let response = ctx.response().unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Bytes::from(r#"{"degraded":true}"#));
    }

    #[tokio::test]
    async fn result_filter_classifies_and_records() {
        let (manager, admission, _) = filters();
        let metrics = Arc::new(TracingMetricsSink::new());
        let result = CircuitBreakerResultFilter::new(metrics.clone());

        // 2xx response counts as success.
        let mut ctx = context_with_rule(breaker_rule("{}"));
        admission.do_filter(&mut ctx).await.unwrap();
        ctx.set_response(GatewayResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::new(),
        ));
        result.do_filter(&mut ctx).await.unwrap();

        // 4xx is not a failure.
        let mut ctx = context_with_rule(breaker_rule("{}"));
        admission.do_filter(&mut ctx).await.unwrap();
        ctx.set_response(GatewayResponse::new(
            StatusCode::NOT_FOUND,
            HeaderMap::new(),
            Bytes::new(),
        ));
        result.do_filter(&mut ctx).await.unwrap();

        // 5xx and transport errors are failures.
        let mut ctx = context_with_rule(breaker_rule("{}"));
        admission.do_filter(&mut ctx).await.unwrap();
        ctx.set_response(GatewayResponse::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            HeaderMap::new(),
            Bytes::new(),
        ));
        result.do_filter(&mut ctx).await.unwrap();

        let mut ctx = context_with_rule(breaker_rule("{}"));
        admission.do_filter(&mut ctx).await.unwrap();
        ctx.set_throwable(GatewayError::HttpResponseError(HttpClientError::Timeout(500)));
        result.do_filter(&mut ctx).await.unwrap();

        assert_eq!(metrics.counter("gateway.circuit_breaker", "success"), 2);
        assert_eq!(metrics.counter("gateway.circuit_breaker", "failure"), 2);

        let breaker = manager.get("user:1.0.0").unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
        let stats = breaker.stats();
        assert_eq!(stats.total_requests, 4);
    }

    #[tokio::test]
    async fn invalid_config_is_an_error() {
        let (_, admission, _) = filters();
        let mut ctx = context_with_rule(breaker_rule(r#"{"bucketCount":1}"#));
        assert!(matches!(
            admission.do_filter(&mut ctx).await,
            Err(GatewayError::ConfigError(_))
        ));
    }
}
