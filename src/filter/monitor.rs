use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::core::context::GatewayContext;
use crate::error::GatewayError;
use crate::filter::{
    Filter, ATTR_REQUEST_START, MONITOR_END_FILTER_ID, MONITOR_END_FILTER_ORDER,
    MONITOR_FILTER_ID, MONITOR_FILTER_ORDER,
};
use crate::metrics::MetricsSink;

/// Opens the telemetry span for a request. Runs before everything else.
pub struct MonitorFilter {
    metrics: Arc<dyn MetricsSink>,
}

impl MonitorFilter {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl Filter for MonitorFilter {
    fn id(&self) -> &'static str {
        MONITOR_FILTER_ID
    }

    fn name(&self) -> &'static str {
        "monitor filter"
    }

    fn order(&self) -> i32 {
        MONITOR_FILTER_ORDER
    }

    async fn do_filter(&self, ctx: &mut GatewayContext) -> Result<(), GatewayError> {
        ctx.set_attribute(ATTR_REQUEST_START, Instant::now());
        self.metrics.incr_counter("gateway.request", "start");
        tracing::debug!(
            "Request {} started: {} {} for {}",
            ctx.request().request_id,
            ctx.request().method,
            ctx.request().path,
            ctx.unique_id()
        );
        Ok(())
    }
}

/// Closes the telemetry span. Lives at the tail of the result stage so it
/// observes the final outcome even for short-circuited requests.
pub struct MonitorEndFilter {
    metrics: Arc<dyn MetricsSink>,
    /// Requests slower than this are logged at warn
    slow_threshold_ms: u64,
}

impl MonitorEndFilter {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            metrics,
            slow_threshold_ms: 500,
        }
    }
}

#[async_trait]
impl Filter for MonitorEndFilter {
    fn id(&self) -> &'static str {
        MONITOR_END_FILTER_ID
    }

    fn name(&self) -> &'static str {
        "monitor end filter"
    }

    fn order(&self) -> i32 {
        MONITOR_END_FILTER_ORDER
    }

    async fn do_filter(&self, ctx: &mut GatewayContext) -> Result<(), GatewayError> {
        let elapsed_ms = ctx
            .attribute::<Instant>(ATTR_REQUEST_START)
            .map(|start| start.elapsed().as_millis() as u64)
            .unwrap_or(0);

        let outcome = match (ctx.response(), ctx.throwable()) {
            (_, Some(error)) => error.code(),
            (Some(response), None) => response.status.canonical_reason().unwrap_or("response"),
            (None, None) => "no_response",
        };

        self.metrics.incr_counter("gateway.request", "finish");
        self.metrics
            .observe_latency("gateway.request", ctx.unique_id(), elapsed_ms);

        if elapsed_ms > self.slow_threshold_ms {
            tracing::warn!(
                "Slow request {}: {} {} took {}ms, outcome: {}",
                ctx.request().request_id,
                ctx.request().method,
                ctx.request().path,
                elapsed_ms,
                outcome
            );
        } else {
            tracing::debug!(
                "Request {} finished in {}ms, outcome: {}",
                ctx.request().request_id,
                elapsed_ms,
                outcome
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use hyper::{HeaderMap, Method, StatusCode};

    use crate::core::request::GatewayRequest;
    use crate::core::response::GatewayResponse;
    use crate::metrics::TracingMetricsSink;
    use crate::models::{Protocol, Rule};

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

    #[tokio::test]
    async fn start_and_finish_are_counted() {
        let metrics = Arc::new(TracingMetricsSink::new());
        let start = MonitorFilter::new(metrics.clone());
        let end = MonitorEndFilter::new(metrics.clone());

        let mut ctx = context();
        start.do_filter(&mut ctx).await.unwrap();
        ctx.set_response(GatewayResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::new(),
        ));
        end.do_filter(&mut ctx).await.unwrap();

        assert_eq!(metrics.counter("gateway.request", "start"), 1);
        assert_eq!(metrics.counter("gateway.request", "finish"), 1);
    }

    #[tokio::test]
    async fn finish_without_start_does_not_panic() {
        let metrics = Arc::new(TracingMetricsSink::new());
        let end = MonitorEndFilter::new(metrics.clone());
        let mut ctx = context();
        end.do_filter(&mut ctx).await.unwrap();
        assert_eq!(metrics.counter("gateway.request", "finish"), 1);
    }
}
