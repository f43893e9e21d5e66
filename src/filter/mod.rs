//! Rule-driven filter pipeline. Each filter is a process-lifetime singleton
//! registered by id; chains are assembled per rule and cached.

pub mod chain;
pub mod circuit_breaker;
pub mod factory;
pub mod gray;
pub mod ip_security;
pub mod load_balance;
pub mod mock;
pub mod monitor;
pub mod rate_limit;
pub mod router;

use async_trait::async_trait;

use crate::core::context::GatewayContext;
use crate::error::GatewayError;

pub use chain::GatewayFilterChain;
pub use factory::{FilterRegistry, GatewayFilterChainFactory};

// Filter ids
pub const GRAY_FILTER_ID: &str = "gray_filter";
pub const MONITOR_FILTER_ID: &str = "monitor_filter";
pub const MONITOR_END_FILTER_ID: &str = "monitor_end_filter";
pub const MOCK_FILTER_ID: &str = "mock_filter";
pub const IP_SECURITY_FILTER_ID: &str = "ip_security_filter";
pub const RATE_LIMIT_FILTER_ID: &str = "rate_limit_filter";
pub const LOAD_BALANCE_FILTER_ID: &str = "load_balance_filter";
pub const CIRCUIT_BREAKER_FILTER_ID: &str = "circuit_breaker_filter";
pub const ROUTER_FILTER_ID: &str = "router_filter";
pub const CIRCUIT_BREAKER_RESULT_FILTER_ID: &str = "circuit_breaker_result_filter";

// Filter orders; lower runs earlier
pub const MONITOR_FILTER_ORDER: i32 = i32::MIN;
pub const GRAY_FILTER_ORDER: i32 = -1000;
pub const IP_SECURITY_FILTER_ORDER: i32 = -10;
pub const RATE_LIMIT_FILTER_ORDER: i32 = 1;
pub const MOCK_FILTER_ORDER: i32 = 5;
pub const LOAD_BALANCE_FILTER_ORDER: i32 = 50;
pub const CIRCUIT_BREAKER_FILTER_ORDER: i32 = 95;
pub const ROUTER_FILTER_ORDER: i32 = 100;
pub const CIRCUIT_BREAKER_RESULT_FILTER_ORDER: i32 = i32::MAX - 1;
pub const MONITOR_END_FILTER_ORDER: i32 = i32::MAX;

/// Filters at or after this order form the result stage, which the chain
/// driver runs even when an earlier filter terminated the context.
pub const RESULT_STAGE_ORDER: i32 = i32::MAX - 1;

// Context attribute keys
pub const ATTR_BREAKER: &str = "circuit_breaker.instance";
pub const ATTR_BREAKER_START: &str = "circuit_breaker.start_time";
pub const ATTR_REQUEST_START: &str = "monitor.start_time";

/// A pluggable stage in a rule's processing pipeline.
///
/// A filter may mutate the context, short-circuit the chain by calling
/// `ctx.terminated()`, or fail with a typed error which the chain driver
/// records as the context throwable.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Unique filter ID referenced by rule filter configs
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    /// Position in the chain; lower runs earlier
    fn order(&self) -> i32;

    async fn do_filter(&self, ctx: &mut GatewayContext) -> Result<(), GatewayError>;
}

/// Everything the built-in filters need at construction time
pub struct FilterDependencies {
    pub registry: std::sync::Arc<crate::registry::Registry>,
    pub client: std::sync::Arc<dyn crate::client::HttpClient>,
    pub metrics: std::sync::Arc<dyn crate::metrics::MetricsSink>,
    pub breaker_manager: std::sync::Arc<crate::breaker::BreakerManager>,
    pub ip_security: crate::config::IpSecurityConfig,
    pub gray: crate::config::GrayConfig,
    pub invoker: crate::config::InvokerConfig,
}

/// Register the full built-in filter set
pub fn standard_filter_registry(deps: FilterDependencies) -> std::sync::Arc<FilterRegistry> {
    use std::sync::Arc;

    let lb_factory = Arc::new(crate::lb::LoadBalanceFactory::new(deps.registry.clone()));

    let registry = Arc::new(FilterRegistry::new());
    registry.register(Arc::new(monitor::MonitorFilter::new(deps.metrics.clone())));
    registry.register(Arc::new(gray::GrayFilter::new(&deps.gray)));
    registry.register(Arc::new(ip_security::IpSecurityFilter::new(&deps.ip_security)));
    registry.register(Arc::new(rate_limit::RateLimitFilter::new()));
    registry.register(Arc::new(mock::MockFilter::new()));
    registry.register(Arc::new(load_balance::LoadBalanceFilter::new(lb_factory)));
    registry.register(Arc::new(circuit_breaker::CircuitBreakerFilter::new(
        deps.breaker_manager,
        deps.metrics.clone(),
    )));
    registry.register(Arc::new(router::RouterFilter::new(
        deps.client,
        deps.invoker.timeout_ms,
    )));
    registry.register(Arc::new(circuit_breaker::CircuitBreakerResultFilter::new(
        deps.metrics.clone(),
    )));
    registry.register(Arc::new(monitor::MonitorEndFilter::new(deps.metrics)));
    registry
}
