use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::context::GatewayContext;
use crate::error::GatewayError;
use crate::filter::{Filter, LOAD_BALANCE_FILTER_ID, LOAD_BALANCE_FILTER_ORDER};
use crate::lb::{LoadBalanceFactory, STRATEGY_RANDOM};

#[derive(Debug, Deserialize)]
struct LoadBalanceConfig {
    #[serde(default = "default_strategy")]
    load_balance_key: String,
}

fn default_strategy() -> String {
    STRATEGY_RANDOM.to_string()
}

/// Chooses a backend instance and rewrites the request's backend host to the
/// instance's `ip:port`.
pub struct LoadBalanceFilter {
    factory: Arc<LoadBalanceFactory>,
}

impl LoadBalanceFilter {
    pub fn new(factory: Arc<LoadBalanceFactory>) -> Self {
        Self { factory }
    }

    fn strategy_name(&self, ctx: &GatewayContext) -> String {
        let Some(filter_config) = ctx.rule().filter_config(LOAD_BALANCE_FILTER_ID) else {
            return default_strategy();
        };
        if filter_config.config.is_empty() {
            return default_strategy();
        }
        match serde_json::from_str::<LoadBalanceConfig>(&filter_config.config) {
            Ok(config) => config.load_balance_key,
            Err(e) => {
                tracing::warn!(
                    "Bad load_balance_filter config for rule {}: {}",
                    ctx.rule().id,
                    e
                );
                default_strategy()
            }
        }
    }
}

#[async_trait]
impl Filter for LoadBalanceFilter {
    fn id(&self) -> &'static str {
        LOAD_BALANCE_FILTER_ID
    }

    fn name(&self) -> &'static str {
        "load balance filter"
    }

    fn order(&self) -> i32 {
        LOAD_BALANCE_FILTER_ORDER
    }

    async fn do_filter(&self, ctx: &mut GatewayContext) -> Result<(), GatewayError> {
        let strategy = self.factory.strategy(&self.strategy_name(ctx));
        let instance = strategy.choose(ctx.unique_id(), ctx.gray)?;

        tracing::debug!(
            "Selected instance {} for {} via {}",
            instance.service_instance_id,
            ctx.unique_id(),
            strategy.name()
        );
        ctx.request_mut().set_modify_host(instance.address());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use hyper::{HeaderMap, Method};

    use crate::core::request::GatewayRequest;
    use crate::models::{Protocol, Rule, ServiceInstance};
    use crate::registry::Registry;

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

    fn filter_with_instances() -> LoadBalanceFilter {
        let registry = Arc::new(Registry::new());
        registry.put_instance(ServiceInstance::new("user:1.0.0", "10.0.0.1", 8081));
        registry.put_instance(ServiceInstance::new("user:1.0.0", "10.0.0.2", 8082));
        LoadBalanceFilter::new(Arc::new(LoadBalanceFactory::new(registry)))
    }

    #[tokio::test]
    async fn sets_modify_host_from_chosen_instance() {
        let filter = filter_with_instances();
        let mut rule = Rule::new("r1", "user", "/user", 0);
        rule.add_filter_config(
            LOAD_BALANCE_FILTER_ID,
            r#"{"load_balance_key":"round_robin"}"#,
        );

        let mut ctx = context_with_rule(rule);
        filter.do_filter(&mut ctx).await.unwrap();
        assert_eq!(ctx.request().modify_host(), Some("10.0.0.1:8081"));
    }

    #[tokio::test]
    async fn defaults_to_random_without_config() {
        let filter = filter_with_instances();
        let mut ctx = context_with_rule(Rule::new("r1", "user", "/user", 0));
        filter.do_filter(&mut ctx).await.unwrap();
        let host = ctx.request().modify_host().unwrap();
        assert!(host == "10.0.0.1:8081" || host == "10.0.0.2:8082");
    }

    #[tokio::test]
    async fn no_instances_fails() {
        let registry = Arc::new(Registry::new());
        let filter = LoadBalanceFilter::new(Arc::new(LoadBalanceFactory::new(registry)));
        let mut ctx = context_with_rule(Rule::new("r1", "user", "/user", 0));
        assert!(matches!(
            filter.do_filter(&mut ctx).await,
            Err(GatewayError::ServiceInstanceNotFound(_))
        ));
    }
}
