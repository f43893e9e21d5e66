use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::filter::chain::GatewayFilterChain;
use crate::filter::{
    Filter, GRAY_FILTER_ID, MOCK_FILTER_ID, MONITOR_END_FILTER_ID, MONITOR_FILTER_ID,
    ROUTER_FILTER_ID,
};
use crate::models::Rule;
use crate::utils::TtlCache;

/// Explicit filter registration, keyed by filter id. Filters carry their
/// order as data, so registering is all a deployment needs to do to make a
/// filter available to rules.
pub struct FilterRegistry {
    filters: DashMap<String, Arc<dyn Filter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self {
            filters: DashMap::new(),
        }
    }

    pub fn register(&self, filter: Arc<dyn Filter>) {
        tracing::info!(
            "Registered filter: id={}, name={}, order={}",
            filter.id(),
            filter.name(),
            filter.order()
        );
        if self.filters.insert(filter.id().to_string(), filter).is_some() {
            tracing::warn!("Filter registered twice, replacing earlier instance");
        }
    }

    pub fn get(&self, filter_id: &str) -> Option<Arc<dyn Filter>> {
        self.filters.get(filter_id).map(|e| e.value().clone())
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds and caches per-rule filter chains.
///
/// Chains are cached by `rule.id` with time-based eviction; a rule update
/// must arrive as remove + put under a fresh id, otherwise the stale chain
/// is served until the TTL runs out.
pub struct GatewayFilterChainFactory {
    filter_registry: Arc<FilterRegistry>,
    chain_cache: TtlCache<Arc<GatewayFilterChain>>,
}

impl GatewayFilterChainFactory {
    const CHAIN_TTL: Duration = Duration::from_secs(600);
    const MAX_CHAINS: usize = 10_000;

    pub fn new(filter_registry: Arc<FilterRegistry>) -> Self {
        Self {
            filter_registry,
            chain_cache: TtlCache::new(Self::CHAIN_TTL, Self::MAX_CHAINS),
        }
    }

    pub fn get_chain(&self, rule: &Rule) -> Arc<GatewayFilterChain> {
        self.chain_cache
            .get_with(&rule.id, || Arc::new(self.build_chain(rule)))
    }

    /// Drop the cached chain for a rule, for callers that replace rules in
    /// place instead of delete+insert.
    pub fn invalidate(&self, rule_id: &str) {
        self.chain_cache.invalidate(rule_id);
    }

    /// Seed the pre-rule filters, append the filters the rule asks for,
    /// close with the router, then stable-sort by order.
    fn build_chain(&self, rule: &Rule) -> GatewayFilterChain {
        let mut filters: Vec<Arc<dyn Filter>> = Vec::new();

        let seeds = [
            GRAY_FILTER_ID,
            MONITOR_FILTER_ID,
            MONITOR_END_FILTER_ID,
            MOCK_FILTER_ID,
        ];
        for id in seeds {
            if let Some(filter) = self.filter_registry.get(id) {
                filters.push(filter);
            }
        }

        for filter_config in &rule.filter_configs {
            let id = filter_config.id.as_str();
            // Seeded filters and the router are placed by the factory, not
            // by rule config.
            if seeds.contains(&id) || id == ROUTER_FILTER_ID {
                continue;
            }
            match self.filter_registry.get(id) {
                Some(filter) => filters.push(filter),
                None => tracing::warn!("Rule {} references unknown filter: {}", rule.id, id),
            }
        }

        if let Some(router) = self.filter_registry.get(ROUTER_FILTER_ID) {
            filters.push(router);
        }

        tracing::debug!("Built filter chain for rule {}: {} filters", rule.id, filters.len());
        GatewayFilterChain::new(filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::core::context::GatewayContext;
    use crate::error::GatewayError;
    use crate::filter::{
        CIRCUIT_BREAKER_FILTER_ID, CIRCUIT_BREAKER_FILTER_ORDER, GRAY_FILTER_ORDER,
        LOAD_BALANCE_FILTER_ID, LOAD_BALANCE_FILTER_ORDER, MONITOR_END_FILTER_ORDER,
        MONITOR_FILTER_ORDER, ROUTER_FILTER_ORDER,
    };

    struct StubFilter {
        id: &'static str,
        order: i32,
    }

    #[async_trait]
    impl Filter for StubFilter {
        fn id(&self) -> &'static str {
            self.id
        }
        fn name(&self) -> &'static str {
            self.id
        }
        fn order(&self) -> i32 {
            self.order
        }
        async fn do_filter(&self, _ctx: &mut GatewayContext) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    fn stub(id: &'static str, order: i32) -> Arc<dyn Filter> {
        Arc::new(StubFilter { id, order })
    }

    fn registry_with_standard_stubs() -> Arc<FilterRegistry> {
        let registry = Arc::new(FilterRegistry::new());
        registry.register(stub(GRAY_FILTER_ID, GRAY_FILTER_ORDER));
        registry.register(stub(MONITOR_FILTER_ID, MONITOR_FILTER_ORDER));
        registry.register(stub(MONITOR_END_FILTER_ID, MONITOR_END_FILTER_ORDER));
        registry.register(stub(MOCK_FILTER_ID, crate::filter::MOCK_FILTER_ORDER));
        registry.register(stub(LOAD_BALANCE_FILTER_ID, LOAD_BALANCE_FILTER_ORDER));
        registry.register(stub(CIRCUIT_BREAKER_FILTER_ID, CIRCUIT_BREAKER_FILTER_ORDER));
        registry.register(stub(ROUTER_FILTER_ID, ROUTER_FILTER_ORDER));
        registry
    }

    fn rule_with_filters() -> Rule {
        let mut rule = Rule::new("rule-1", "user", "/user", 0);
        rule.add_filter_config(LOAD_BALANCE_FILTER_ID, r#"{"load_balance_key":"random"}"#);
        rule.add_filter_config(CIRCUIT_BREAKER_FILTER_ID, "{}");
        rule
    }

    #[test]
    fn chain_contains_router_once_after_lower_orders() {
        let factory = GatewayFilterChainFactory::new(registry_with_standard_stubs());
        let chain = factory.get_chain(&rule_with_filters());

        let ids: Vec<&str> = chain.filters().iter().map(|f| f.id()).collect();
        let router_positions: Vec<usize> = ids
            .iter()
            .enumerate()
            .filter(|(_, id)| **id == ROUTER_FILTER_ID)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(router_positions.len(), 1);

        let router_pos = router_positions[0];
        for (i, filter) in chain.filters().iter().enumerate() {
            if filter.order() < ROUTER_FILTER_ORDER {
                assert!(i < router_pos, "{} should run before the router", filter.id());
            }
        }
    }

    #[test]
    fn unknown_filter_ids_are_skipped() {
        let factory = GatewayFilterChainFactory::new(registry_with_standard_stubs());
        let mut rule = rule_with_filters();
        rule.add_filter_config("no_such_filter", "{}");

        let chain = factory.get_chain(&rule);
        assert!(chain.filters().iter().all(|f| f.id() != "no_such_filter"));
    }

    #[test]
    fn rule_config_cannot_duplicate_seeded_filters() {
        let factory = GatewayFilterChainFactory::new(registry_with_standard_stubs());
        let mut rule = rule_with_filters();
        rule.add_filter_config(GRAY_FILTER_ID, "{}");
        rule.add_filter_config(ROUTER_FILTER_ID, "{}");

        let chain = factory.get_chain(&rule);
        let gray_count = chain.filters().iter().filter(|f| f.id() == GRAY_FILTER_ID).count();
        let router_count = chain
            .filters()
            .iter()
            .filter(|f| f.id() == ROUTER_FILTER_ID)
            .count();
        assert_eq!((gray_count, router_count), (1, 1));
    }

    #[test]
    fn chains_are_cached_by_rule_id() {
        let factory = GatewayFilterChainFactory::new(registry_with_standard_stubs());
        let rule = rule_with_filters();

        let first = factory.get_chain(&rule);
        let second = factory.get_chain(&rule);
        assert!(Arc::ptr_eq(&first, &second));

        factory.invalidate(&rule.id);
        let third = factory.get_chain(&rule);
        assert!(!Arc::ptr_eq(&first, &third));
    }
}
