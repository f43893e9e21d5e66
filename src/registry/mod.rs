use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::models::{Rule, ServiceDefinition, ServiceInstance};

/// In-memory registry of service definitions, instances and rules.
///
/// One `DashMap` per index keeps reads lock-free for callers while writes
/// stay short and per-key. A read observes the pre- or post-state of any
/// concurrent mutation of the index it targets, never a partial state.
///
/// The two derived rule indexes (`service_id -> ordered rules`,
/// `service_id "." path -> rule`) are maintained by the rule mutators.
pub struct Registry {
    definitions: DashMap<String, Arc<ServiceDefinition>>,

    /// unique_id -> instances keyed by `service_instance_id`. A BTreeMap
    /// gives the deterministic enumeration order round-robin indexing needs.
    instances: DashMap<String, BTreeMap<String, ServiceInstance>>,

    rules: DashMap<String, Arc<Rule>>,
    rules_by_service: DashMap<String, Vec<Arc<Rule>>>,
    rules_by_path: DashMap<String, Arc<Rule>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            definitions: DashMap::new(),
            instances: DashMap::new(),
            rules: DashMap::new(),
            rules_by_service: DashMap::new(),
            rules_by_path: DashMap::new(),
        }
    }

    // ---- service definitions ----

    /// Register or replace a service definition
    pub fn put_service(&self, definition: ServiceDefinition) {
        let unique_id = definition.unique_id();
        tracing::info!("Registering service definition: {}", unique_id);
        self.definitions.insert(unique_id, Arc::new(definition));
    }

    pub fn remove_service(&self, unique_id: &str) {
        tracing::info!("Removing service definition: {}", unique_id);
        self.definitions.remove(unique_id);
    }

    pub fn get_definition(&self, unique_id: &str) -> Option<Arc<ServiceDefinition>> {
        self.definitions.get(unique_id).map(|e| e.value().clone())
    }

    // ---- service instances ----

    /// Insert an instance into its service's set
    pub fn put_instance(&self, instance: ServiceInstance) {
        tracing::info!(
            "Registering instance {} for {}",
            instance.service_instance_id,
            instance.unique_id
        );
        self.instances
            .entry(instance.unique_id.clone())
            .or_default()
            .insert(instance.service_instance_id.clone(), instance);
    }

    pub fn remove_instance(&self, unique_id: &str, service_instance_id: &str) {
        tracing::info!("Removing instance {} from {}", service_instance_id, unique_id);
        if let Some(mut set) = self.instances.get_mut(unique_id) {
            set.remove(service_instance_id);
        }
    }

    /// All instances of a service, sorted by `service_instance_id`
    pub fn get_instances(&self, unique_id: &str) -> Vec<ServiceInstance> {
        self.instances
            .get(unique_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    // ---- rules ----

    /// Register or replace a rule and refresh the derived indexes.
    ///
    /// The chain cache keys on `rule.id`, so an in-place rule change should
    /// arrive as remove + put under a fresh id.
    pub fn put_rule(&self, rule: Rule) {
        let rule = Arc::new(rule);
        tracing::info!("Registering rule {} for service {}", rule.id, rule.service_id);

        let previous = self.rules.insert(rule.id.clone(), rule.clone());

        if let Some(old) = previous.as_ref() {
            self.unindex_paths(old);
            if old.service_id != rule.service_id {
                self.rebuild_service_index(&old.service_id);
            }
        }

        for path in &rule.paths {
            self.rules_by_path
                .insert(path_key(&rule.service_id, path), rule.clone());
        }
        self.rebuild_service_index(&rule.service_id);
    }

    pub fn remove_rule(&self, rule_id: &str) {
        if let Some((_, rule)) = self.rules.remove(rule_id) {
            tracing::info!("Removing rule {} for service {}", rule.id, rule.service_id);
            self.unindex_paths(&rule);
            self.rebuild_service_index(&rule.service_id);
        }
    }

    pub fn get_rule(&self, rule_id: &str) -> Option<Arc<Rule>> {
        self.rules.get(rule_id).map(|e| e.value().clone())
    }

    /// Exact-path fast path, keyed by `service_id "." path`
    pub fn get_rule_by_path(&self, service_id: &str, path: &str) -> Option<Arc<Rule>> {
        self.rules_by_path
            .get(&path_key(service_id, path))
            .map(|e| e.value().clone())
    }

    /// Rules of a service sorted by `order` ascending, ties by id
    pub fn get_rules_by_service(&self, service_id: &str) -> Vec<Arc<Rule>> {
        self.rules_by_service
            .get(service_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    fn unindex_paths(&self, rule: &Rule) {
        for path in &rule.paths {
            // Another rule may have claimed the path meanwhile; only drop
            // entries still pointing at this rule.
            self.rules_by_path
                .remove_if(&path_key(&rule.service_id, path), |_, r| r.id == rule.id);
        }
    }

    fn rebuild_service_index(&self, service_id: &str) {
        let mut rules: Vec<Arc<Rule>> = self
            .rules
            .iter()
            .filter(|e| e.value().service_id == service_id)
            .map(|e| e.value().clone())
            .collect();
        rules.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));

        if rules.is_empty() {
            self.rules_by_service.remove(service_id);
        } else {
            self.rules_by_service.insert(service_id.to_string(), rules);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn path_key(service_id: &str, path: &str) -> String {
    format!("{}.{}", service_id, path)
}
