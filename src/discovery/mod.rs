use dashmap::DashMap;

use crate::config::DiscoveryConfig;

/// Resolves service names to cluster-internal DNS URLs of the form
/// `<service>.<namespace>.<cluster_domain>`.
pub struct ServiceResolver {
    namespace: String,
    cluster_domain: String,
    cache: DashMap<String, String>,
}

impl ServiceResolver {
    pub fn new(config: &DiscoveryConfig) -> Self {
        tracing::info!(
            "ServiceResolver initialized: namespace={}, domain={}",
            config.namespace,
            config.cluster_domain
        );
        Self {
            namespace: config.namespace.clone(),
            cluster_domain: config.cluster_domain.clone(),
            cache: DashMap::new(),
        }
    }

    /// Cluster DNS host for a service
    pub fn resolve_service_host(&self, service_name: &str) -> String {
        let key = service_name.to_string();
        self.cache
            .entry(key)
            .or_insert_with(|| {
                let host = format!("{}.{}.{}", service_name, self.namespace, self.cluster_domain);
                tracing::debug!("Resolved service: {} -> {}", service_name, host);
                host
            })
            .clone()
    }

    /// Full URL for a service on a port
    pub fn resolve_service_url(&self, service_name: &str, port: u16) -> String {
        format!("http://{}:{}", self.resolve_service_host(service_name), port)
    }

    /// `service-name:version` -> `service-name`
    pub fn extract_service_name<'a>(&self, unique_id: &'a str) -> &'a str {
        unique_id.split(':').next().unwrap_or(unique_id)
    }
}
