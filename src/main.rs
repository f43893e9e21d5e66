mod breaker;
mod client;
mod config;
mod core;
mod discovery;
mod error;
mod filter;
mod lb;
mod metrics;
mod models;
mod registry;
mod utils;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use crate::breaker::BreakerManager;
use crate::client::ReqwestHttpClient;
use crate::config::{BasicConfigManager, ConfigManager, GatewayConfig};
use crate::core::dispatcher::Dispatcher;
use crate::core::server::{ApiGateway, Gateway};
use crate::discovery::ServiceResolver;
use crate::error::GatewayError;
use crate::filter::{standard_filter_registry, FilterDependencies, GatewayFilterChainFactory};
use crate::metrics::{MetricsSink, TracingMetricsSink};
use crate::models::{Protocol, ServiceDefinition, ServiceInstance};
use crate::registry::Registry;

#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    // Load configuration
    let config_manager = Arc::new(BasicConfigManager::new());
    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
    let config_path = Path::new(&config_path);

    let mut load_note = None;
    if config_path.exists() {
        match config_manager.load_from_file(config_path).await {
            Ok(_) => load_note = Some(format!("Configuration loaded from {}", config_path.display())),
            Err(e) => {
                load_note = Some(format!(
                    "Failed to load configuration from {}: {}, using defaults",
                    config_path.display(),
                    e
                ))
            }
        }
    } else {
        // Save the defaults for reference on first run.
        let _ = config_manager.save_to_file(config_path).await;
        load_note = Some(format!(
            "Configuration file {} not found, defaults saved and used",
            config_path.display()
        ));
    }

    let config = config_manager.get_config().await;

    // Initialize tracing, honoring RUST_LOG over the configured level
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if let Some(note) = load_note.take() {
        tracing::info!("{}", note);
    }

    // Build the registry and seed it from the configuration
    let registry = Arc::new(Registry::new());
    let resolver = ServiceResolver::new(&config.discovery);
    seed_registry(&registry, &resolver, &config);

    // Core components
    let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetricsSink::new());
    let breaker_manager = Arc::new(BreakerManager::new());
    let _stats_logger =
        BreakerManager::spawn_stats_logger(breaker_manager.clone(), Duration::from_secs(60));

    let client = Arc::new(ReqwestHttpClient::new(&config.invoker)?);

    let filter_registry = standard_filter_registry(FilterDependencies {
        registry: registry.clone(),
        client,
        metrics,
        breaker_manager,
        ip_security: config.ip_security.clone(),
        gray: config.gray.clone(),
        invoker: config.invoker.clone(),
    });
    let chain_factory = Arc::new(GatewayFilterChainFactory::new(filter_registry));
    let dispatcher = Arc::new(Dispatcher::new(registry, chain_factory));

    // Start the gateway
    let gateway = Arc::new(ApiGateway::new(config.server.clone(), dispatcher));
    gateway.start().await?;
    tracing::info!(
        "Gateway listening on {}:{}",
        config.server.host,
        config.server.port
    );

    // Wait for Ctrl+C
    signal::ctrl_c()
        .await
        .map_err(|e| GatewayError::InternalError(format!("signal handler failed: {}", e)))?;
    tracing::info!("Shutdown signal received, stopping gateway");

    gateway.stop().await?;
    tracing::info!("Gateway stopped");

    Ok(())
}

/// Register configured services, instances and rules. Instances without an
/// explicit IP get the cluster DNS name of their service.
fn seed_registry(registry: &Registry, resolver: &ServiceResolver, config: &GatewayConfig) {
    for seed in &config.services {
        let definition = ServiceDefinition {
            service_id: seed.service_id.clone(),
            version: seed.version.clone(),
            protocol: Protocol::Http,
            env_type: seed.env_type.clone(),
            pattern_path: String::new(),
        };
        let unique_id = definition.unique_id();
        registry.put_service(definition);

        for inst in &seed.instances {
            let host = match &inst.ip {
                Some(ip) => ip.clone(),
                None => resolver.resolve_service_host(&seed.service_id),
            };
            let mut instance =
                ServiceInstance::new(&unique_id, &host, inst.port).with_gray(inst.gray);
            if let Some(weight) = inst.weight {
                instance = instance.with_weight(weight);
            }
            instance.version = seed.version.clone();
            registry.put_instance(instance);
        }
    }

    for rule in &config.rules {
        registry.put_rule(rule.clone());
    }

    tracing::info!(
        "Registry seeded: {} services, {} rules",
        config.services.len(),
        config.rules.len()
    );
}
