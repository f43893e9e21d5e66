use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::ConfigError;
use crate::models::Rule;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Backend invocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokerConfig {
    /// Per-request backend timeout in milliseconds
    pub timeout_ms: u64,

    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 500,
            connect_timeout_ms: 30_000,
        }
    }
}

/// Service discovery configuration. Service DNS names resolve to
/// `<service>.<namespace>.<cluster_domain>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub namespace: String,

    pub cluster_domain: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            cluster_domain: "svc.cluster.local".to_string(),
        }
    }
}

/// IP security configuration consumed by the IP security filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpSecurityConfig {
    /// When false the whitelist is not consulted at all
    #[serde(default)]
    pub whitelist_enabled: bool,

    /// Literal IPs and CIDR ranges
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Literal IPs and CIDR ranges; checked before the whitelist
    #[serde(default)]
    pub blacklist: Vec<String>,
}

/// Gray routing policy used when no `gray` header is present
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrayConfig {
    /// Percentage of clients (by IP hash) routed to gray instances
    #[serde(default)]
    pub ratio_percent: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when RUST_LOG is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Static instance seed for a service. When `ip` is omitted the instance
/// host is resolved through the discovery DNS naming scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSeed {
    #[serde(default)]
    pub ip: Option<String>,

    pub port: u16,

    #[serde(default)]
    pub gray: bool,

    #[serde(default)]
    pub weight: Option<u32>,
}

/// Service registered at startup from the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSeed {
    pub service_id: String,

    pub version: String,

    #[serde(default)]
    pub env_type: String,

    #[serde(default)]
    pub instances: Vec<InstanceSeed>,
}

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub invoker: InvokerConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub ip_security: IpSecurityConfig,

    #[serde(default)]
    pub gray: GrayConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Services registered at startup
    #[serde(default)]
    pub services: Vec<ServiceSeed>,

    /// Rules registered at startup
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Configuration manager trait
#[async_trait::async_trait]
pub trait ConfigManager: Send + Sync {
    /// Get the current configuration
    async fn get_config(&self) -> GatewayConfig;

    /// Load configuration from a YAML file
    async fn load_from_file(&self, path: &Path) -> Result<(), ConfigError>;

    /// Save the current configuration to a YAML file
    async fn save_to_file(&self, path: &Path) -> Result<(), ConfigError>;

    /// Replace the current configuration
    async fn update_config(&self, config: GatewayConfig) -> Result<(), ConfigError>;
}

/// Basic implementation of the ConfigManager
pub struct BasicConfigManager {
    config: Arc<RwLock<GatewayConfig>>,
}

impl BasicConfigManager {
    /// Create a new BasicConfigManager with default configuration
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(GatewayConfig::default())),
        }
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
        }
    }
}

impl Default for BasicConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConfigManager for BasicConfigManager {
    async fn get_config(&self) -> GatewayConfig {
        self.config.read().await.clone()
    }

    async fn load_from_file(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.display(), e)))?;

        let config: GatewayConfig = serde_yaml::from_str(&raw)
            .map_err(|e| ConfigError::ValidationError(format!("{}: {}", path.display(), e)))?;

        let mut current = self.config.write().await;
        *current = config;
        Ok(())
    }

    async fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let config = self.config.read().await.clone();
        let raw = serde_yaml::to_string(&config)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        tokio::fs::write(path, raw)
            .await
            .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.display(), e)))
    }

    async fn update_config(&self, config: GatewayConfig) -> Result<(), ConfigError> {
        let mut current = self.config.write().await;
        *current = config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.invoker.timeout_ms, 500);
        assert_eq!(config.discovery.namespace, "default");
        assert_eq!(config.discovery.cluster_domain, "svc.cluster.local");
        assert!(!config.ip_security.whitelist_enabled);
    }

    #[test]
    fn parses_yaml() {
        let yaml = r#"
server:
  host: 0.0.0.0
  port: 9000
ip_security:
  whitelist_enabled: true
  whitelist: ["10.0.0.0/8"]
  blacklist: ["1.2.3.4"]
services:
  - service_id: user
    version: 1.0.0
    instances:
      - ip: 127.0.0.1
        port: 8081
      - port: 8082
rules:
  - id: rule-user
    service_id: user
    prefix: /user
    paths: ["/user/ping"]
    order: 1
    filter_configs:
      - id: load_balance_filter
        config: '{"load_balance_key":"round_robin"}'
"#;
        let config: GatewayConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert!(config.ip_security.whitelist_enabled);
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].instances.len(), 2);
        assert!(config.services[0].instances[1].ip.is_none());
        assert_eq!(config.rules.len(), 1);
        let rule = &config.rules[0];
        assert_eq!(rule.paths, vec!["/user/ping".to_string()]);
        assert!(rule.has_filter("load_balance_filter"));
    }
}
