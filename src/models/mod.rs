// Service and rule models shared by the registry and the filter chain

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Wire protocol of a registered service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Http
    }
}

/// Backend service definition, keyed by `unique_id = service_id:version`.
/// Immutable once registered; replaced wholesale on re-registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Service identifier without version
    pub service_id: String,

    /// Service version
    pub version: String,

    #[serde(default)]
    pub protocol: Protocol,

    /// Deployment environment (dev, test, prod)
    #[serde(default)]
    pub env_type: String,

    /// Glob pattern the service announces for its paths
    #[serde(default)]
    pub pattern_path: String,
}

impl ServiceDefinition {
    pub fn unique_id(&self) -> String {
        format!("{}:{}", self.service_id, self.version)
    }
}

/// A single addressable instance of a service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// `ip:port`
    pub service_instance_id: String,

    /// Owning service `service_id:version`
    pub unique_id: String,

    pub ip: String,

    pub port: u16,

    /// Registration time, ms since epoch
    #[serde(default)]
    pub register_time: u64,

    #[serde(default)]
    pub version: String,

    /// Load balancing weight; recorded for future weighted strategies
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Canary marker; gray requests only route to gray instances
    #[serde(default)]
    pub gray: bool,

    #[serde(default = "default_enable")]
    pub enable: bool,
}

fn default_weight() -> u32 {
    100
}

fn default_enable() -> bool {
    true
}

impl ServiceInstance {
    pub fn new(unique_id: &str, ip: &str, port: u16) -> Self {
        Self {
            service_instance_id: format!("{}:{}", ip, port),
            unique_id: unique_id.to_string(),
            ip: ip.to_string(),
            port,
            register_time: crate::utils::now_ms(),
            version: String::new(),
            weight: default_weight(),
            gray: false,
            enable: true,
        }
    }

    pub fn with_gray(mut self, gray: bool) -> Self {
        self.gray = gray;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_enable(mut self, enable: bool) -> Self {
        self.enable = enable;
        self
    }

    /// `ip:port` as written into `modify_host`
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Per-filter configuration attached to a rule. Set identity is the `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Filter unique ID
    pub id: String,

    /// Opaque JSON config string, e.g. `{"load_balance_key":"round_robin"}`
    #[serde(default)]
    pub config: String,
}

impl PartialEq for FilterConfig {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FilterConfig {}

impl PartialOrd for FilterConfig {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FilterConfig {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

/// Routing and filter policy attached to a service.
///
/// Ordering: by `order` ascending, ties broken by `id` lexicographic. A
/// rule's `paths` are matched exactly before any prefix fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Globally unique rule ID
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub protocol: Protocol,

    /// Backend service this rule routes to
    pub service_id: String,

    /// Path prefix matched after exact-path lookup fails
    #[serde(default)]
    pub prefix: String,

    /// Exact path literals served by this rule
    #[serde(default)]
    pub paths: Vec<String>,

    /// Lower runs earlier when several rules could match
    #[serde(default)]
    pub order: i32,

    #[serde(default)]
    pub filter_configs: BTreeSet<FilterConfig>,
}

impl Rule {
    pub fn new(id: &str, service_id: &str, prefix: &str, order: i32) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            protocol: Protocol::Http,
            service_id: service_id.to_string(),
            prefix: prefix.to_string(),
            paths: Vec::new(),
            order,
            filter_configs: BTreeSet::new(),
        }
    }

    pub fn with_paths(mut self, paths: &[&str]) -> Self {
        self.paths = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn add_filter_config(&mut self, id: &str, config: &str) -> bool {
        self.filter_configs.insert(FilterConfig {
            id: id.to_string(),
            config: config.to_string(),
        })
    }

    /// Find the config entry for a filter id, case-insensitive like the
    /// rest of the rule payload.
    pub fn filter_config(&self, id: &str) -> Option<&FilterConfig> {
        self.filter_configs
            .iter()
            .find(|c| c.id.eq_ignore_ascii_case(id))
    }

    pub fn has_filter(&self, id: &str) -> bool {
        self.filter_config(id).is_some()
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Rule {}

impl PartialOrd for Rule {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rule {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order.cmp(&other.order).then_with(|| self.id.cmp(&other.id))
    }
}
