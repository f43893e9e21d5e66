// Service-mesh edge gateway: rule-driven filter chains over a concurrent
// service registry, with load balancing, rate limiting and circuit breaking.

pub mod breaker;
pub mod client;
pub mod config;
pub mod core;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod lb;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{
    context::{ContextState, GatewayContext},
    dispatcher::Dispatcher,
    request::GatewayRequest,
    response::GatewayResponse,
    server::{ApiGateway, Gateway},
};
pub use error::{ConfigError, GatewayError, HttpClientError};
pub use models::{FilterConfig, Protocol, Rule, ServiceDefinition, ServiceInstance};
pub use registry::Registry;
