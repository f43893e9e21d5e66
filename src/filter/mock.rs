use async_trait::async_trait;
use bytes::Bytes;
use hyper::{HeaderMap, StatusCode};
use serde::Deserialize;

use crate::core::context::GatewayContext;
use crate::core::response::GatewayResponse;
use crate::error::{ConfigError, GatewayError};
use crate::filter::{Filter, MOCK_FILTER_ID, MOCK_FILTER_ORDER};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MockConfig {
    status_code: u16,
    body: String,
    content_type: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            status_code: 200,
            body: String::new(),
            content_type: "application/json".to_string(),
        }
    }
}

/// Returns a canned response for rules that carry a mock config, without
/// touching any backend. Useful for stubbing services under development.
pub struct MockFilter;

impl MockFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MockFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Filter for MockFilter {
    fn id(&self) -> &'static str {
        MOCK_FILTER_ID
    }

    fn name(&self) -> &'static str {
        "mock filter"
    }

    fn order(&self) -> i32 {
        MOCK_FILTER_ORDER
    }

    async fn do_filter(&self, ctx: &mut GatewayContext) -> Result<(), GatewayError> {
        let Some(filter_config) = ctx.rule().filter_config(MOCK_FILTER_ID) else {
            return Ok(());
        };

        let config: MockConfig = if filter_config.config.is_empty() {
            MockConfig::default()
        } else {
            serde_json::from_str(&filter_config.config)
                .map_err(|e| ConfigError::ValidationError(format!("mock_filter config: {}", e)))?
        };

        let status = StatusCode::from_u16(config.status_code)
            .map_err(|e| ConfigError::ValidationError(format!("mock_filter status: {}", e)))?;

        let mut headers = HeaderMap::new();
        if let Ok(value) = config.content_type.parse() {
            headers.insert(hyper::header::CONTENT_TYPE, value);
        }

        tracing::info!(
            "Serving mock response for rule {} ({} {})",
            ctx.rule().id,
            status,
            ctx.request().path
        );
        ctx.set_response(GatewayResponse::new(status, headers, Bytes::from(config.body)));
        ctx.written();
        ctx.terminated();
        Ok(())
    }
}
