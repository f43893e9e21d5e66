use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::config::GrayConfig;
use crate::core::context::GatewayContext;
use crate::error::GatewayError;
use crate::filter::{Filter, GRAY_FILTER_ID, GRAY_FILTER_ORDER};

/// Marks canary traffic. A `gray: true` header wins; otherwise a stable
/// client-IP hash routes the configured percentage of clients gray.
pub struct GrayFilter {
    ratio_percent: u32,
}

impl GrayFilter {
    pub fn new(config: &GrayConfig) -> Self {
        Self {
            ratio_percent: config.ratio_percent.min(100),
        }
    }

    fn hash_bucket(ip: &std::net::IpAddr) -> u32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        ip.hash(&mut hasher);
        (hasher.finish() % 100) as u32
    }
}

#[async_trait]
impl Filter for GrayFilter {
    fn id(&self) -> &'static str {
        GRAY_FILTER_ID
    }

    fn name(&self) -> &'static str {
        "gray routing filter"
    }

    fn order(&self) -> i32 {
        GRAY_FILTER_ORDER
    }

    async fn do_filter(&self, ctx: &mut GatewayContext) -> Result<(), GatewayError> {
        let by_header = ctx
            .request()
            .header("gray")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        ctx.gray = by_header
            || (self.ratio_percent > 0
                && Self::hash_bucket(&ctx.request().client_ip) < self.ratio_percent);

        if ctx.gray {
            tracing::debug!(
                "Request {} marked gray (header: {})",
                ctx.request().request_id,
                by_header
            );
        }
        Ok(())
    }
}
