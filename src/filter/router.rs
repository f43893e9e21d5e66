use std::sync::Arc;

use async_trait::async_trait;

use crate::client::HttpClient;
use crate::core::context::GatewayContext;
use crate::error::GatewayError;
use crate::filter::{Filter, ROUTER_FILTER_ID, ROUTER_FILTER_ORDER};

/// Last non-result stage: performs the backend HTTP call against the host
/// the load balancer selected and relays the response verbatim.
pub struct RouterFilter {
    client: Arc<dyn HttpClient>,
    timeout_ms: u64,
}

impl RouterFilter {
    pub fn new(client: Arc<dyn HttpClient>, timeout_ms: u64) -> Self {
        Self { client, timeout_ms }
    }
}

#[async_trait]
impl Filter for RouterFilter {
    fn id(&self) -> &'static str {
        ROUTER_FILTER_ID
    }

    fn name(&self) -> &'static str {
        "router filter"
    }

    fn order(&self) -> i32 {
        ROUTER_FILTER_ORDER
    }

    async fn do_filter(&self, ctx: &mut GatewayContext) -> Result<(), GatewayError> {
        let modify_host = ctx
            .request()
            .modify_host()
            .ok_or_else(|| {
                GatewayError::InternalError("no backend instance selected for request".into())
            })?
            .to_string();

        tracing::debug!(
            "Routing {} {} to {}",
            ctx.request().method,
            ctx.request().path,
            modify_host
        );

        match self.client.send(ctx.request(), &modify_host, self.timeout_ms).await {
            Ok(response) => {
                ctx.set_response(response);
                ctx.written();
                Ok(())
            }
            Err(error) => {
                tracing::warn!("Backend call to {} failed: {}", modify_host, error);
                Err(GatewayError::HttpResponseError(error))
            }
        }
    }
}
