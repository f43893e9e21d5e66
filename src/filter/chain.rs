use std::sync::Arc;

use crate::core::context::GatewayContext;
use crate::filter::{Filter, RESULT_STAGE_ORDER};

/// Ordered list of filter references executed for one rule
pub struct GatewayFilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl GatewayFilterChain {
    /// Build a chain from filters in registration order. Sorting is stable,
    /// so equal orders keep their registration order.
    pub fn new(mut filters: Vec<Arc<dyn Filter>>) -> Self {
        filters.sort_by_key(|f| f.order());
        Self { filters }
    }

    pub fn filters(&self) -> &[Arc<dyn Filter>] {
        &self.filters
    }

    /// Run the chain to completion.
    ///
    /// Filters before the result stage run sequentially until one terminates
    /// the context or fails; a failure becomes the context throwable. The
    /// result stage then always runs, so a stashed circuit breaker handle is
    /// recorded no matter how the request ended.
    pub async fn execute(&self, ctx: &mut GatewayContext) {
        for filter in self.filters.iter().filter(|f| f.order() < RESULT_STAGE_ORDER) {
            if ctx.is_terminated() {
                break;
            }
            tracing::trace!("Running filter {}", filter.id());
            if let Err(error) = filter.do_filter(ctx).await {
                tracing::warn!("Filter {} failed: {}", filter.id(), error);
                ctx.set_throwable(error);
                ctx.terminated();
            }
        }

        for filter in self.filters.iter().filter(|f| f.order() >= RESULT_STAGE_ORDER) {
            if let Err(error) = filter.do_filter(ctx).await {
                tracing::error!("Result-stage filter {} failed: {}", filter.id(), error);
            }
        }
    }
}
