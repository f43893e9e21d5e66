use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::core::context::GatewayContext;
use crate::error::{ConfigError, GatewayError};
use crate::filter::{Filter, RATE_LIMIT_FILTER_ID, RATE_LIMIT_FILTER_ORDER};
use crate::utils::TtlCache;

/// Rate limit configuration carried in a rule's filter config payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    /// One of ip, user, api, service, global
    pub limit_type: String,

    pub requests_per_second: f64,

    /// How long `try_acquire` may wait for a token
    pub timeout_ms: u64,

    /// token_bucket or sliding_window; both are served by the token bucket
    pub algorithm: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit_type: "ip".to_string(),
            requests_per_second: 100.0,
            timeout_ms: 0,
            algorithm: "token_bucket".to_string(),
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket starting full, refilled continuously at `rate` per second.
/// Capacity equals one second of tokens, which bounds the burst.
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(requests_per_second: f64) -> Self {
        let rate = requests_per_second.max(f64::MIN_POSITIVE);
        let capacity = rate.max(1.0);
        Self {
            rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, waiting up to `timeout_ms` for one to become
    /// available. A reservation is made under the lock before sleeping, so
    /// concurrent waiters cannot claim the same token.
    pub async fn try_acquire(&self, timeout_ms: u64) -> bool {
        let wait = {
            let mut state = self.state.lock();
            self.refill(&mut state);

            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                None
            } else {
                let deficit = 1.0 - state.tokens;
                let wait_ms = (deficit / self.rate * 1000.0).ceil() as u64;
                if wait_ms <= timeout_ms {
                    state.tokens -= 1.0;
                    Some(wait_ms)
                } else {
                    return false;
                }
            }
        };

        if let Some(wait_ms) = wait {
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }
        true
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;
    }
}

/// Throttles by a configurable key. Limiters are cached per key with
/// time-based eviction so idle keys do not accumulate.
pub struct RateLimitFilter {
    limiters: TtlCache<Arc<TokenBucket>>,
}

impl RateLimitFilter {
    const LIMITER_TTL: Duration = Duration::from_secs(3600);
    const MAX_LIMITERS: usize = 10_000;

    pub fn new() -> Self {
        Self {
            limiters: TtlCache::new(Self::LIMITER_TTL, Self::MAX_LIMITERS),
        }
    }

    fn build_limit_key(ctx: &GatewayContext, config: &RateLimitConfig) -> String {
        match config.limit_type.as_str() {
            "ip" => format!("ip:{}", ctx.request().client_ip),
            "user" => format!(
                "user:{}",
                ctx.request().user_id.as_deref().unwrap_or("anonymous")
            ),
            "api" => format!("api:{}", ctx.request().path),
            "service" => format!("service:{}", ctx.unique_id()),
            _ => "global".to_string(),
        }
    }
}

impl Default for RateLimitFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Filter for RateLimitFilter {
    fn id(&self) -> &'static str {
        RATE_LIMIT_FILTER_ID
    }

    fn name(&self) -> &'static str {
        "rate limit filter"
    }

    fn order(&self) -> i32 {
        RATE_LIMIT_FILTER_ORDER
    }

    async fn do_filter(&self, ctx: &mut GatewayContext) -> Result<(), GatewayError> {
        let Some(filter_config) = ctx.rule().filter_config(RATE_LIMIT_FILTER_ID) else {
            return Ok(());
        };

        let config: RateLimitConfig = if filter_config.config.is_empty() {
            RateLimitConfig::default()
        } else {
            serde_json::from_str(&filter_config.config).map_err(|e| {
                ConfigError::ValidationError(format!("rate_limit_filter config: {}", e))
            })?
        };

        let key = Self::build_limit_key(ctx, &config);
        let limiter = self
            .limiters
            .get_with(&key, || Arc::new(TokenBucket::new(config.requests_per_second)));

        if !limiter.try_acquire(config.timeout_ms).await {
            tracing::warn!("Rate limit exceeded for key: {}", key);
            return Err(GatewayError::ServiceUnavailable(format!(
                "rate limit exceeded for {}",
                key
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use hyper::{HeaderMap, Method};

    use crate::core::request::GatewayRequest;
    use crate::models::{Protocol, Rule};

    fn context_with_rule(rule: Rule, ip: &str) -> GatewayContext {
        let request = GatewayRequest::new(
            "user:1.0.0".to_string(),
            Method::GET,
            "/user/ping".parse().unwrap(),
            HeaderMap::new(),
            Bytes::new(),
            ip.parse().unwrap(),
        );
        GatewayContext::new(Protocol::Http, true, request, Arc::new(rule))
    }

    fn limited_rule(config: &str) -> Rule {
        let mut rule = Rule::new("r1", "user", "/user", 0);
        rule.add_filter_config(RATE_LIMIT_FILTER_ID, config);
        rule
    }

    #[tokio::test]
    async fn bucket_exhausts_then_refills() {
        let bucket = TokenBucket::new(2.0);
        assert!(bucket.try_acquire(0).await);
        assert!(bucket.try_acquire(0).await);
        assert!(!bucket.try_acquire(0).await);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(bucket.try_acquire(0).await);
    }

    #[tokio::test]
    async fn acquire_waits_within_timeout() {
        let bucket = TokenBucket::new(10.0);
        for _ in 0..10 {
            assert!(bucket.try_acquire(0).await);
        }
        // Empty; one token appears after ~100ms which fits the budget.
        let start = Instant::now();
        assert!(bucket.try_acquire(500).await);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn third_call_within_burst_is_rejected() {
        let filter = RateLimitFilter::new();
        let rule = limited_rule(r#"{"limitType":"ip","requestsPerSecond":2,"timeoutMs":0}"#);

        let mut ctx = context_with_rule(rule.clone(), "10.0.0.9");
        assert!(filter.do_filter(&mut ctx).await.is_ok());
        let mut ctx = context_with_rule(rule.clone(), "10.0.0.9");
        assert!(filter.do_filter(&mut ctx).await.is_ok());

        let mut ctx = context_with_rule(rule, "10.0.0.9");
        assert!(matches!(
            filter.do_filter(&mut ctx).await,
            Err(GatewayError::ServiceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn limits_are_per_key() {
        let filter = RateLimitFilter::new();
        let rule = limited_rule(r#"{"limitType":"ip","requestsPerSecond":1,"timeoutMs":0}"#);

        let mut ctx = context_with_rule(rule.clone(), "10.0.0.1");
        assert!(filter.do_filter(&mut ctx).await.is_ok());
        // A different client IP has its own bucket.
        let mut ctx = context_with_rule(rule.clone(), "10.0.0.2");
        assert!(filter.do_filter(&mut ctx).await.is_ok());

        let mut ctx = context_with_rule(rule, "10.0.0.1");
        assert!(filter.do_filter(&mut ctx).await.is_err());
    }

    #[tokio::test]
    async fn unconfigured_rule_passes_through() {
        let filter = RateLimitFilter::new();
        let mut ctx = context_with_rule(Rule::new("r1", "user", "/user", 0), "10.0.0.1");
        for _ in 0..50 {
            assert!(filter.do_filter(&mut ctx).await.is_ok());
        }
    }

    #[test]
    fn key_shapes() {
        let rule = limited_rule("{}");
        let ctx = context_with_rule(rule, "10.0.0.7");

        let key = |limit_type: &str| {
            RateLimitFilter::build_limit_key(
                &ctx,
                &RateLimitConfig {
                    limit_type: limit_type.to_string(),
                    ..Default::default()
                },
            )
        };
        assert_eq!(key("ip"), "ip:10.0.0.7");
        assert_eq!(key("user"), "user:anonymous");
        assert_eq!(key("api"), "api:/user/ping");
        assert_eq!(key("service"), "service:user:1.0.0");
        assert_eq!(key("global"), "global");
        assert_eq!(key("unknown"), "global");
    }
}
