use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Circuit breaker configuration, deserialized from a rule's
/// `circuit_breaker_filter` config payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitBreakerConfig {
    /// Failure rate (percent) at which a closed breaker trips
    pub failure_threshold_percentage: u32,

    /// Minimum window sample count before the failure rate is considered
    pub min_request_threshold: u32,

    /// Open state dwell before probing, in milliseconds
    pub timeout_ms: u64,

    /// Probe budget while half-open
    pub half_open_max_requests: u32,

    /// Successes required to close from half-open
    pub half_open_success_threshold: u32,

    /// Statistics window size in milliseconds
    pub window_size_ms: u64,

    /// Buckets inside the statistics window
    pub bucket_count: usize,

    /// Body returned instead of the 503 when the breaker rejects
    pub fallback_response: Option<String>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold_percentage: 50,
            min_request_threshold: 20,
            timeout_ms: 60_000,
            half_open_max_requests: 5,
            half_open_success_threshold: 3,
            window_size_ms: 60_000,
            bucket_count: 10,
            fallback_response: None,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold_percentage < 1 || self.failure_threshold_percentage > 100 {
            return Err(ConfigError::ValidationError(
                "failureThresholdPercentage must be between 1 and 100".into(),
            ));
        }
        if self.min_request_threshold < 1 {
            return Err(ConfigError::ValidationError(
                "minRequestThreshold must be greater than 0".into(),
            ));
        }
        if self.timeout_ms < 1000 {
            return Err(ConfigError::ValidationError(
                "timeoutMs must be at least 1000ms".into(),
            ));
        }
        if self.half_open_max_requests < 1 {
            return Err(ConfigError::ValidationError(
                "halfOpenMaxRequests must be greater than 0".into(),
            ));
        }
        if self.half_open_success_threshold > self.half_open_max_requests {
            return Err(ConfigError::ValidationError(
                "halfOpenSuccessThreshold cannot be greater than halfOpenMaxRequests".into(),
            ));
        }
        if self.window_size_ms < 10_000 {
            return Err(ConfigError::ValidationError(
                "windowSizeMs must be at least 10 seconds".into(),
            ));
        }
        if self.bucket_count < 2 || self.bucket_count > 100 {
            return Err(ConfigError::ValidationError(
                "bucketCount must be between 2 and 100".into(),
            ));
        }
        Ok(())
    }

    /// Aggressive settings for test environments
    pub fn fast_fail() -> Self {
        Self {
            failure_threshold_percentage: 30,
            min_request_threshold: 5,
            timeout_ms: 10_000,
            half_open_max_requests: 2,
            half_open_success_threshold: 1,
            window_size_ms: 30_000,
            bucket_count: 6,
            fallback_response: None,
        }
    }

    /// Forgiving settings for production
    pub fn lenient() -> Self {
        Self {
            failure_threshold_percentage: 70,
            min_request_threshold: 50,
            timeout_ms: 120_000,
            half_open_max_requests: 10,
            half_open_success_threshold: 7,
            window_size_ms: 120_000,
            bucket_count: 12,
            fallback_response: None,
        }
    }
}
