//! Circuit breaking built on a three-state machine and a sliding-window
//! statistics engine.

pub mod config;
pub mod sliding_window;

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

pub use config::CircuitBreakerConfig;
pub use sliding_window::{SlidingWindow, WindowStats};

use crate::error::ConfigError;
use crate::utils::{now_ms, TtlCache};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation, requests admitted
    Closed,
    /// Tripped, requests rejected until the dwell elapses
    Open,
    /// Probing recovery with a bounded request budget
    HalfOpen,
}

impl BreakerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BreakerState::Closed,
            1 => BreakerState::Open,
            _ => BreakerState::HalfOpen,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::Open => 1,
            BreakerState::HalfOpen => 2,
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(name)
    }
}

/// Snapshot of a breaker's counters and window aggregates
#[derive(Debug, Clone)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub total_requests: u32,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_rate: f64,
    pub average_response_time_ms: f64,
    pub last_failure_time: u64,
    pub state_change_time: u64,
    pub half_open_admitted: u32,
}

enum Admission {
    Admit,
    ProbeAfterDwell,
    Reject(&'static str),
}

/// Three-state circuit breaker.
///
/// Transitions are serialized by the write half of the lock; admission and
/// result recording run under the read half and observe the state through an
/// atomic, so the hot path never waits on anything longer than a transition.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    request_count: AtomicU32,
    half_open_admitted: AtomicU32,
    last_failure_time: AtomicU64,
    state_change_time: AtomicU64,
    lock: RwLock<()>,
    window: SlidingWindow,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let window = SlidingWindow::new(config.window_size_ms, config.bucket_count);
        tracing::info!(
            "CircuitBreaker initialized: threshold={}%, minRequests={}, dwell={}ms",
            config.failure_threshold_percentage,
            config.min_request_threshold,
            config.timeout_ms
        );
        Self {
            config,
            state: AtomicU8::new(BreakerState::Closed.as_u8()),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            request_count: AtomicU32::new(0),
            half_open_admitted: AtomicU32::new(0),
            last_failure_time: AtomicU64::new(0),
            state_change_time: AtomicU64::new(now_ms()),
            lock: RwLock::new(()),
            window,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether a request may proceed right now
    pub fn allow_request(&self) -> bool {
        self.allow_request_at(now_ms())
    }

    pub(crate) fn allow_request_at(&self, now: u64) -> bool {
        let admission = {
            let _read = self.lock.read();
            match self.state() {
                BreakerState::Closed => Admission::Admit,
                BreakerState::Open => {
                    let dwell = now.saturating_sub(self.state_change_time.load(Ordering::SeqCst));
                    if dwell >= self.config.timeout_ms {
                        Admission::ProbeAfterDwell
                    } else {
                        Admission::Reject("circuit_open")
                    }
                }
                BreakerState::HalfOpen => {
                    // Bounded probe budget; the counter only moves forward
                    // while a slot is actually free.
                    let max = self.config.half_open_max_requests;
                    let claimed = self
                        .half_open_admitted
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                            (n < max).then_some(n + 1)
                        });
                    if claimed.is_ok() {
                        Admission::Admit
                    } else {
                        Admission::Reject("half_open_full")
                    }
                }
            }
        };

        match admission {
            Admission::Admit => true,
            // The transition runs outside the read guard; if another request
            // won the race the validity check turns this into a reject.
            Admission::ProbeAfterDwell => self.attempt_transition_at(now, BreakerState::HalfOpen),
            Admission::Reject(reason) => {
                tracing::debug!("Circuit breaker rejected request: {}", reason);
                false
            }
        }
    }

    /// Record the outcome of an admitted request
    pub fn record_result(&self, success: bool, response_time_ms: u64) {
        self.record_result_at(now_ms(), success, response_time_ms)
    }

    pub(crate) fn record_result_at(&self, now: u64, success: bool, response_time_ms: u64) {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.window.add_sample_at(now, success, response_time_ms);

        let state = {
            let _read = self.lock.read();
            self.state()
        };

        if success {
            self.on_success(state, now);
        } else {
            self.on_failure(state, now);
        }
    }

    fn on_success(&self, state: BreakerState, now: u64) {
        let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;

        match state {
            BreakerState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            BreakerState::HalfOpen => {
                tracing::debug!(
                    "Success in HALF_OPEN, count: {}/{}",
                    successes,
                    self.config.half_open_success_threshold
                );
                if successes >= self.config.half_open_success_threshold {
                    self.attempt_transition_at(now, BreakerState::Closed);
                }
            }
            BreakerState::Open => {
                tracing::warn!("Unexpected success recorded while OPEN");
            }
        }
    }

    fn on_failure(&self, state: BreakerState, now: u64) {
        self.failure_count.fetch_add(1, Ordering::SeqCst);
        self.last_failure_time.store(now, Ordering::SeqCst);

        match state {
            BreakerState::Closed => {
                if self.should_trip(now) {
                    self.attempt_transition_at(now, BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => {
                tracing::debug!("Failure in HALF_OPEN, opening circuit");
                self.attempt_transition_at(now, BreakerState::Open);
            }
            BreakerState::Open => {
                tracing::warn!("Unexpected failure recorded while OPEN");
            }
        }
    }

    fn should_trip(&self, now: u64) -> bool {
        if self.request_count.load(Ordering::SeqCst) < self.config.min_request_threshold {
            return false;
        }

        let stats = self.window.stats_at(now);
        if stats.total_requests < self.config.min_request_threshold {
            return false;
        }

        let should_trip = stats.failure_rate >= f64::from(self.config.failure_threshold_percentage);
        if should_trip {
            tracing::warn!(
                "Circuit breaker tripping: failure rate {:.2}% >= threshold {}%, total: {}, failures: {}",
                stats.failure_rate,
                self.config.failure_threshold_percentage,
                stats.total_requests,
                stats.failure_count
            );
        }
        should_trip
    }

    fn attempt_transition_at(&self, now: u64, new_state: BreakerState) -> bool {
        let _write = self.lock.write();
        let current = self.state();

        if !Self::is_valid_transition(current, new_state) {
            tracing::warn!("Invalid state transition from {} to {}", current, new_state);
            return false;
        }

        self.apply_transition(now, current, new_state);
        true
    }

    fn is_valid_transition(from: BreakerState, to: BreakerState) -> bool {
        matches!(
            (from, to),
            (BreakerState::Closed, BreakerState::Open)
                | (BreakerState::Open, BreakerState::HalfOpen)
                | (BreakerState::HalfOpen, BreakerState::Closed)
                | (BreakerState::HalfOpen, BreakerState::Open)
        )
    }

    fn apply_transition(&self, now: u64, from: BreakerState, to: BreakerState) {
        self.state.store(to.as_u8(), Ordering::SeqCst);
        self.state_change_time.store(now, Ordering::SeqCst);

        match to {
            BreakerState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
                self.success_count.store(0, Ordering::SeqCst);
                self.request_count.store(0, Ordering::SeqCst);
                self.half_open_admitted.store(0, Ordering::SeqCst);
                self.window.reset();
            }
            BreakerState::Open => {
                self.half_open_admitted.store(0, Ordering::SeqCst);
            }
            BreakerState::HalfOpen => {
                self.success_count.store(0, Ordering::SeqCst);
                self.half_open_admitted.store(0, Ordering::SeqCst);
            }
        }

        tracing::info!("Circuit breaker state changed from {} to {}", from, to);
    }

    /// Operational override, skips the transition validity check
    pub fn force_open(&self) {
        self.force_transition(BreakerState::Open);
    }

    /// Operational override, skips the transition validity check
    pub fn force_close(&self) {
        self.force_transition(BreakerState::Closed);
    }

    fn force_transition(&self, to: BreakerState) {
        let _write = self.lock.write();
        let from = self.state();
        self.apply_transition(now_ms(), from, to);
        tracing::info!("Circuit breaker forced to {} state", to);
    }

    pub fn stats(&self) -> BreakerStats {
        let window_stats = self.window.stats();
        BreakerStats {
            state: self.state(),
            total_requests: self.request_count.load(Ordering::SeqCst),
            failure_count: self.failure_count.load(Ordering::SeqCst),
            success_count: self.success_count.load(Ordering::SeqCst),
            failure_rate: window_stats.failure_rate,
            average_response_time_ms: window_stats.average_response_time_ms,
            last_failure_time: self.last_failure_time.load(Ordering::SeqCst),
            state_change_time: self.state_change_time.load(Ordering::SeqCst),
            half_open_admitted: self.half_open_admitted.load(Ordering::SeqCst),
        }
    }
}

/// Creates, caches and administers the per-service circuit breakers
pub struct BreakerManager {
    breakers: TtlCache<Arc<CircuitBreaker>>,
}

impl BreakerManager {
    const MAX_BREAKERS: usize = 1000;
    const BREAKER_TTL: Duration = Duration::from_secs(3600);

    pub fn new() -> Self {
        Self {
            breakers: TtlCache::new(Self::BREAKER_TTL, Self::MAX_BREAKERS),
        }
    }

    /// Fetch the breaker for a service, creating it from `config` on first
    /// sight. The config is validated before a breaker is built from it.
    pub fn get_or_create(
        &self,
        unique_id: &str,
        config: CircuitBreakerConfig,
    ) -> Result<Arc<CircuitBreaker>, ConfigError> {
        config.validate()?;
        Ok(self.breakers.get_with(unique_id, || {
            tracing::info!("Creating circuit breaker for service: {}", unique_id);
            Arc::new(CircuitBreaker::new(config))
        }))
    }

    pub fn get(&self, unique_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(unique_id)
    }

    pub fn remove(&self, unique_id: &str) {
        self.breakers.invalidate(unique_id);
        tracing::info!("Circuit breaker removed for service: {}", unique_id);
    }

    pub fn force_open(&self, unique_id: &str) -> bool {
        match self.breakers.get(unique_id) {
            Some(breaker) => {
                breaker.force_open();
                true
            }
            None => false,
        }
    }

    pub fn force_close(&self, unique_id: &str) -> bool {
        match self.breakers.get(unique_id) {
            Some(breaker) => {
                breaker.force_close();
                true
            }
            None => false,
        }
    }

    /// Force every breaker closed
    pub fn reset_all(&self) {
        self.breakers.for_each(|unique_id, breaker| {
            breaker.force_close();
            tracing::info!("Reset circuit breaker for service: {}", unique_id);
        });
    }

    pub fn all_stats(&self) -> Vec<(String, BreakerStats)> {
        let mut all = Vec::new();
        self.breakers
            .for_each(|unique_id, breaker| all.push((unique_id.to_string(), breaker.stats())));
        all
    }

    /// Periodically log per-service breaker statistics
    pub fn spawn_stats_logger(
        manager: Arc<BreakerManager>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for (unique_id, stats) in manager.all_stats() {
                    tracing::info!(
                        "Breaker {}: state={}, total={}, failures={}, failure rate={:.2}%, avg rt={:.2}ms",
                        unique_id,
                        stats.state,
                        stats.total_requests,
                        stats.failure_count,
                        stats.failure_rate,
                        stats.average_response_time_ms
                    );
                }
            }
        })
    }
}

impl Default for BreakerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well past the window size so zeroed buckets read as stale.
    const T0: u64 = 10_000_000;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
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

    fn tripped_breaker() -> CircuitBreaker {
        let breaker = CircuitBreaker::new(test_config());
        for i in 0..20 {
            breaker.record_result_at(T0 + i, false, 10);
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        breaker
    }

    #[test]
    fn stays_closed_below_min_requests() {
        let breaker = CircuitBreaker::new(test_config());
        for i in 0..19 {
            breaker.record_result_at(T0 + i, false, 10);
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow_request_at(T0 + 100));
    }

    #[test]
    fn trips_open_at_threshold() {
        // 15 failures then 5 successes: the trip check only runs on a
        // failure, so the breaker is still closed afterwards.
        let breaker = CircuitBreaker::new(test_config());
        for i in 0..15 {
            breaker.record_result_at(T0 + i, false, 10);
        }
        for i in 15..20 {
            breaker.record_result_at(T0 + i, true, 10);
        }
        assert_eq!(breaker.state(), BreakerState::Closed);

        // 20 more failures push the window far past 50% and trip it.
        for i in 20..40 {
            breaker.record_result_at(T0 + i, false, 10);
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow_request_at(T0 + 100));
    }

    #[test]
    fn open_rejects_until_dwell_elapses() {
        let breaker = tripped_breaker();
        assert!(!breaker.allow_request_at(T0 + 1000));
        // One dwell later the next admission probes half-open.
        assert!(breaker.allow_request_at(T0 + 61_000));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let breaker = tripped_breaker();
        assert!(breaker.allow_request_at(T0 + 61_000));

        breaker.record_result_at(T0 + 61_010, true, 10);
        breaker.record_result_at(T0 + 61_020, true, 10);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_result_at(T0 + 61_030, true, 10);
        assert_eq!(breaker.state(), BreakerState::Closed);

        // Closed entry resets all counters and the window.
        let stats = breaker.stats();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.failure_count, 0);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = tripped_breaker();
        assert!(breaker.allow_request_at(T0 + 61_000));
        breaker.record_result_at(T0 + 61_010, false, 10);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow_request_at(T0 + 61_020));
    }

    #[test]
    fn half_open_admission_budget() {
        let breaker = tripped_breaker();
        assert!(breaker.allow_request_at(T0 + 61_000));
        // The probe that opened half-open does not consume the budget.
        let mut admitted = 0;
        for i in 0..10 {
            if breaker.allow_request_at(T0 + 61_100 + i) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }

    #[test]
    fn closed_success_resets_failure_streak() {
        let breaker = CircuitBreaker::new(test_config());
        for i in 0..10 {
            breaker.record_result_at(T0 + i, false, 10);
        }
        breaker.record_result_at(T0 + 10, true, 10);
        assert_eq!(breaker.stats().failure_count, 0);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn forced_transitions_bypass_validity() {
        let breaker = CircuitBreaker::new(test_config());
        breaker.force_open();
        assert_eq!(breaker.state(), BreakerState::Open);
        breaker.force_close();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn state_sequence_follows_transition_graph() {
        // Drive a long mixed workload and verify every observed state
        // change is an edge of the transition graph.
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            min_request_threshold: 5,
            timeout_ms: 1000,
            window_size_ms: 10_000,
            bucket_count: 5,
            half_open_max_requests: 2,
            half_open_success_threshold: 1,
            ..test_config()
        });

        // A single allow or record performs at most one transition, so
        // sampling after each call observes every state change.
        let mut last = breaker.state();
        let observe = |state: BreakerState, last: &mut BreakerState| {
            if state != *last {
                assert!(
                    CircuitBreaker::is_valid_transition(*last, state),
                    "illegal transition {} -> {}",
                    last,
                    state
                );
                *last = state;
            }
        };

        let mut now = T0;
        for i in 0..400u64 {
            now += 97;
            let admitted = breaker.allow_request_at(now);
            observe(breaker.state(), &mut last);
            if admitted {
                breaker.record_result_at(now + 1, i % 2 == 0, 5);
                observe(breaker.state(), &mut last);
            }
        }
    }

    #[test]
    fn manager_caches_per_service() {
        let manager = BreakerManager::new();
        let a = manager.get_or_create("user:1.0.0", test_config()).unwrap();
        let b = manager.get_or_create("user:1.0.0", test_config()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(manager.get("order:1.0.0").is_none());

        assert!(manager.force_open("user:1.0.0"));
        assert_eq!(a.state(), BreakerState::Open);
        assert!(manager.force_close("user:1.0.0"));
        assert_eq!(a.state(), BreakerState::Closed);
        assert!(!manager.force_open("order:1.0.0"));

        a.force_open();
        manager.reset_all();
        assert_eq!(a.state(), BreakerState::Closed);

        let stats = manager.all_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].0, "user:1.0.0");

        manager.remove("user:1.0.0");
        assert!(manager.get("user:1.0.0").is_none());
    }

    #[test]
    fn manager_rejects_invalid_config() {
        let manager = BreakerManager::new();
        let mut config = test_config();
        config.bucket_count = 0;
        assert!(manager.get_or_create("user:1.0.0", config).is_err());
    }
}
