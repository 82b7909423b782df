//! Circuit breaker for dependent call classes.
//!
//! One breaker guards one class of calls (content fetches, backend
//! authorization). After `threshold` consecutive failures the breaker opens
//! and short-circuits further calls until `cooldown` elapses, at which point
//! it self-heals without requiring a successful probe.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::BreakerConfig;

/// Well-known breaker names used by the orchestrator.
pub mod names {
    /// Guards content pricing and balance reads.
    pub const CONTENT_FETCH: &str = "content-fetch";
    /// Guards the backend authorization path.
    pub const AUTHORIZATION: &str = "authorization";
}

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

/// Serializable snapshot of a breaker for diagnostics.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CircuitBreakerState {
    pub failure_count: u32,
    pub threshold: u32,
    pub cooldown_secs: u64,
    pub open: bool,
}

/// Tracks consecutive failures of one call class.
///
/// Interior mutability keeps the API usable from racing async callbacks; the
/// lock is never held across an await point.
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            threshold: config.threshold,
            cooldown: config.cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Whether the guarded call class may be invoked right now.
    ///
    /// Once the cooldown has elapsed the breaker resets its failure count
    /// and closes on this check — no explicit success is required.
    pub fn can_proceed(&self) -> bool {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        if state.failure_count < self.threshold {
            return true;
        }
        match state.last_failure_at {
            Some(at) if at.elapsed() < self.cooldown => false,
            _ => {
                debug!(failures = state.failure_count, "circuit breaker cooled down, closing");
                state.failure_count = 0;
                state.last_failure_at = None;
                true
            }
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        state.failure_count += 1;
        state.last_failure_at = Some(Instant::now());
        if state.failure_count == self.threshold {
            warn!(
                failures = state.failure_count,
                cooldown_secs = self.cooldown.as_secs(),
                "circuit breaker opened"
            );
        }
    }

    pub fn record_success(&self) {
        self.reset();
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        state.failure_count = 0;
        state.last_failure_at = None;
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let state = self.state.lock().expect("breaker lock poisoned");
        let open = state.failure_count >= self.threshold
            && state
                .last_failure_at
                .map(|at| at.elapsed() < self.cooldown)
                .unwrap_or(false);
        CircuitBreakerState {
            failure_count: state.failure_count,
            threshold: self.threshold,
            cooldown_secs: self.cooldown.as_secs(),
            open,
        }
    }
}

/// Process-scoped collection of named breakers.
///
/// Breakers describe the real backend's condition, so one registry is shared
/// across every orchestrator instance in the session. It is an explicit
/// value handed to constructors, not ambient module state, so tests can run
/// in isolation with `reset_all`.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch (or lazily create) the breaker for a call class.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("registry lock poisoned");
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(&self.config)))
            .clone()
    }

    /// Reset every breaker. Test hook.
    pub fn reset_all(&self) {
        let breakers = self.breakers.lock().expect("registry lock poisoned");
        for breaker in breakers.values() {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, cooldown: Duration) -> BreakerConfig {
        BreakerConfig { threshold, cooldown }
    }

    #[test]
    fn stays_closed_below_threshold() {
        let breaker = CircuitBreaker::new(&config(3, Duration::from_secs(60)));
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.can_proceed());
    }

    #[test]
    fn opens_at_exactly_threshold_failures() {
        let breaker = CircuitBreaker::new(&config(3, Duration::from_secs(60)));
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(!breaker.can_proceed());
        assert!(breaker.snapshot().open);
    }

    #[test]
    fn success_resets_the_count() {
        let breaker = CircuitBreaker::new(&config(3, Duration::from_secs(60)));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.can_proceed());
    }

    #[test]
    fn self_heals_after_cooldown_without_manual_intervention() {
        let breaker = CircuitBreaker::new(&config(2, Duration::from_millis(20)));
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.can_proceed());

        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.can_proceed());
        // The cooldown check reset the count; a single new failure does not
        // reopen the breaker.
        breaker.record_failure();
        assert!(breaker.can_proceed());
    }

    #[test]
    fn registry_returns_same_breaker_per_name() {
        let registry = BreakerRegistry::new(config(3, Duration::from_secs(60)));
        let a = registry.breaker(names::AUTHORIZATION);
        let b = registry.breaker(names::AUTHORIZATION);
        a.record_failure();
        assert_eq!(b.snapshot().failure_count, 1);

        registry.reset_all();
        assert_eq!(a.snapshot().failure_count, 0);
    }

    #[test]
    fn racing_failure_records_are_all_counted() {
        let breaker = Arc::new(CircuitBreaker::new(&config(100, Duration::from_secs(60))));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let breaker = breaker.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..10 {
                    breaker.record_failure();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(breaker.snapshot().failure_count, 80);
    }
}
