//! Backend health monitor
//! Derives an overall health tier for the authorization service from a
//! rolling window of recent call outcomes, so one slow call cannot flip the
//! tier on its own.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::HealthConfig;

/// Overall backend health tier.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthTier {
    Healthy,
    Degraded,
    Critical,
}

impl HealthTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthTier::Healthy => "healthy",
            HealthTier::Degraded => "degraded",
            HealthTier::Critical => "critical",
        }
    }
}

impl std::fmt::Display for HealthTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One observed call against the authorization service.
#[derive(Debug, Clone, Copy)]
struct CallOutcome {
    latency: Duration,
    ok: bool,
}

/// Serializable health snapshot embedded in `FlowState.system_health`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SystemHealth {
    pub tier: HealthTier,
    pub avg_response_ms: u64,
    pub success_rate: f64,
    pub samples: usize,
    pub recommendations: Vec<String>,
}

impl SystemHealth {
    /// Optimistic default used before any call has been observed.
    pub fn unknown() -> Self {
        Self {
            tier: HealthTier::Healthy,
            avg_response_ms: 0,
            success_rate: 1.0,
            samples: 0,
            recommendations: Vec::new(),
        }
    }
}

/// Rolling-window monitor for the authorization service.
///
/// Process-wide: one monitor is shared by every orchestrator in the session
/// because it describes the real backend, not one purchase. Passed in
/// explicitly (no ambient global) so tests stay isolated.
pub struct BackendHealthMonitor {
    config: HealthConfig,
    window: Mutex<VecDeque<CallOutcome>>,
}

impl BackendHealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            window: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record_success(&self, latency: Duration) {
        self.push(CallOutcome { latency, ok: true });
    }

    pub fn record_failure(&self, latency: Duration) {
        self.push(CallOutcome { latency, ok: false });
        debug!(latency_ms = latency.as_millis() as u64, "authorization call failed");
    }

    fn push(&self, outcome: CallOutcome) {
        let mut window = self.window.lock().expect("health lock poisoned");
        window.push_back(outcome);
        while window.len() > self.config.window_size {
            window.pop_front();
        }
    }

    /// Derive the current tier and metrics from the window.
    pub fn snapshot(&self) -> SystemHealth {
        let window = self.window.lock().expect("health lock poisoned");
        let samples = window.len();
        if samples == 0 {
            return SystemHealth::unknown();
        }

        let successes = window.iter().filter(|o| o.ok).count();
        let success_rate = successes as f64 / samples as f64;
        let total_ms: u128 = window.iter().map(|o| o.latency.as_millis()).sum();
        let avg_response_ms = (total_ms / samples as u128) as u64;

        // Below the sample floor the tier stays optimistic; a single failed
        // call on a fresh session should not lock users out.
        let tier = if samples < self.config.min_samples {
            HealthTier::Healthy
        } else if success_rate < self.config.critical_success_rate {
            HealthTier::Critical
        } else if success_rate < self.config.degraded_success_rate
            || avg_response_ms > self.config.slow_response.as_millis() as u64
        {
            HealthTier::Degraded
        } else {
            HealthTier::Healthy
        };

        if tier == HealthTier::Critical {
            warn!(
                success_rate = success_rate,
                avg_response_ms = avg_response_ms,
                "authorization backend is critical"
            );
        }

        SystemHealth {
            tier,
            avg_response_ms,
            success_rate,
            samples,
            recommendations: recommendations_for(tier, success_rate, avg_response_ms),
        }
    }

    /// Clear the window. Test hook.
    pub fn reset(&self) {
        self.window.lock().expect("health lock poisoned").clear();
    }
}

fn recommendations_for(tier: HealthTier, success_rate: f64, avg_response_ms: u64) -> Vec<String> {
    match tier {
        HealthTier::Healthy => Vec::new(),
        HealthTier::Degraded => {
            let mut out = Vec::new();
            if success_rate < 0.90 {
                out.push(
                    "The payment service is having intermittent trouble; retries may be needed"
                        .to_string(),
                );
            }
            if avg_response_ms > 2_000 {
                out.push(format!(
                    "Payment authorization is slow right now (~{} ms); expect longer waits",
                    avg_response_ms
                ));
            }
            out
        }
        HealthTier::Critical => vec![
            "The payment service is currently unreliable".to_string(),
            "Direct token payment is still available; swap-based payment is paused".to_string(),
        ],
    }
}
