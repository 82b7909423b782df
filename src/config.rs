//! Application configuration module
//! Handles environment variable loading, defaults, and per-component settings

use std::env;
use std::time::Duration;

/// Top-level configuration for the payment flow core.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub signing: SigningPollConfig,
    pub recovery: RecoveryConfig,
    pub confirmation: ConfirmationConfig,
    pub breaker: BreakerConfig,
    pub health: HealthConfig,
    pub pricing: PricingConfig,
    pub logging: LoggingConfig,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            signing: SigningPollConfig::default(),
            recovery: RecoveryConfig::default(),
            confirmation: ConfirmationConfig::default(),
            breaker: BreakerConfig::default(),
            health: HealthConfig::default(),
            pricing: PricingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FlowConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv().ok();

        Self {
            signing: SigningPollConfig::from_env(),
            recovery: RecoveryConfig::from_env(),
            confirmation: ConfirmationConfig::from_env(),
            breaker: BreakerConfig::from_env(),
            health: HealthConfig::from_env(),
            pricing: PricingConfig::from_env(),
            logging: LoggingConfig::from_env(),
        }
    }
}

/// Polling limits for the backend authorization wait.
#[derive(Debug, Clone)]
pub struct SigningPollConfig {
    /// Maximum number of polls before the wait is treated as timed out.
    pub max_polls: u32,
    /// Delay before the first re-poll.
    pub initial_delay: Duration,
    /// Upper bound on the adaptive delay.
    pub max_delay: Duration,
    /// Whether the delay grows between polls or stays fixed.
    pub adaptive: bool,
}

impl Default for SigningPollConfig {
    fn default() -> Self {
        Self {
            max_polls: 45,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            adaptive: true,
        }
    }
}

impl SigningPollConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_polls: env_parse("SIGNING_MAX_POLLS", defaults.max_polls),
            initial_delay: Duration::from_millis(env_parse(
                "SIGNING_INITIAL_DELAY_MS",
                defaults.initial_delay.as_millis() as u64,
            )),
            max_delay: Duration::from_millis(env_parse(
                "SIGNING_MAX_DELAY_MS",
                defaults.max_delay.as_millis() as u64,
            )),
            adaptive: env_parse("SIGNING_ADAPTIVE", defaults.adaptive),
        }
    }
}

/// Auto-recovery policy for transient faults.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Master switch; when off, any transient fault is terminal.
    pub auto_recovery_enabled: bool,
    /// Maximum automatic recovery attempts per payment attempt.
    pub max_auto_retries: u32,
    /// Backoff base delay for the first recovery.
    pub initial_retry_delay: Duration,
    /// Backoff cap.
    pub max_retry_delay: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            auto_recovery_enabled: true,
            max_auto_retries: 3,
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

impl RecoveryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            auto_recovery_enabled: env_parse(
                "AUTO_RECOVERY_ENABLED",
                defaults.auto_recovery_enabled,
            ),
            max_auto_retries: env_parse("MAX_AUTO_RETRIES", defaults.max_auto_retries),
            initial_retry_delay: Duration::from_millis(env_parse(
                "INITIAL_RETRY_DELAY_MS",
                defaults.initial_retry_delay.as_millis() as u64,
            )),
            max_retry_delay: Duration::from_millis(env_parse(
                "MAX_RETRY_DELAY_MS",
                defaults.max_retry_delay.as_millis() as u64,
            )),
        }
    }
}

/// Receipt-watching requirements.
#[derive(Debug, Clone)]
pub struct ConfirmationConfig {
    /// Confirmations required before a payment counts as settled.
    pub required_confirmations: u32,
    /// Wall-clock budget for the receipt to appear.
    pub timeout: Duration,
    /// Interval between receipt probes.
    pub poll_interval: Duration,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            required_confirmations: 1,
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl ConfirmationConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            required_confirmations: env_parse(
                "REQUIRED_CONFIRMATIONS",
                defaults.required_confirmations,
            ),
            timeout: Duration::from_secs(env_parse(
                "CONFIRMATION_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )),
            poll_interval: Duration::from_millis(env_parse(
                "CONFIRMATION_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
        }
    }
}

/// Circuit breaker thresholds shared by all guarded call classes.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub threshold: u32,
    /// How long the breaker stays open before it self-heals.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            threshold: env_parse("BREAKER_THRESHOLD", defaults.threshold),
            cooldown: Duration::from_secs(env_parse(
                "BREAKER_COOLDOWN_SECS",
                defaults.cooldown.as_secs(),
            )),
        }
    }
}

/// Rolling-window sizing for the backend health monitor.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Number of recent call outcomes kept in the window.
    pub window_size: usize,
    /// Minimum samples before the tier can leave `Healthy`.
    pub min_samples: usize,
    /// Success rate below which the backend is `Degraded`.
    pub degraded_success_rate: f64,
    /// Success rate below which the backend is `Critical`.
    pub critical_success_rate: f64,
    /// Average latency above which the backend is `Degraded`.
    pub slow_response: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            min_samples: 5,
            degraded_success_rate: 0.90,
            critical_success_rate: 0.50,
            slow_response: Duration::from_secs(2),
        }
    }
}

impl HealthConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            window_size: env_parse("HEALTH_WINDOW_SIZE", defaults.window_size),
            min_samples: env_parse("HEALTH_MIN_SAMPLES", defaults.min_samples),
            degraded_success_rate: env_parse(
                "HEALTH_DEGRADED_SUCCESS_RATE",
                defaults.degraded_success_rate,
            ),
            critical_success_rate: env_parse(
                "HEALTH_CRITICAL_SUCCESS_RATE",
                defaults.critical_success_rate,
            ),
            slow_response: Duration::from_millis(env_parse(
                "HEALTH_SLOW_RESPONSE_MS",
                defaults.slow_response.as_millis() as u64,
            )),
        }
    }
}

/// Pricing and addressing constants for purchase construction.
#[derive(Debug, Clone)]
pub struct PricingConfig {
    /// Slippage buffer applied to swap-based quotes, in basis points.
    pub slippage_bps: u32,
    /// Intent validity window; authorization must arrive before it lapses.
    pub intent_ttl: Duration,
    /// Marketplace contract that receives purchase calls and is the
    /// allowance spender for token methods.
    pub marketplace_address: String,
    /// Settlement-token contract; target of approval calls.
    pub settlement_token_address: String,
    /// Base URL for transaction-explorer links on results, if any.
    pub explorer_base_url: Option<String>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            slippage_bps: 200,
            intent_ttl: Duration::from_secs(600),
            marketplace_address: "0x0000000000000000000000000000000000000000".to_string(),
            settlement_token_address: "0x0000000000000000000000000000000000000000".to_string(),
            explorer_base_url: None,
        }
    }
}

impl PricingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            slippage_bps: env_parse("SLIPPAGE_BPS", defaults.slippage_bps),
            intent_ttl: Duration::from_secs(env_parse(
                "INTENT_TTL_SECS",
                defaults.intent_ttl.as_secs(),
            )),
            marketplace_address: env::var("MARKETPLACE_ADDRESS")
                .unwrap_or(defaults.marketplace_address),
            settlement_token_address: env::var("SETTLEMENT_TOKEN_ADDRESS")
                .unwrap_or(defaults.settlement_token_address),
            explorer_base_url: env::var("EXPLORER_BASE_URL").ok(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("plain") => LogFormat::Plain,
            _ => defaults.format,
        };
        Self {
            level: env::var("LOG_LEVEL").unwrap_or(defaults.level),
            format,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
