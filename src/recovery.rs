//! Failure classification and recovery strategy selection.
//!
//! Classification is deliberately conservative: anything not positively
//! recognized falls through to `UnknownError`, which is never auto-retried.
//! Misreading a hard failure as transient buys pointless retries; misreading
//! a transient one as hard abandons a recoverable purchase — the first is
//! cheaper, so the heuristics only claim `TransientNetwork` on a clear match.

use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::backend::authorizer::AuthorizationError;
use crate::chaindata::ChainDataError;
use crate::config::RecoveryConfig;
use crate::error::{ErrorCategory, FlowError};
use crate::services::confirmation::ConfirmationError;
use crate::services::submission::SubmissionError;
use crate::wallet::provider::WalletError;

// ---------------------------------------------------------------------------
// Recovery actions
// ---------------------------------------------------------------------------

/// One recovery option the UI can surface or the orchestrator can take.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum RecoveryAction {
    /// Automatic retry after the given backoff delay.
    RetryWithBackoff { delay_ms: u64 },
    /// Offer a different payment method.
    SwitchMethod,
    /// Wait for the backend to recover before starting again.
    WaitForBackend,
    /// Balance cannot cover the purchase; prompt a top-up.
    AddFunds,
    /// No automatic retry; the user may start a fresh attempt.
    TryAgainManually,
    /// Nothing sensible left to do.
    Abort,
}

/// Ordered recovery actions for an error category at a given attempt count.
pub fn recovery_actions(
    category: ErrorCategory,
    attempt: u32,
    config: &RecoveryConfig,
) -> Vec<RecoveryAction> {
    match category {
        ErrorCategory::InsufficientFunds => {
            vec![RecoveryAction::AddFunds, RecoveryAction::SwitchMethod]
        }
        ErrorCategory::ValidationError => vec![RecoveryAction::TryAgainManually],
        ErrorCategory::TransientNetwork | ErrorCategory::AuthorizationTimeout => {
            if config.auto_recovery_enabled && attempt < config.max_auto_retries {
                vec![
                    RecoveryAction::RetryWithBackoff {
                        delay_ms: retry_delay(attempt + 1, config).as_millis() as u64,
                    },
                    RecoveryAction::WaitForBackend,
                ]
            } else {
                vec![RecoveryAction::WaitForBackend, RecoveryAction::TryAgainManually]
            }
        }
        ErrorCategory::ContractError => {
            vec![RecoveryAction::TryAgainManually, RecoveryAction::SwitchMethod]
        }
        ErrorCategory::ConfirmationTimeout => vec![RecoveryAction::TryAgainManually],
        ErrorCategory::UnknownError => vec![RecoveryAction::TryAgainManually, RecoveryAction::Abort],
    }
}

/// Exponential backoff delay for recovery attempt `attempt` (1-based), with
/// up to 25% additive jitter so parallel sessions do not retry in lockstep.
pub fn retry_delay(attempt: u32, config: &RecoveryConfig) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let base = config
        .initial_retry_delay
        .saturating_mul(2u32.saturating_pow(exp))
        .min(config.max_retry_delay);
    let jitter_cap = (base.as_millis() as u64 / 4).max(1);
    base + Duration::from_millis(cheap_nonce() % jitter_cap)
}

/// Nanos-derived nonce (not cryptographically secure).
fn cheap_nonce() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    nanos.wrapping_mul(1103515245).wrapping_add(12345)
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Pluggable error classifier.
///
/// The default implementation combines structured variant matching with
/// substring heuristics on provider-reported messages. Wallet providers with
/// known quirks can supply their own implementation.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &FlowError) -> ErrorCategory;
}

/// Best-effort string-matching classifier.
///
/// The substring lists are not exhaustive — providers word their errors
/// freely — which is why unmatched messages land in `UnknownError`.
#[derive(Debug, Default)]
pub struct StringMatchClassifier;

const REJECTION_MARKERS: &[&str] = &[
    "user rejected",
    "user denied",
    "rejected by user",
    "user cancelled",
    "user canceled",
    "request rejected",
];

const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "connection",
    "rate limit",
    "temporarily unavailable",
    "service unavailable",
    "502",
    "503",
    "econnreset",
    "fetch failed",
];

const FUNDS_MARKERS: &[&str] = &[
    "insufficient funds",
    "insufficient balance",
    "exceeds balance",
];

const CONTRACT_MARKERS: &[&str] = &[
    "revert",
    "execution reverted",
    "out of gas",
    "invalid opcode",
    "call exception",
];

/// Whether a provider-reported message looks like an explicit user rejection.
pub fn is_user_rejection(message: &str) -> bool {
    let lower = message.to_lowercase();
    REJECTION_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn contains_any(message: &str, markers: &[&str]) -> bool {
    let lower = message.to_lowercase();
    markers.iter().any(|marker| lower.contains(marker))
}

/// Classify a free-form provider message.
fn classify_message(message: &str) -> ErrorCategory {
    if is_user_rejection(message) {
        ErrorCategory::ValidationError
    } else if contains_any(message, FUNDS_MARKERS) {
        ErrorCategory::InsufficientFunds
    } else if contains_any(message, CONTRACT_MARKERS) {
        ErrorCategory::ContractError
    } else if contains_any(message, TRANSIENT_MARKERS) {
        ErrorCategory::TransientNetwork
    } else {
        ErrorCategory::UnknownError
    }
}

impl ErrorClassifier for StringMatchClassifier {
    fn classify(&self, error: &FlowError) -> ErrorCategory {
        match error {
            FlowError::NoAffordableMethod { .. } => ErrorCategory::InsufficientFunds,
            FlowError::MethodUnavailable { .. } => ErrorCategory::InsufficientFunds,
            FlowError::AttemptInProgress | FlowError::NothingToRetry => {
                ErrorCategory::UnknownError
            }
            FlowError::CancelledByUser => ErrorCategory::ValidationError,
            FlowError::BackendUnavailable { .. } => ErrorCategory::TransientNetwork,
            FlowError::AuthorizationTimedOut { .. } | FlowError::DeadlineExpired => {
                ErrorCategory::AuthorizationTimeout
            }
            FlowError::RetriesExhausted { last_error, .. } => {
                let lower = last_error.to_lowercase();
                if lower.contains("authorization not granted") || lower.contains("deadline") {
                    ErrorCategory::AuthorizationTimeout
                } else {
                    classify_message(last_error)
                }
            }
            FlowError::Wallet(WalletError::Rejected { .. }) => ErrorCategory::ValidationError,
            FlowError::Wallet(WalletError::BatchingUnsupported) => ErrorCategory::UnknownError,
            FlowError::Wallet(WalletError::Provider { message }) => classify_message(message),
            FlowError::ChainData(ChainDataError::Loading { .. }) => {
                ErrorCategory::TransientNetwork
            }
            FlowError::ChainData(ChainDataError::Read { retryable, .. }) => {
                if *retryable {
                    ErrorCategory::TransientNetwork
                } else {
                    ErrorCategory::UnknownError
                }
            }
            FlowError::ChainData(ChainDataError::PriceUnavailable { .. }) => {
                ErrorCategory::TransientNetwork
            }
            FlowError::Authorization(AuthorizationError::Request { retryable, .. }) => {
                if *retryable {
                    ErrorCategory::TransientNetwork
                } else {
                    ErrorCategory::UnknownError
                }
            }
            FlowError::Authorization(AuthorizationError::Denied { .. }) => {
                ErrorCategory::UnknownError
            }
            FlowError::Authorization(AuthorizationError::Malformed { .. }) => {
                ErrorCategory::UnknownError
            }
            FlowError::Submission(SubmissionError::Rejected) => ErrorCategory::ValidationError,
            FlowError::Submission(SubmissionError::Failed { message }) => {
                classify_message(message)
            }
            FlowError::Confirmation(ConfirmationError::Timeout { .. }) => {
                ErrorCategory::ConfirmationTimeout
            }
            FlowError::Confirmation(ConfirmationError::Reverted { .. }) => {
                ErrorCategory::ContractError
            }
            FlowError::Confirmation(ConfirmationError::Cancelled) => {
                ErrorCategory::ValidationError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(error: &FlowError) -> ErrorCategory {
        StringMatchClassifier.classify(error)
    }

    #[test]
    fn user_rejection_is_validation_error() {
        let error = FlowError::Wallet(WalletError::Provider {
            message: "MetaMask Tx Signature: User denied transaction signature.".to_string(),
        });
        assert_eq!(classify(&error), ErrorCategory::ValidationError);
    }

    #[test]
    fn revert_is_contract_error() {
        let error = FlowError::Submission(SubmissionError::Failed {
            message: "execution reverted: ContentAlreadyOwned()".to_string(),
        });
        assert_eq!(classify(&error), ErrorCategory::ContractError);
    }

    #[test]
    fn network_blip_is_transient() {
        let error = FlowError::Submission(SubmissionError::Failed {
            message: "connection reset by peer".to_string(),
        });
        assert_eq!(classify(&error), ErrorCategory::TransientNetwork);
    }

    #[test]
    fn unrecognized_messages_stay_unknown() {
        let error = FlowError::Submission(SubmissionError::Failed {
            message: "0xdeadbeef".to_string(),
        });
        assert_eq!(classify(&error), ErrorCategory::UnknownError);
    }

    #[test]
    fn funds_marker_beats_transient_marker() {
        // "insufficient funds for gas * price + value" also contains no
        // transient marker, but ordering matters for mixed messages.
        let error = FlowError::Wallet(WalletError::Provider {
            message: "insufficient funds for transfer (network: mainnet)".to_string(),
        });
        assert_eq!(classify(&error), ErrorCategory::InsufficientFunds);
    }

    #[test]
    fn actions_for_insufficient_funds_never_auto_retry() {
        let actions = recovery_actions(
            ErrorCategory::InsufficientFunds,
            0,
            &RecoveryConfig::default(),
        );
        assert_eq!(actions[0], RecoveryAction::AddFunds);
        assert!(!actions
            .iter()
            .any(|a| matches!(a, RecoveryAction::RetryWithBackoff { .. })));
    }

    #[test]
    fn transient_actions_respect_the_attempt_cap() {
        let config = RecoveryConfig::default();
        let below_cap = recovery_actions(ErrorCategory::TransientNetwork, 1, &config);
        assert!(matches!(
            below_cap[0],
            RecoveryAction::RetryWithBackoff { .. }
        ));

        let at_cap = recovery_actions(ErrorCategory::TransientNetwork, 3, &config);
        assert!(!at_cap
            .iter()
            .any(|a| matches!(a, RecoveryAction::RetryWithBackoff { .. })));
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        let config = RecoveryConfig {
            auto_recovery_enabled: true,
            max_auto_retries: 10,
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
        };
        let first = retry_delay(1, &config);
        let third = retry_delay(3, &config);
        let tenth = retry_delay(10, &config);
        assert!(first >= Duration::from_secs(1));
        assert!(third >= Duration::from_secs(4));
        // Cap plus at most 25% jitter.
        assert!(tenth <= Duration::from_millis(37_500));
    }
}
