//! Unified error handling for the payment flow core.
//!
//! Every failure surfaced to the UI carries a coarse [`ErrorCategory`] so the
//! caller can decide between "offer retry", "ask the user to top up" and
//! "show a support link" without parsing message strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::authorizer::AuthorizationError;
use crate::chaindata::ChainDataError;
use crate::services::confirmation::ConfirmationError;
use crate::services::submission::SubmissionError;
use crate::wallet::provider::WalletError;

/// Coarse failure taxonomy exposed through `PaymentResult`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Payer cannot afford any viable method.
    InsufficientFunds,
    /// User-initiated cancellation (wallet rejection, explicit cancel).
    ValidationError,
    /// RPC or backend hiccup; safe to retry automatically.
    TransientNetwork,
    /// On-chain revert or malformed call; manual retry only.
    ContractError,
    /// Backend authorization never arrived within the polling budget.
    AuthorizationTimeout,
    /// Transaction submitted but no receipt within the timeout.
    ConfirmationTimeout,
    /// Catch-all; never silently dropped, never auto-retried.
    UnknownError,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::InsufficientFunds => "insufficient_funds",
            ErrorCategory::ValidationError => "validation_error",
            ErrorCategory::TransientNetwork => "transient_network",
            ErrorCategory::ContractError => "contract_error",
            ErrorCategory::AuthorizationTimeout => "authorization_timeout",
            ErrorCategory::ConfirmationTimeout => "confirmation_timeout",
            ErrorCategory::UnknownError => "unknown_error",
        }
    }

    /// Whether the orchestrator may retry this category on its own.
    pub fn is_auto_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::TransientNetwork | ErrorCategory::AuthorizationTimeout
        )
    }

    /// Whether this category represents a user decision rather than a fault.
    pub fn is_user_cancel(&self) -> bool {
        matches!(self, ErrorCategory::ValidationError)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors produced by the payment flow core.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    #[error("no affordable payment method for content {content_id}")]
    NoAffordableMethod { content_id: String },

    #[error("payment method {method} is not currently usable: {reason}")]
    MethodUnavailable { method: String, reason: String },

    #[error("another payment attempt is still in flight")]
    AttemptInProgress,

    #[error("no previous attempt to retry")]
    NothingToRetry,

    #[error("payment cancelled by the user")]
    CancelledByUser,

    #[error("authorization service unavailable: {reason}")]
    BackendUnavailable { reason: String },

    #[error("authorization not granted after {polls} poll(s)")]
    AuthorizationTimedOut { polls: u32 },

    #[error("intent deadline passed before authorization arrived")]
    DeadlineExpired,

    #[error("recovery attempts exhausted after {attempts} attempt(s): {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    ChainData(#[from] ChainDataError),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),
}

impl FlowError {
    /// User-facing message. Cancellations are worded as decisions, timeouts
    /// as "still unknown", hard failures as failures.
    pub fn user_message(&self) -> String {
        match self {
            FlowError::NoAffordableMethod { .. } => {
                "No payment method currently covers this purchase. Add funds and try again"
                    .to_string()
            }
            FlowError::MethodUnavailable { method, reason } => {
                format!("The {} payment method is unavailable: {}", method, reason)
            }
            FlowError::AttemptInProgress => {
                "A payment is already in progress. Wait for it to finish or cancel it".to_string()
            }
            FlowError::NothingToRetry => "There is no previous payment to retry".to_string(),
            FlowError::CancelledByUser => {
                "Payment cancelled. You have not been charged".to_string()
            }
            FlowError::BackendUnavailable { .. } => {
                "The payment service is temporarily unavailable. Please try again shortly"
                    .to_string()
            }
            FlowError::AuthorizationTimedOut { .. } | FlowError::DeadlineExpired => {
                "The payment service did not respond in time. No charge was made".to_string()
            }
            FlowError::RetriesExhausted { .. } => {
                "The payment could not be completed after several attempts".to_string()
            }
            FlowError::Wallet(e) => e.user_message(),
            FlowError::ChainData(_) => {
                "Could not read current balances. Check your connection and try again".to_string()
            }
            FlowError::Authorization(e) => e.user_message(),
            FlowError::Submission(e) => e.user_message(),
            FlowError::Confirmation(e) => e.user_message(),
        }
    }
}

/// Result type for flow operations.
pub type FlowResult<T> = Result<T, FlowError>;
