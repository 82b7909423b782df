//! Confirmation watcher.
//!
//! Follows a submitted transaction hash until the required confirmations are
//! observed, the chain reports a revert, the wall-clock budget lapses, or
//! the attempt is cancelled. A hash alone is never success: the chain may
//! still revert, or the transaction may have been dropped.

use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::chaindata::ReceiptSource;
use crate::config::ConfirmationConfig;
use crate::wallet::types::{ReceiptStatus, TransactionReceipt, TxHash};
use std::sync::Arc;

/// Terminal outcomes of a confirmation wait.
#[derive(Debug, Clone, Error)]
pub enum ConfirmationError {
    /// No receipt within the budget. The hash stays available for manual
    /// explorer lookup; the transaction may still confirm later.
    #[error("no receipt for {hash} within {timeout_secs}s")]
    Timeout { hash: TxHash, timeout_secs: u64 },

    /// The transaction was included and reverted.
    #[error("transaction {hash} reverted on chain")]
    Reverted { hash: TxHash },

    /// The owning attempt was cancelled or superseded; stop reporting.
    #[error("confirmation wait cancelled")]
    Cancelled,
}

impl ConfirmationError {
    pub fn user_message(&self) -> String {
        match self {
            ConfirmationError::Timeout { hash, .. } => format!(
                "The transaction was submitted but not yet confirmed. Track it with hash {}",
                hash
            ),
            ConfirmationError::Reverted { .. } => {
                "The transaction was rejected on chain. You were not charged".to_string()
            }
            ConfirmationError::Cancelled => "Confirmation tracking stopped".to_string(),
        }
    }
}

/// Polls a [`ReceiptSource`] until a terminal outcome.
pub struct ConfirmationWatcher {
    source: Arc<dyn ReceiptSource>,
    config: ConfirmationConfig,
}

impl ConfirmationWatcher {
    pub fn new(source: Arc<dyn ReceiptSource>, config: ConfirmationConfig) -> Self {
        Self { source, config }
    }

    /// Wait for `hash` to reach the configured confirmations.
    ///
    /// `cancel` is the attempt's cancellation signal; flipping it aborts the
    /// wait promptly without touching the broadcast transaction.
    pub async fn await_receipt(
        &self,
        hash: &TxHash,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<TransactionReceipt, ConfirmationError> {
        let deadline = Instant::now() + self.config.timeout;
        debug!(
            hash = %hash,
            required = self.config.required_confirmations,
            timeout_secs = self.config.timeout.as_secs(),
            "watching for confirmation"
        );

        loop {
            if *cancel.borrow() {
                return Err(ConfirmationError::Cancelled);
            }

            match self.source.receipt(hash).await {
                Ok(Some(receipt)) if receipt.status == ReceiptStatus::Reverted => {
                    warn!(hash = %hash, block = receipt.block_number, "transaction reverted");
                    return Err(ConfirmationError::Reverted { hash: hash.clone() });
                }
                Ok(Some(receipt))
                    if receipt.confirmations >= self.config.required_confirmations =>
                {
                    info!(
                        hash = %hash,
                        block = receipt.block_number,
                        confirmations = receipt.confirmations,
                        "transaction confirmed"
                    );
                    return Ok(receipt);
                }
                Ok(_) => {
                    // Not mined, or not enough confirmations yet.
                }
                Err(e) => {
                    // Lookup failures are treated as transient: keep polling
                    // until the deadline settles the question.
                    warn!(hash = %hash, error = %e, "receipt lookup failed");
                }
            }

            if Instant::now() >= deadline {
                return Err(ConfirmationError::Timeout {
                    hash: hash.clone(),
                    timeout_secs: self.config.timeout.as_secs(),
                });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let nap = self.config.poll_interval.min(remaining);
            tokio::select! {
                changed = cancel.changed() => {
                    // A dropped sender means the owning attempt is gone.
                    if changed.is_err() || *cancel.borrow() {
                        return Err(ConfirmationError::Cancelled);
                    }
                }
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }
}
