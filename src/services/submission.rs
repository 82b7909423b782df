//! Transaction submission adapter.
//!
//! Wraps the single-call and batched approve+purchase paths behind one
//! interface so the orchestrator's state machine never branches on "is
//! batching supported". Provider-specific rejection semantics are normalized
//! here: an explicit user rejection becomes [`SubmissionError::Rejected`],
//! everything else stays a message for the classifier.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::recovery::is_user_rejection;
use crate::wallet::provider::{WalletError, WalletProvider};
use crate::wallet::types::{TxHash, WalletCall};

pub type SubmissionResult<T> = Result<T, SubmissionError>;

/// Normalized submission outcome errors.
#[derive(Debug, Clone, Error)]
pub enum SubmissionError {
    /// The user declined in the wallet. Maps to a cancelled flow, never a
    /// failed one.
    #[error("user rejected the transaction in the wallet")]
    Rejected,

    /// Any other submission failure; the message feeds the classifier.
    #[error("transaction submission failed: {message}")]
    Failed { message: String },
}

impl SubmissionError {
    pub fn user_message(&self) -> String {
        match self {
            SubmissionError::Rejected => "Transaction cancelled in the wallet".to_string(),
            SubmissionError::Failed { .. } => {
                "The transaction could not be submitted".to_string()
            }
        }
    }
}

/// The calls making up one submission, in execution order.
#[derive(Debug, Clone)]
pub struct SubmissionPlan {
    pub calls: Vec<WalletCall>,
}

impl SubmissionPlan {
    pub fn single(call: WalletCall) -> Self {
        Self { calls: vec![call] }
    }

    pub fn approve_then_purchase(approve: WalletCall, purchase: WalletCall) -> Self {
        Self {
            calls: vec![approve, purchase],
        }
    }
}

/// One submission interface over both wallet shapes.
#[async_trait]
pub trait SubmissionAdapter: Send + Sync {
    /// Submit the plan; the returned hash is the transaction the
    /// confirmation watcher should follow (the purchase, for multi-call
    /// plans).
    async fn submit(&self, plan: SubmissionPlan) -> SubmissionResult<TxHash>;
}

/// Pick the adapter matching the wallet's capabilities.
pub fn adapter_for(wallet: Arc<dyn WalletProvider>) -> Arc<dyn SubmissionAdapter> {
    if wallet.supports_batching() {
        Arc::new(BatchedSubmitter { wallet })
    } else {
        Arc::new(SequentialSubmitter { wallet })
    }
}

fn normalize(error: WalletError) -> SubmissionError {
    match error {
        WalletError::Rejected { .. } => SubmissionError::Rejected,
        WalletError::Provider { message } => {
            // Providers that cannot tag rejections natively still word them
            // recognizably; this matching is best-effort, not exhaustive.
            if is_user_rejection(&message) {
                SubmissionError::Rejected
            } else {
                SubmissionError::Failed { message }
            }
        }
        WalletError::BatchingUnsupported => SubmissionError::Failed {
            message: "wallet refused a batched call it advertised".to_string(),
        },
    }
}

/// Submits each call in order; used when the wallet cannot batch.
pub struct SequentialSubmitter {
    wallet: Arc<dyn WalletProvider>,
}

#[async_trait]
impl SubmissionAdapter for SequentialSubmitter {
    async fn submit(&self, plan: SubmissionPlan) -> SubmissionResult<TxHash> {
        let total = plan.calls.len();
        let mut last_hash: Option<TxHash> = None;

        for (index, call) in plan.calls.into_iter().enumerate() {
            match self.wallet.sign_and_send(call).await {
                Ok(hash) => {
                    info!(call = index + 1, total, hash = %hash, "call submitted");
                    last_hash = Some(hash);
                }
                Err(e) => {
                    warn!(call = index + 1, total, error = %e, "call submission failed");
                    return Err(normalize(e));
                }
            }
        }

        last_hash.ok_or_else(|| SubmissionError::Failed {
            message: "submission plan contained no calls".to_string(),
        })
    }
}

/// Bundles multi-call plans behind one wallet confirmation.
pub struct BatchedSubmitter {
    wallet: Arc<dyn WalletProvider>,
}

#[async_trait]
impl SubmissionAdapter for BatchedSubmitter {
    async fn submit(&self, plan: SubmissionPlan) -> SubmissionResult<TxHash> {
        if plan.calls.is_empty() {
            return Err(SubmissionError::Failed {
                message: "submission plan contained no calls".to_string(),
            });
        }

        let result = if plan.calls.len() == 1 {
            let call = plan.calls.into_iter().next().expect("length checked");
            self.wallet.sign_and_send(call).await
        } else {
            self.wallet.sign_and_send_batch(plan.calls).await
        };

        match result {
            Ok(hash) => {
                info!(hash = %hash, "batch submitted");
                Ok(hash)
            }
            Err(e) => {
                warn!(error = %e, "batch submission failed");
                Err(normalize(e))
            }
        }
    }
}
