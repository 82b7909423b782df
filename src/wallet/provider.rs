//! Wallet provider trait and errors.

use async_trait::async_trait;
use thiserror::Error;

use crate::wallet::types::{TxHash, WalletCall};

pub type WalletResult<T> = Result<T, WalletError>;

/// Errors surfaced by a wallet provider.
///
/// Providers that can natively distinguish a user rejection should return
/// `Rejected`; those that cannot return `Provider` and the submission
/// adapter applies best-effort string classification on the message.
#[derive(Debug, Clone, Error)]
pub enum WalletError {
    #[error("user rejected the signature request: {message}")]
    Rejected { message: String },

    #[error("wallet provider error: {message}")]
    Provider { message: String },

    #[error("wallet does not support batched calls")]
    BatchingUnsupported,
}

impl WalletError {
    pub fn user_message(&self) -> String {
        match self {
            WalletError::Rejected { .. } => "Transaction cancelled in the wallet".to_string(),
            WalletError::Provider { .. } => {
                "The wallet could not submit the transaction".to_string()
            }
            WalletError::BatchingUnsupported => {
                "This wallet cannot bundle approval and purchase".to_string()
            }
        }
    }
}

/// Signing and submission boundary.
///
/// Implementations wrap a browser-injected or embedded wallet. All calls are
/// non-blocking; a returned hash means the transaction was broadcast, not
/// that it succeeded.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Sign and broadcast a single call.
    async fn sign_and_send(&self, call: WalletCall) -> WalletResult<TxHash>;

    /// Sign and broadcast a bundle behind one wallet confirmation.
    ///
    /// Only meaningful when [`supports_batching`](Self::supports_batching)
    /// is true; other providers return `BatchingUnsupported`.
    async fn sign_and_send_batch(&self, calls: Vec<WalletCall>) -> WalletResult<TxHash>;

    /// Capability detection for the submission-adapter choice.
    fn supports_batching(&self) -> bool;

    /// The account this wallet signs for.
    fn payer_address(&self) -> String;
}
