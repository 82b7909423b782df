//! Read-only chain-data seam: balances, allowances, prices, receipts.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wallet::types::{TransactionReceipt, TxHash};

pub type ChainDataResult<T> = Result<T, ChainDataError>;

/// Errors from the read-only chain data layer.
#[derive(Debug, Clone, Error)]
pub enum ChainDataError {
    /// The value exists but has not loaded yet.
    #[error("chain data still loading: {what}")]
    Loading { what: String },

    /// The read itself failed.
    #[error("chain read failed: {message}")]
    Read { message: String, retryable: bool },

    /// No usable oracle quote.
    #[error("oracle price unavailable: {reason}")]
    PriceUnavailable { reason: String },
}

/// Pricing record for one content item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentPricing {
    pub content_id: String,
    pub creator_address: String,
    /// Price denominated in the platform's settlement token.
    pub price: BigDecimal,
}

/// Read-only chain data: balances, allowances, oracle prices, content
/// metadata. Each call returns a value or an explicit loading/error state.
#[async_trait]
pub trait ChainDataSource: Send + Sync {
    /// Settlement-token balance of `address`.
    async fn stable_balance(&self, address: &str) -> ChainDataResult<BigDecimal>;

    /// Native-token balance of `address`.
    async fn native_balance(&self, address: &str) -> ChainDataResult<BigDecimal>;

    /// Settlement-token allowance granted by `owner` to `spender`.
    async fn stable_allowance(&self, owner: &str, spender: &str) -> ChainDataResult<BigDecimal>;

    /// Oracle price of one native token denominated in the settlement token.
    async fn native_price_in_stable(&self) -> ChainDataResult<BigDecimal>;

    /// Price and creator for a content item.
    async fn content_pricing(&self, content_id: &str) -> ChainDataResult<ContentPricing>;
}

/// Receipt lookups for the confirmation watcher.
///
/// `Ok(None)` means the transaction is not yet mined (or the node has not
/// seen it); the watcher keeps polling until its own deadline.
#[async_trait]
pub trait ReceiptSource: Send + Sync {
    async fn receipt(&self, hash: &TxHash) -> ChainDataResult<Option<TransactionReceipt>>;
}
