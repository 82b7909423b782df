//! Wire-level types exchanged with the wallet provider and chain data layer.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transaction hash newtype; opaque to this crate beyond display and lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TxHash(pub String);

impl TxHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TxHash {
    fn from(value: &str) -> Self {
        TxHash(value.to_string())
    }
}

/// Typed call payload; the wallet adapter owns the actual ABI encoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CallInput {
    /// Direct purchase paid in the settlement token.
    Purchase {
        content_id: String,
        amount: BigDecimal,
    },
    /// Token approval for the marketplace spender.
    Approve {
        spender: String,
        amount: BigDecimal,
    },
    /// Swap native tokens and purchase in one call, carrying the backend
    /// co-signature over the quoted amounts.
    SwapPurchase {
        content_id: String,
        max_amount_in: BigDecimal,
        authorization: String,
    },
}

/// One call for the wallet to sign and send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletCall {
    /// Contract receiving the call.
    pub target: String,
    /// Native value attached to the call (zero for token methods).
    pub value: BigDecimal,
    pub input: CallInput,
}

impl WalletCall {
    pub fn to_contract(target: impl Into<String>, input: CallInput) -> Self {
        Self {
            target: target.into(),
            value: BigDecimal::from(0),
            input,
        }
    }

    pub fn with_value(mut self, value: BigDecimal) -> Self {
        self.value = value;
        self
    }
}

/// Terminal status reported in a receipt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// On-chain receipt observed by the confirmation watcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionReceipt {
    pub hash: TxHash,
    pub status: ReceiptStatus,
    pub block_number: u64,
    pub confirmations: u32,
    pub observed_at: DateTime<Utc>,
}
