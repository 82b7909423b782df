//! Payment methods and intents.
//!
//! A [`PaymentIntent`] describes exactly one purchase attempt. It is created
//! once, never mutated; a retry supersedes it with a fresh intent carrying a
//! bumped attempt counter.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// How a purchase is settled on chain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Pay directly in the settlement token (allowance already in place).
    StableDirect,
    /// Swap native tokens into the settlement token and pay, in one call
    /// co-signed by the backend.
    NativeSwap,
    /// Bundle the missing approval with the purchase behind one wallet
    /// confirmation.
    BatchedApprovePay,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::StableDirect => "stable_direct",
            PaymentMethod::NativeSwap => "native_swap",
            PaymentMethod::BatchedApprovePay => "batched_approve_pay",
        }
    }

    /// Whether this method needs a backend co-signature before submission.
    /// Only swap-based methods do; token payments go straight to the wallet.
    pub fn requires_authorization(&self) -> bool {
        matches!(self, PaymentMethod::NativeSwap)
    }

    /// Whether the quoted amount depends on an oracle price.
    pub fn is_swap_based(&self) -> bool {
        matches!(self, PaymentMethod::NativeSwap)
    }

    pub fn all() -> [PaymentMethod; 3] {
        [
            PaymentMethod::StableDirect,
            PaymentMethod::NativeSwap,
            PaymentMethod::BatchedApprovePay,
        ]
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "stable_direct" | "stable" => Ok(PaymentMethod::StableDirect),
            "native_swap" | "swap" => Ok(PaymentMethod::NativeSwap),
            "batched_approve_pay" | "batched" => Ok(PaymentMethod::BatchedApprovePay),
            _ => Err(format!("unsupported payment method: {}", value)),
        }
    }
}

/// Immutable description of one purchase attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentIntent {
    pub intent_id: String,
    pub content_id: String,
    pub payer_address: String,
    pub creator_address: String,
    pub method: PaymentMethod,
    /// Amount in the method's native unit; slippage-inclusive for swaps.
    pub amount: BigDecimal,
    pub max_slippage_bps: u32,
    /// Epoch seconds after which the intent must not be executed.
    pub deadline: i64,
    /// 1-based attempt counter; bumped on every superseding retry.
    pub attempt: u32,
}

impl PaymentIntent {
    pub fn is_expired(&self, now_epoch: i64) -> bool {
        now_epoch > self.deadline
    }
}

/// Derive a stable-length intent id from the intent fields plus a nonce.
pub fn generate_intent_id(
    content_id: &str,
    payer_address: &str,
    method: PaymentMethod,
    amount: &BigDecimal,
    attempt: u32,
) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();

    let raw = format!(
        "{}:{}:{}:{}:{}:{}:{}",
        content_id, payer_address, method, amount, attempt, timestamp, nonce
    );

    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}
