//! Payment execution orchestrator for on-chain content purchases.
//!
//! Drives a multi-step, multi-method payment from user intent through
//! on-chain confirmation while tolerating an unreliable backend signing
//! service, flaky RPC connectivity, and unpredictable user behavior. All
//! state is in-memory and client-side; the crate gives the UI strong
//! guarantees — no double charges, no success without an observed receipt,
//! bounded retries, and graceful degradation when the backend is distressed.
//!
//! The UI binds to [`PaymentFlowOrchestrator`]; wallet, chain data,
//! authorization and receipt lookups are injected behind traits.

pub mod backend;
pub mod breaker;
pub mod chaindata;
pub mod config;
pub mod error;
pub mod health;
pub mod intent;
pub mod logging;
pub mod recovery;
pub mod services;
pub mod wallet;

pub use crate::backend::{
    AuthorizationClient, AuthorizationError, AuthorizationOutcome, HttpAuthorizationClient,
    HttpAuthorizerConfig,
};
pub use crate::breaker::{BreakerRegistry, CircuitBreaker, CircuitBreakerState};
pub use crate::chaindata::{ChainDataError, ChainDataSource, ContentPricing, ReceiptSource};
pub use crate::config::FlowConfig;
pub use crate::error::{ErrorCategory, FlowError, FlowResult};
pub use crate::health::{BackendHealthMonitor, HealthTier, SystemHealth};
pub use crate::intent::{PaymentIntent, PaymentMethod};
pub use crate::recovery::{ErrorClassifier, RecoveryAction, StringMatchClassifier};
pub use crate::services::{
    FlowCallbacks, FlowPhase, FlowState, PaymentFlowOrchestrator, PaymentRequest, PaymentResult,
    TransactionStatus, TxStatusKind,
};
pub use crate::wallet::{
    CallInput, ReceiptStatus, TransactionReceipt, TxHash, WalletCall, WalletError, WalletProvider,
};
