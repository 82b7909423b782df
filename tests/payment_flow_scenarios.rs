//! End-to-end payment flow scenarios against scripted collaborators.
//!
//! Covers the happy path, wallet rejection, transient backend recovery,
//! confirmation timeout, and the content-fetch circuit breaker.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use payflow::backend::authorizer::{
    AuthorizationClient, AuthorizationError, AuthorizationOutcome, AuthorizationResult,
};
use payflow::chaindata::{
    ChainDataError, ChainDataResult, ChainDataSource, ContentPricing, ReceiptSource,
};
use payflow::config::FlowConfig;
use payflow::error::{ErrorCategory, FlowError};
use payflow::health::BackendHealthMonitor;
use payflow::intent::{PaymentIntent, PaymentMethod};
use payflow::services::flow_orchestrator::{
    FlowCallbacks, FlowPhase, PaymentFlowOrchestrator, PaymentRequest, PaymentResult,
    TxStatusKind,
};
use payflow::wallet::provider::{WalletError, WalletProvider, WalletResult};
use payflow::wallet::types::{ReceiptStatus, TransactionReceipt, TxHash, WalletCall};
use payflow::BreakerRegistry;

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

struct ScriptedWallet {
    rejection_message: Option<String>,
    batching: bool,
    submissions: AtomicU32,
}

impl ScriptedWallet {
    fn accepting() -> Self {
        Self {
            rejection_message: None,
            batching: true,
            submissions: AtomicU32::new(0),
        }
    }

    fn rejecting(message: &str) -> Self {
        Self {
            rejection_message: Some(message.to_string()),
            batching: true,
            submissions: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl WalletProvider for ScriptedWallet {
    async fn sign_and_send(&self, _call: WalletCall) -> WalletResult<TxHash> {
        if let Some(message) = &self.rejection_message {
            return Err(WalletError::Provider {
                message: message.clone(),
            });
        }
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TxHash(format!("0xhash{:04}", n)))
    }

    async fn sign_and_send_batch(&self, _calls: Vec<WalletCall>) -> WalletResult<TxHash> {
        self.sign_and_send(WalletCall::to_contract(
            "0x0",
            payflow::wallet::types::CallInput::Purchase {
                content_id: "batch".to_string(),
                amount: BigDecimal::from(0),
            },
        ))
        .await
    }

    fn supports_batching(&self) -> bool {
        self.batching
    }

    fn payer_address(&self) -> String {
        "0xpayer00000000000000000000000000000000babe".to_string()
    }
}

struct ScriptedChainData {
    stable_balance: BigDecimal,
    stable_allowance: BigDecimal,
    native_balance: BigDecimal,
    native_price: Option<BigDecimal>,
    content_price: BigDecimal,
    content_fetch_fails: bool,
    content_calls: AtomicU32,
}

impl ScriptedChainData {
    fn funded_and_approved() -> Self {
        Self {
            stable_balance: BigDecimal::from(500),
            stable_allowance: BigDecimal::from(500),
            native_balance: BigDecimal::from(0),
            native_price: None,
            content_price: BigDecimal::from(100),
            content_fetch_fails: false,
            content_calls: AtomicU32::new(0),
        }
    }

    fn native_only() -> Self {
        Self {
            stable_balance: BigDecimal::from(0),
            stable_allowance: BigDecimal::from(0),
            native_balance: BigDecimal::from(1_000),
            native_price: Some(BigDecimal::from(2)),
            content_price: BigDecimal::from(100),
            content_fetch_fails: false,
            content_calls: AtomicU32::new(0),
        }
    }

    fn unreachable_content() -> Self {
        Self {
            content_fetch_fails: true,
            ..Self::funded_and_approved()
        }
    }
}

#[async_trait]
impl ChainDataSource for ScriptedChainData {
    async fn stable_balance(&self, _address: &str) -> ChainDataResult<BigDecimal> {
        Ok(self.stable_balance.clone())
    }

    async fn native_balance(&self, _address: &str) -> ChainDataResult<BigDecimal> {
        Ok(self.native_balance.clone())
    }

    async fn stable_allowance(&self, _owner: &str, _spender: &str) -> ChainDataResult<BigDecimal> {
        Ok(self.stable_allowance.clone())
    }

    async fn native_price_in_stable(&self) -> ChainDataResult<BigDecimal> {
        self.native_price
            .clone()
            .ok_or_else(|| ChainDataError::PriceUnavailable {
                reason: "oracle offline".to_string(),
            })
    }

    async fn content_pricing(&self, content_id: &str) -> ChainDataResult<ContentPricing> {
        self.content_calls.fetch_add(1, Ordering::SeqCst);
        if self.content_fetch_fails {
            return Err(ChainDataError::Read {
                message: "rpc connection refused".to_string(),
                retryable: true,
            });
        }
        Ok(ContentPricing {
            content_id: content_id.to_string(),
            creator_address: "0xcreator".to_string(),
            price: self.content_price.clone(),
        })
    }
}

struct ScriptedAuthorizer {
    transient_failures: u32,
    always_pending: bool,
    calls: AtomicU32,
}

impl ScriptedAuthorizer {
    fn granting() -> Self {
        Self {
            transient_failures: 0,
            always_pending: false,
            calls: AtomicU32::new(0),
        }
    }

    fn flaky(transient_failures: u32) -> Self {
        Self {
            transient_failures,
            always_pending: false,
            calls: AtomicU32::new(0),
        }
    }

    fn stalling() -> Self {
        Self {
            transient_failures: 0,
            always_pending: true,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl AuthorizationClient for ScriptedAuthorizer {
    async fn authorize(
        &self,
        intent: &PaymentIntent,
    ) -> AuthorizationResult<AuthorizationOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_pending {
            return Ok(AuthorizationOutcome::Pending);
        }
        if call < self.transient_failures {
            return Err(AuthorizationError::Request {
                message: "upstream timeout while co-signing".to_string(),
                retryable: true,
            });
        }
        Ok(AuthorizationOutcome::Granted {
            signature: format!("0xsig-{}", intent.intent_id),
        })
    }
}

enum ReceiptScript {
    Confirm,
    Never,
    Revert,
}

struct ScriptedReceipts {
    script: ReceiptScript,
}

#[async_trait]
impl ReceiptSource for ScriptedReceipts {
    async fn receipt(&self, hash: &TxHash) -> ChainDataResult<Option<TransactionReceipt>> {
        match self.script {
            ReceiptScript::Never => Ok(None),
            ReceiptScript::Confirm => Ok(Some(TransactionReceipt {
                hash: hash.clone(),
                status: ReceiptStatus::Success,
                block_number: 7_777,
                confirmations: 1,
                observed_at: Utc::now(),
            })),
            ReceiptScript::Revert => Ok(Some(TransactionReceipt {
                hash: hash.clone(),
                status: ReceiptStatus::Reverted,
                block_number: 7_777,
                confirmations: 1,
                observed_at: Utc::now(),
            })),
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn fast_config() -> FlowConfig {
    let mut config = FlowConfig::default();
    config.signing.initial_delay = Duration::from_millis(5);
    config.signing.max_delay = Duration::from_millis(20);
    config.recovery.initial_retry_delay = Duration::from_millis(5);
    config.recovery.max_retry_delay = Duration::from_millis(20);
    config.confirmation.timeout = Duration::from_millis(200);
    config.confirmation.poll_interval = Duration::from_millis(5);
    config
}

struct Harness {
    orchestrator: Arc<PaymentFlowOrchestrator>,
    chain_data: Arc<ScriptedChainData>,
    completed: Arc<Mutex<Vec<PaymentResult>>>,
    recoveries: Arc<Mutex<Vec<(u32, ErrorCategory)>>>,
}

fn harness(
    wallet: ScriptedWallet,
    chain_data: ScriptedChainData,
    authorizer: ScriptedAuthorizer,
    receipts: ReceiptScript,
    config: FlowConfig,
) -> Harness {
    let chain_data = Arc::new(chain_data);
    let completed = Arc::new(Mutex::new(Vec::new()));
    let recoveries = Arc::new(Mutex::new(Vec::new()));

    let completed_hook = completed.clone();
    let recovery_hook = recoveries.clone();
    let callbacks = FlowCallbacks::new()
        .on_payment_completed(move |result: &PaymentResult| {
            completed_hook.lock().unwrap().push(result.clone());
        })
        .on_recovery_attempt(move |attempt, category| {
            recovery_hook.lock().unwrap().push((attempt, category));
        });

    let orchestrator = PaymentFlowOrchestrator::new(
        Arc::new(wallet),
        chain_data.clone(),
        Arc::new(ScriptedReceipts { script: receipts }),
        Arc::new(authorizer),
        Arc::new(BackendHealthMonitor::new(config.health.clone())),
        Arc::new(BreakerRegistry::new(config.breaker.clone())),
        config,
        callbacks,
    );

    Harness {
        orchestrator: Arc::new(orchestrator),
        chain_data,
        completed,
        recoveries,
    }
}

fn request(content_id: &str, method: Option<PaymentMethod>) -> PaymentRequest {
    PaymentRequest {
        content_id: content_id.to_string(),
        method,
    }
}

fn visited_phases(result: &PaymentResult) -> Vec<String> {
    result
        .phase_durations
        .iter()
        .map(|d| d.phase.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Scenario A: healthy direct payment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_a_direct_payment_completes() {
    let h = harness(
        ScriptedWallet::accepting(),
        ScriptedChainData::funded_and_approved(),
        ScriptedAuthorizer::granting(),
        ReceiptScript::Confirm,
        fast_config(),
    );

    let result = h
        .orchestrator
        .execute_payment(request("content-1", None))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.method, Some(PaymentMethod::StableDirect));
    assert!(result.tx_hash.is_some());
    assert_eq!(result.error_category, None);
    assert_eq!(result.recovery_attempts, 0);

    // Phase sequence: no authorization wait for the direct method.
    let phases = visited_phases(&result);
    assert_eq!(
        phases,
        vec![
            "initializing".to_string(),
            "creating_intent".to_string(),
            "executing_payment".to_string(),
            "confirming".to_string(),
        ]
    );

    let state = h.orchestrator.current_state();
    assert_eq!(state.phase, FlowPhase::Completed);
    assert_eq!(state.progress, 100);
    assert!(state.payment_progress.intent_created);
    assert!(!state.payment_progress.authorization_received);
    assert!(state.payment_progress.payment_executed);
    assert!(state.payment_progress.payment_confirmed);

    let status = h.orchestrator.transaction_status();
    assert_eq!(status.status, Some(TxStatusKind::Confirmed));
    assert!(status.receipt.is_some());
    assert!(status.confirmed_at.is_some());

    // Completion hook fired exactly once and carries the same hash.
    let completed = h.completed.lock().unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].tx_hash, result.tx_hash);
}

// ---------------------------------------------------------------------------
// Scenario B: wallet rejection is a cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_b_wallet_rejection_cancels() {
    let h = harness(
        ScriptedWallet::rejecting("MetaMask Tx Signature: User denied transaction signature."),
        ScriptedChainData::funded_and_approved(),
        ScriptedAuthorizer::granting(),
        ReceiptScript::Confirm,
        fast_config(),
    );

    let result = h
        .orchestrator
        .execute_payment(request("content-1", None))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error_category, Some(ErrorCategory::ValidationError));
    assert!(result.tx_hash.is_none());

    let state = h.orchestrator.current_state();
    assert_eq!(state.phase, FlowPhase::Cancelled);

    let status = h.orchestrator.transaction_status();
    assert!(status.hash.is_none());
    assert_eq!(status.status, Some(TxStatusKind::Cancelled));
}

// ---------------------------------------------------------------------------
// Scenario C: transient backend faults recover below the cap
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_c_transient_authorization_faults_recover() {
    let h = harness(
        ScriptedWallet::accepting(),
        ScriptedChainData::native_only(),
        ScriptedAuthorizer::flaky(2),
        ReceiptScript::Confirm,
        fast_config(),
    );

    let result = h
        .orchestrator
        .execute_payment(request("content-1", Some(PaymentMethod::NativeSwap)))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.method, Some(PaymentMethod::NativeSwap));
    assert_eq!(result.recovery_attempts, 2);
    assert!(result.signature.is_some());

    let state = h.orchestrator.current_state();
    assert_eq!(state.phase, FlowPhase::Completed);
    assert_eq!(state.recovery.recovery_attempt, 2);
    assert!(!state.recovery.is_recovering);

    // Hook saw both recoveries, in order, tagged transient.
    let recoveries = h.recoveries.lock().unwrap();
    assert_eq!(
        *recoveries,
        vec![
            (1, ErrorCategory::TransientNetwork),
            (2, ErrorCategory::TransientNetwork),
        ]
    );

    // The recovering phase showed up in telemetry.
    assert!(visited_phases(&result).contains(&"recovering".to_string()));
}

// ---------------------------------------------------------------------------
// Scenario D: no receipt within the timeout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_d_confirmation_timeout_fails_with_hash_retained() {
    let h = harness(
        ScriptedWallet::accepting(),
        ScriptedChainData::funded_and_approved(),
        ScriptedAuthorizer::granting(),
        ReceiptScript::Never,
        fast_config(),
    );

    let result = h
        .orchestrator
        .execute_payment(request("content-1", None))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(
        result.error_category,
        Some(ErrorCategory::ConfirmationTimeout)
    );
    // The hash is known; only confirmation is missing.
    assert!(result.tx_hash.is_some());

    let state = h.orchestrator.current_state();
    assert_eq!(state.phase, FlowPhase::Failed);

    let status = h.orchestrator.transaction_status();
    assert_eq!(status.hash, result.tx_hash);
    assert_eq!(status.status, Some(TxStatusKind::Failed));
    assert!(status.error.is_some());
    assert!(status.receipt.is_none());
}

// ---------------------------------------------------------------------------
// Scenario E: content-fetch circuit breaker short-circuits
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_e_content_fetch_breaker_short_circuits() {
    let mut config = fast_config();
    // One fetch per attempt so the breaker counts attempts, not retries.
    config.recovery.auto_recovery_enabled = false;
    let h = harness(
        ScriptedWallet::accepting(),
        ScriptedChainData::unreachable_content(),
        ScriptedAuthorizer::granting(),
        ReceiptScript::Confirm,
        config,
    );

    for _ in 0..3 {
        let result = h
            .orchestrator
            .execute_payment(request("content-1", None))
            .await
            .unwrap();
        assert!(!result.success);
    }
    assert_eq!(h.chain_data.content_calls.load(Ordering::SeqCst), 3);

    // Fourth attempt is short-circuited without touching the network.
    let result = h
        .orchestrator
        .execute_payment(request("content-1", None))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(h.chain_data.content_calls.load(Ordering::SeqCst), 3);
}

// ---------------------------------------------------------------------------
// Chain revert fails as a contract error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn on_chain_revert_is_a_contract_error() {
    let h = harness(
        ScriptedWallet::accepting(),
        ScriptedChainData::funded_and_approved(),
        ScriptedAuthorizer::granting(),
        ReceiptScript::Revert,
        fast_config(),
    );

    let result = h
        .orchestrator
        .execute_payment(request("content-1", None))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error_category, Some(ErrorCategory::ContractError));
    assert_eq!(h.orchestrator.current_state().phase, FlowPhase::Failed);
}

// ---------------------------------------------------------------------------
// Single active attempt, cancellation, stale-result hygiene
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_execute_is_rejected_and_cancel_aborts_the_wait() {
    let h = harness(
        ScriptedWallet::accepting(),
        ScriptedChainData::native_only(),
        ScriptedAuthorizer::stalling(),
        ReceiptScript::Confirm,
        fast_config(),
    );

    let orchestrator = h.orchestrator.clone();
    let running = tokio::spawn(async move {
        orchestrator
            .execute_payment(request("content-1", Some(PaymentMethod::NativeSwap)))
            .await
    });

    // Give the first attempt time to reach the authorization wait.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!h.orchestrator.can_start_payment(PaymentMethod::StableDirect));
    let second = h
        .orchestrator
        .execute_payment(request("content-2", None))
        .await;
    assert!(matches!(second, Err(FlowError::AttemptInProgress)));

    h.orchestrator.cancel_payment();
    let result = running.await.unwrap().unwrap();

    assert!(!result.success);
    assert_eq!(result.error_category, Some(ErrorCategory::ValidationError));
    assert!(result.tx_hash.is_none());
    assert_eq!(h.orchestrator.current_state().phase, FlowPhase::Cancelled);

    // The slot is free again once the attempt is terminal.
    assert!(h.orchestrator.can_start_payment(PaymentMethod::StableDirect));
}

#[tokio::test]
async fn retry_supersedes_with_a_fresh_attempt() {
    let h = harness(
        ScriptedWallet::accepting(),
        ScriptedChainData::funded_and_approved(),
        ScriptedAuthorizer::granting(),
        ReceiptScript::Never,
        fast_config(),
    );

    let first = h
        .orchestrator
        .execute_payment(request("content-1", None))
        .await
        .unwrap();
    assert!(!first.success);

    let second = h.orchestrator.retry_payment().await.unwrap();
    assert!(!second.success);

    // Superseded, not merged: the retry carries its own intent and hash.
    assert_ne!(first.intent_id, second.intent_id);
    assert_ne!(first.tx_hash, second.tx_hash);
    assert_eq!(h.completed.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn progress_is_monotone_within_an_attempt() {
    let h = harness(
        ScriptedWallet::accepting(),
        ScriptedChainData::native_only(),
        ScriptedAuthorizer::flaky(1),
        ReceiptScript::Confirm,
        fast_config(),
    );

    let mut states = h.orchestrator.state();
    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    let watcher = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow().clone();
            sink.lock().unwrap().push(state.progress);
            if state.phase.is_terminal() {
                break;
            }
        }
    });

    let result = h
        .orchestrator
        .execute_payment(request("content-1", Some(PaymentMethod::NativeSwap)))
        .await
        .unwrap();
    assert!(result.success);
    watcher.await.unwrap();

    let observed = observed.lock().unwrap();
    assert!(!observed.is_empty());
    for pair in observed.windows(2) {
        assert!(pair[0] <= pair[1], "progress regressed: {:?}", *observed);
    }
    assert_eq!(*observed.last().unwrap(), 100);
}
