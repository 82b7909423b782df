//! Payment Flow Orchestrator
//!
//! The spine of the crate: owns the phase state machine, sequences the
//! resolver, authorization wait, submission adapter and confirmation
//! watcher, accumulates per-phase telemetry, and exposes the single public
//! contract the UI binds to.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::authorizer::{AuthorizationClient, AuthorizationOutcome};
use crate::breaker::{names, BreakerRegistry};
use crate::chaindata::{ChainDataError, ChainDataSource, ContentPricing, ReceiptSource};
use crate::config::FlowConfig;
use crate::error::{ErrorCategory, FlowError, FlowResult};
use crate::health::{BackendHealthMonitor, HealthTier, SystemHealth};
use crate::intent::{generate_intent_id, PaymentIntent, PaymentMethod};
use crate::logging::mask_address;
use crate::recovery::{
    recovery_actions, retry_delay, ErrorClassifier, RecoveryAction, StringMatchClassifier,
};
use crate::services::confirmation::ConfirmationWatcher;
use crate::services::method_resolver::{
    BalanceSnapshot, MethodAvailability, MethodResolver, TokenAffordability,
};
use crate::services::submission::{adapter_for, SubmissionAdapter, SubmissionPlan};
use crate::wallet::provider::WalletProvider;
use crate::wallet::types::{CallInput, TransactionReceipt, TxHash, WalletCall};

// ============================================================================
// Phase State Machine
// ============================================================================

/// The orchestrator's position in the payment flow.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowPhase {
    Initializing,
    CreatingIntent,
    WaitingSignature,
    ExecutingPayment,
    Confirming,
    /// Transient off-ramp; loops back into the phase the fault hit.
    Recovering,
    /// Terminal, success.
    Completed,
    /// Terminal, non-success.
    Failed,
    /// Terminal, user decision. Never presented as a failure.
    Cancelled,
}

impl FlowPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowPhase::Initializing => "initializing",
            FlowPhase::CreatingIntent => "creating_intent",
            FlowPhase::WaitingSignature => "waiting_signature",
            FlowPhase::ExecutingPayment => "executing_payment",
            FlowPhase::Confirming => "confirming",
            FlowPhase::Recovering => "recovering",
            FlowPhase::Completed => "completed",
            FlowPhase::Failed => "failed",
            FlowPhase::Cancelled => "cancelled",
        }
    }

    /// All valid transitions out of this phase.
    pub fn valid_transitions(&self) -> Vec<FlowPhase> {
        match self {
            FlowPhase::Initializing => vec![
                FlowPhase::CreatingIntent,
                FlowPhase::Recovering,
                FlowPhase::Failed,
                FlowPhase::Cancelled,
            ],
            FlowPhase::CreatingIntent => vec![
                FlowPhase::WaitingSignature,
                FlowPhase::ExecutingPayment,
                FlowPhase::Recovering,
                FlowPhase::Failed,
                FlowPhase::Cancelled,
            ],
            FlowPhase::WaitingSignature => vec![
                FlowPhase::ExecutingPayment,
                FlowPhase::Recovering,
                FlowPhase::Failed,
                FlowPhase::Cancelled,
            ],
            FlowPhase::ExecutingPayment => vec![
                FlowPhase::Confirming,
                FlowPhase::Recovering,
                FlowPhase::Failed,
                FlowPhase::Cancelled,
            ],
            FlowPhase::Confirming => vec![FlowPhase::Completed, FlowPhase::Failed],
            FlowPhase::Recovering => vec![
                FlowPhase::Initializing,
                FlowPhase::CreatingIntent,
                FlowPhase::WaitingSignature,
                FlowPhase::ExecutingPayment,
                FlowPhase::Failed,
                FlowPhase::Cancelled,
            ],
            // Terminal phases.
            FlowPhase::Completed | FlowPhase::Failed | FlowPhase::Cancelled => vec![],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowPhase::Completed | FlowPhase::Failed | FlowPhase::Cancelled
        )
    }

    /// Progress lookup table. Derived, not freely settable, so progress bars
    /// never regress within an attempt.
    pub fn progress(&self) -> u8 {
        match self {
            FlowPhase::Initializing => 5,
            FlowPhase::CreatingIntent => 15,
            FlowPhase::WaitingSignature => 35,
            FlowPhase::ExecutingPayment => 60,
            FlowPhase::Confirming => 85,
            FlowPhase::Completed => 100,
            // Holds whatever progress the attempt already earned.
            FlowPhase::Recovering | FlowPhase::Failed | FlowPhase::Cancelled => 0,
        }
    }

    fn estimated_remaining_secs(&self) -> u64 {
        match self {
            FlowPhase::Initializing => 45,
            FlowPhase::CreatingIntent => 40,
            FlowPhase::WaitingSignature => 35,
            FlowPhase::ExecutingPayment => 25,
            FlowPhase::Confirming => 20,
            FlowPhase::Recovering => 30,
            FlowPhase::Completed | FlowPhase::Failed | FlowPhase::Cancelled => 0,
        }
    }
}

impl std::fmt::Display for FlowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Flow State Types
// ============================================================================

/// Milestones and time estimate for the current attempt.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PaymentProgress {
    pub intent_created: bool,
    pub authorization_received: bool,
    pub payment_executed: bool,
    pub payment_confirmed: bool,
    pub estimated_remaining_secs: u64,
}

/// Recovery bookkeeping, independently queryable from the phase.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RecoveryContext {
    pub is_recovering: bool,
    pub recovery_attempt: u32,
    pub available_actions: Vec<RecoveryAction>,
}

/// Wall-clock time spent in one phase.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PhaseDuration {
    pub phase: String,
    pub duration_ms: u64,
}

/// Per-phase telemetry with the slowest phase flagged.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PerformanceReport {
    pub phase_durations: Vec<PhaseDuration>,
    pub bottleneck_phase: Option<String>,
}

/// What the user is currently allowed to do.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct UserInteraction {
    pub can_cancel: bool,
}

/// The externally observed orchestrator state. Owned exclusively by the
/// orchestrator; published as whole snapshots, never mutated in place.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FlowState {
    pub phase: FlowPhase,
    pub progress: u8,
    pub payment_progress: PaymentProgress,
    pub system_health: SystemHealth,
    pub recovery: RecoveryContext,
    pub performance: PerformanceReport,
    pub user_interaction: UserInteraction,
}

impl Default for FlowState {
    fn default() -> Self {
        Self {
            phase: FlowPhase::Initializing,
            progress: 0,
            payment_progress: PaymentProgress::default(),
            system_health: SystemHealth::unknown(),
            recovery: RecoveryContext::default(),
            performance: PerformanceReport::default(),
            user_interaction: UserInteraction::default(),
        }
    }
}

// ============================================================================
// Transaction Status
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TxStatusKind {
    Pending,
    Confirmed,
    Failed,
    Cancelled,
}

/// Per-attempt transaction record; replaced (not merged) on retry.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TransactionStatus {
    pub hash: Option<TxHash>,
    pub status: Option<TxStatusKind>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub receipt: Option<TransactionReceipt>,
}

// ============================================================================
// Request / Result / Callbacks
// ============================================================================

/// UI intent to buy one content item.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub content_id: String,
    /// Explicit method choice; `None` takes the resolver's recommendation.
    pub method: Option<PaymentMethod>,
}

/// Emitted once per attempt on entering any terminal phase.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentResult {
    pub success: bool,
    pub content_id: String,
    pub intent_id: Option<String>,
    pub method: Option<PaymentMethod>,
    pub tx_hash: Option<TxHash>,
    pub signature: Option<String>,
    pub phase_durations: Vec<PhaseDuration>,
    pub bottleneck_phase: Option<String>,
    pub recovery_attempts: u32,
    pub error_category: Option<ErrorCategory>,
    pub final_error: Option<String>,
    pub explorer_url: Option<String>,
}

type CompletedHook = Arc<dyn Fn(&PaymentResult) + Send + Sync>;
type HealthHook = Arc<dyn Fn(&SystemHealth) + Send + Sync>;
type RecoveryHook = Arc<dyn Fn(u32, ErrorCategory) + Send + Sync>;

/// Callback bundle supplied at construction.
#[derive(Clone, Default)]
pub struct FlowCallbacks {
    completed: Option<CompletedHook>,
    health_changed: Option<HealthHook>,
    recovery_attempted: Option<RecoveryHook>,
}

impl FlowCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_payment_completed(
        mut self,
        hook: impl Fn(&PaymentResult) + Send + Sync + 'static,
    ) -> Self {
        self.completed = Some(Arc::new(hook));
        self
    }

    pub fn on_health_change(
        mut self,
        hook: impl Fn(&SystemHealth) + Send + Sync + 'static,
    ) -> Self {
        self.health_changed = Some(Arc::new(hook));
        self
    }

    pub fn on_recovery_attempt(
        mut self,
        hook: impl Fn(u32, ErrorCategory) + Send + Sync + 'static,
    ) -> Self {
        self.recovery_attempted = Some(Arc::new(hook));
        self
    }
}

// ============================================================================
// Internal Driver Types
// ============================================================================

/// Where the driver is inside an attempt. Each async result routes back
/// through the driver loop; nothing mutates state from nested callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Resolve,
    CreateIntent,
    AwaitAuthorization,
    Submit,
    Confirm,
}

impl Step {
    fn phase(&self) -> FlowPhase {
        match self {
            Step::Resolve => FlowPhase::Initializing,
            Step::CreateIntent => FlowPhase::CreatingIntent,
            Step::AwaitAuthorization => FlowPhase::WaitingSignature,
            Step::Submit => FlowPhase::ExecutingPayment,
            Step::Confirm => FlowPhase::Confirming,
        }
    }
}

/// Wall-clock accounting across phases, tolerating repeated visits.
struct PhaseTimer {
    current: Option<(FlowPhase, Instant)>,
    visits: Vec<(FlowPhase, Duration)>,
}

impl PhaseTimer {
    fn new() -> Self {
        Self {
            current: None,
            visits: Vec::new(),
        }
    }

    fn enter(&mut self, phase: FlowPhase) {
        let now = Instant::now();
        if let Some((previous, since)) = self.current.take() {
            self.visits.push((previous, now.duration_since(since)));
        }
        self.current = Some((phase, now));
    }

    fn finish(&mut self) -> PerformanceReport {
        let now = Instant::now();
        if let Some((phase, since)) = self.current.take() {
            self.visits.push((phase, now.duration_since(since)));
        }

        // Terminal phases are instants, not work; leave them out.
        let mut durations: Vec<PhaseDuration> = Vec::new();
        for (phase, duration) in self.visits.iter().filter(|(p, _)| !p.is_terminal()) {
            let ms = duration.as_millis() as u64;
            match durations.iter_mut().find(|d| d.phase == phase.as_str()) {
                Some(existing) => existing.duration_ms += ms,
                None => durations.push(PhaseDuration {
                    phase: phase.as_str().to_string(),
                    duration_ms: ms,
                }),
            }
        }

        let bottleneck_phase = durations
            .iter()
            .max_by_key(|d| d.duration_ms)
            .map(|d| d.phase.clone());

        PerformanceReport {
            phase_durations: durations,
            bottleneck_phase,
        }
    }
}

/// Mutable per-attempt context threaded through the driver.
struct AttemptCx {
    attempt_no: u32,
    cancel_rx: watch::Receiver<bool>,
    timer: PhaseTimer,
    recovery_attempts: u32,
    content: Option<ContentPricing>,
    affordability: Option<TokenAffordability>,
    method: Option<PaymentMethod>,
    intent: Option<PaymentIntent>,
    signature: Option<String>,
    hash: Option<TxHash>,
}

impl AttemptCx {
    fn cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }
}

type StepOutcome = Result<(), FlowError>;

// ============================================================================
// Orchestrator
// ============================================================================

/// Drives one purchase at a time from intent to confirmed receipt.
///
/// Breaker and health state are process-wide (shared across orchestrator
/// instances); everything else here belongs to this instance alone.
pub struct PaymentFlowOrchestrator {
    wallet: Arc<dyn WalletProvider>,
    chain_data: Arc<dyn ChainDataSource>,
    authorizer: Arc<dyn AuthorizationClient>,
    watcher: ConfirmationWatcher,
    resolver: MethodResolver,
    submitter: Arc<dyn SubmissionAdapter>,
    health: Arc<BackendHealthMonitor>,
    breakers: Arc<BreakerRegistry>,
    classifier: Arc<dyn ErrorClassifier>,
    config: FlowConfig,
    callbacks: FlowCallbacks,

    session_id: Uuid,
    state_tx: watch::Sender<FlowState>,
    state_rx: watch::Receiver<FlowState>,
    tx_status: Mutex<TransactionStatus>,
    cancel_tx: Mutex<Option<watch::Sender<bool>>>,
    last_request: Mutex<Option<PaymentRequest>>,
    last_health_tier: Mutex<HealthTier>,
    attempt_seq: AtomicU32,
    active: AtomicBool,
}

impl PaymentFlowOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        wallet: Arc<dyn WalletProvider>,
        chain_data: Arc<dyn ChainDataSource>,
        receipts: Arc<dyn ReceiptSource>,
        authorizer: Arc<dyn AuthorizationClient>,
        health: Arc<BackendHealthMonitor>,
        breakers: Arc<BreakerRegistry>,
        config: FlowConfig,
        callbacks: FlowCallbacks,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(FlowState::default());
        let watcher = ConfirmationWatcher::new(receipts, config.confirmation.clone());
        let resolver = MethodResolver::new(config.pricing.slippage_bps);
        let submitter = adapter_for(wallet.clone());

        Self {
            wallet,
            chain_data,
            authorizer,
            watcher,
            resolver,
            submitter,
            health,
            breakers,
            classifier: Arc::new(StringMatchClassifier),
            config,
            callbacks,
            session_id: Uuid::new_v4(),
            state_tx,
            state_rx,
            tx_status: Mutex::new(TransactionStatus::default()),
            cancel_tx: Mutex::new(None),
            last_request: Mutex::new(None),
            last_health_tier: Mutex::new(HealthTier::Healthy),
            attempt_seq: AtomicU32::new(0),
            active: AtomicBool::new(false),
        }
    }

    /// Swap in a wallet-specific error classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    // =========================================================================
    // Public Contract
    // =========================================================================

    /// Reactive, read-only view of the flow state.
    pub fn state(&self) -> watch::Receiver<FlowState> {
        self.state_tx.subscribe()
    }

    /// Identifier for this orchestrator instance; attempts are tagged
    /// `session_id` + attempt number in logs and async-operation guards.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Current snapshot, for non-reactive callers.
    pub fn current_state(&self) -> FlowState {
        self.state_rx.borrow().clone()
    }

    /// Current transaction record for the live (or last) attempt.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.tx_status.lock().expect("status lock poisoned").clone()
    }

    /// Whether a new attempt with `method` could start right now.
    ///
    /// A distressed backend blocks only methods that need its co-signature.
    pub fn can_start_payment(&self, method: PaymentMethod) -> bool {
        if self.active.load(Ordering::SeqCst) {
            return false;
        }
        if method.requires_authorization() {
            if !self.breakers.breaker(names::AUTHORIZATION).can_proceed() {
                return false;
            }
            if self.health.snapshot().tier == HealthTier::Critical {
                return false;
            }
        }
        true
    }

    /// Run one payment attempt to a terminal phase.
    ///
    /// Rejects if an attempt is already live; the previous attempt must
    /// reach `completed`, `failed` or `cancelled` first.
    pub async fn execute_payment(&self, request: PaymentRequest) -> FlowResult<PaymentResult> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FlowError::AttemptInProgress);
        }

        let attempt_no = self.attempt_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        *self.cancel_tx.lock().expect("cancel lock poisoned") = Some(cancel_tx);
        *self.last_request.lock().expect("request lock poisoned") = Some(request.clone());
        *self.tx_status.lock().expect("status lock poisoned") = TransactionStatus::default();

        // Brand-new attempt: progress resets, milestones clear.
        self.state_tx.send_replace(FlowState {
            system_health: self.health.snapshot(),
            user_interaction: UserInteraction { can_cancel: true },
            ..FlowState::default()
        });

        info!(
            session = %self.session_id,
            content_id = %request.content_id,
            attempt = attempt_no,
            payer = %mask_address(&self.wallet.payer_address()),
            "payment attempt started"
        );

        let mut cx = AttemptCx {
            attempt_no,
            cancel_rx,
            timer: PhaseTimer::new(),
            recovery_attempts: 0,
            content: None,
            affordability: None,
            method: request.method,
            intent: None,
            signature: None,
            hash: None,
        };

        let outcome = self.drive(&request, &mut cx).await;
        Ok(self.finalize(&request, cx, outcome))
    }

    /// Start a fresh attempt for the last request.
    pub async fn retry_payment(&self) -> FlowResult<PaymentResult> {
        let request = self
            .last_request
            .lock()
            .expect("request lock poisoned")
            .clone()
            .ok_or(FlowError::NothingToRetry)?;
        info!(content_id = %request.content_id, "retrying payment");
        self.execute_payment(request).await
    }

    /// Request cancellation of the live attempt.
    ///
    /// Effective only while `user_interaction.can_cancel` holds — before a
    /// transaction hash exists. A broadcast transaction cannot be recalled;
    /// past that point this is a no-op.
    pub fn cancel_payment(&self) {
        let state = self.state_rx.borrow().clone();
        if !state.user_interaction.can_cancel {
            warn!(phase = %state.phase, "cancellation requested but not permitted");
            return;
        }
        if let Some(cancel) = self.cancel_tx.lock().expect("cancel lock poisoned").as_ref() {
            let _ = cancel.send(true);
            info!("payment cancellation requested");
        }
    }

    // =========================================================================
    // Driver Loop
    // =========================================================================

    /// Advance step by step; every async result funnels back through here.
    async fn drive(&self, request: &PaymentRequest, cx: &mut AttemptCx) -> StepOutcome {
        let mut step = Step::Resolve;

        loop {
            if cx.cancelled() {
                return Err(FlowError::CancelledByUser);
            }

            let result = match step {
                Step::Resolve => self
                    .step_resolve(request, cx)
                    .await
                    .map(|_| Step::CreateIntent),
                Step::CreateIntent => self.step_create_intent(request, cx),
                Step::AwaitAuthorization => {
                    self.step_await_authorization(cx).await.map(|_| Step::Submit)
                }
                Step::Submit => self.step_submit(cx).await.map(|_| Step::Confirm),
                Step::Confirm => {
                    self.step_confirm(cx).await?;
                    return Ok(());
                }
            };

            match result {
                Ok(next) => step = next,
                Err(error) => {
                    let category = self.classifier.classify(&error);
                    if category.is_user_cancel() {
                        return Err(error);
                    }

                    let recoverable = category.is_auto_retryable()
                        && self.config.recovery.auto_recovery_enabled;
                    if recoverable && cx.recovery_attempts < self.config.recovery.max_auto_retries
                    {
                        self.enter_recovery(cx, step, category, &error).await?;
                        continue; // resume at the step the fault hit
                    }
                    if recoverable {
                        return Err(FlowError::RetriesExhausted {
                            attempts: cx.recovery_attempts,
                            last_error: error.to_string(),
                        });
                    }
                    return Err(error);
                }
            }
        }
    }

    /// Record the recovery, publish the `recovering` phase, back off, and
    /// re-enter the faulted phase.
    async fn enter_recovery(
        &self,
        cx: &mut AttemptCx,
        step: Step,
        category: ErrorCategory,
        cause: &FlowError,
    ) -> StepOutcome {
        cx.recovery_attempts += 1;
        let attempt = cx.recovery_attempts;
        let delay = retry_delay(attempt, &self.config.recovery);

        warn!(
            attempt,
            max_attempts = self.config.recovery.max_auto_retries,
            category = %category,
            delay_ms = delay.as_millis() as u64,
            error = %cause,
            "transient fault, recovering"
        );

        if let Some(hook) = &self.callbacks.recovery_attempted {
            hook(attempt, category);
        }

        cx.timer.enter(FlowPhase::Recovering);
        let actions = recovery_actions(category, attempt, &self.config.recovery);
        self.publish(|state| {
            state.phase = FlowPhase::Recovering;
            state.recovery = RecoveryContext {
                is_recovering: true,
                recovery_attempt: attempt,
                available_actions: actions.clone(),
            };
        });

        if cancellable_sleep(delay, &mut cx.cancel_rx).await {
            return Err(FlowError::CancelledByUser);
        }

        // Back into the phase the fault occurred in.
        self.set_phase(step.phase(), cx);
        self.publish(|state| {
            state.recovery.is_recovering = false;
        });
        Ok(())
    }

    // =========================================================================
    // Steps
    // =========================================================================

    /// Initializing: read prices and balances, resolve the method, gate on
    /// backend health for co-signed methods.
    async fn step_resolve(&self, request: &PaymentRequest, cx: &mut AttemptCx) -> StepOutcome {
        self.set_phase(FlowPhase::Initializing, cx);

        let content = self.fetch_content_pricing(&request.content_id).await?;
        let payer = self.wallet.payer_address();
        let marketplace = self.config.pricing.marketplace_address.clone();

        let stable_balance = self.chain_data.stable_balance(&payer).await?;
        let stable_allowance = self
            .chain_data
            .stable_allowance(&payer, &marketplace)
            .await?;
        let native_balance = self.chain_data.native_balance(&payer).await?;
        let native_price_in_stable = match self.chain_data.native_price_in_stable().await {
            Ok(rate) => Some(rate),
            Err(e) => {
                debug!(error = %e, "oracle quote unavailable, swap method disabled");
                None
            }
        };

        let snapshot = BalanceSnapshot {
            stable_balance,
            stable_allowance,
            native_balance,
            native_price_in_stable,
        };
        let resolution = self.resolver.resolve(&content.price, &snapshot);

        let method = match request.method.or(resolution.recommended) {
            Some(method) => method,
            None => {
                return Err(FlowError::NoAffordableMethod {
                    content_id: request.content_id.clone(),
                })
            }
        };
        let quote = resolution
            .quote(method)
            .ok_or_else(|| FlowError::MethodUnavailable {
                method: method.to_string(),
                reason: "method not quoted".to_string(),
            })?;

        match quote.availability {
            MethodAvailability::Available => {}
            MethodAvailability::Insufficient => {
                return Err(FlowError::NoAffordableMethod {
                    content_id: request.content_id.clone(),
                });
            }
            MethodAvailability::Unavailable => {
                return Err(FlowError::MethodUnavailable {
                    method: method.to_string(),
                    reason: if quote.affordability.needs_approval {
                        "token approval required; use the batched method".to_string()
                    } else {
                        "not executable right now".to_string()
                    },
                });
            }
        }

        if method.requires_authorization() {
            if !self.breakers.breaker(names::AUTHORIZATION).can_proceed() {
                return Err(FlowError::BackendUnavailable {
                    reason: "authorization circuit open".to_string(),
                });
            }
            if self.refresh_health().tier == HealthTier::Critical {
                return Err(FlowError::BackendUnavailable {
                    reason: "authorization backend critical".to_string(),
                });
            }
        }

        info!(
            content_id = %content.content_id,
            method = %method,
            required = %quote.affordability.required_amount,
            "payment method selected"
        );

        cx.affordability = Some(quote.affordability.clone());
        cx.method = Some(method);
        cx.content = Some(content);
        Ok(())
    }

    /// CreatingIntent: freeze the attempt into an immutable intent.
    fn step_create_intent(
        &self,
        request: &PaymentRequest,
        cx: &mut AttemptCx,
    ) -> Result<Step, FlowError> {
        self.set_phase(FlowPhase::CreatingIntent, cx);

        let content = cx.content.as_ref().expect("resolve ran first");
        let affordability = cx.affordability.as_ref().expect("resolve ran first");
        let method = cx.method.expect("resolve ran first");
        let payer = self.wallet.payer_address();

        let amount = affordability.required_amount.clone();
        let intent = PaymentIntent {
            intent_id: generate_intent_id(
                &content.content_id,
                &payer,
                method,
                &amount,
                cx.attempt_no,
            ),
            content_id: content.content_id.clone(),
            payer_address: payer,
            creator_address: content.creator_address.clone(),
            method,
            amount,
            max_slippage_bps: self.resolver.slippage_bps(),
            deadline: Utc::now().timestamp() + self.config.pricing.intent_ttl.as_secs() as i64,
            attempt: cx.attempt_no,
        };

        debug!(intent_id = %intent.intent_id, method = %method, "payment intent created");
        cx.intent = Some(intent);
        self.publish(|state| {
            state.payment_progress.intent_created = true;
        });

        if method.requires_authorization() {
            Ok(Step::AwaitAuthorization)
        } else {
            // No backend co-signature needed; straight to the wallet.
            Ok(Step::Submit)
        }
    }

    /// WaitingSignature: adaptive polling for the backend co-signature,
    /// bounded by poll count and the intent deadline.
    async fn step_await_authorization(&self, cx: &mut AttemptCx) -> StepOutcome {
        self.set_phase(FlowPhase::WaitingSignature, cx);

        let intent = cx.intent.clone().expect("intent created first");
        let breaker = self.breakers.breaker(names::AUTHORIZATION);
        let poll_config = self.config.signing.clone();
        let mut delay = poll_config.initial_delay;

        for poll in 0..poll_config.max_polls {
            if cx.cancelled() {
                return Err(FlowError::CancelledByUser);
            }
            if intent.is_expired(Utc::now().timestamp()) {
                return Err(FlowError::DeadlineExpired);
            }

            let started = Instant::now();
            match self.authorizer.authorize(&intent).await {
                Ok(AuthorizationOutcome::Granted { signature }) => {
                    self.health.record_success(started.elapsed());
                    breaker.record_success();
                    self.refresh_health();
                    info!(intent_id = %intent.intent_id, polls = poll + 1, "authorization received");
                    cx.signature = Some(signature);
                    self.publish(|state| {
                        state.payment_progress.authorization_received = true;
                    });
                    return Ok(());
                }
                Ok(AuthorizationOutcome::Pending) => {
                    self.health.record_success(started.elapsed());
                    debug!(intent_id = %intent.intent_id, poll = poll + 1, "authorization pending");
                }
                Err(e) => {
                    self.health.record_failure(started.elapsed());
                    breaker.record_failure();
                    self.refresh_health();
                    return Err(e.into());
                }
            }

            if cancellable_sleep(delay, &mut cx.cancel_rx).await {
                return Err(FlowError::CancelledByUser);
            }
            if poll_config.adaptive {
                delay = (delay * 3 / 2).min(poll_config.max_delay);
            }
        }

        Err(FlowError::AuthorizationTimedOut {
            polls: poll_config.max_polls,
        })
    }

    /// ExecutingPayment: hand the plan to the wallet via the submission
    /// adapter. A user rejection becomes a cancellation, never a failure.
    async fn step_submit(&self, cx: &mut AttemptCx) -> StepOutcome {
        self.set_phase(FlowPhase::ExecutingPayment, cx);

        let intent = cx.intent.as_ref().expect("intent created first");
        let plan = self.build_plan(intent, cx.signature.as_deref());

        let hash = self.submitter.submit(plan).await?;
        info!(intent_id = %intent.intent_id, hash = %hash, "transaction submitted");

        cx.hash = Some(hash.clone());
        {
            let mut status = self.tx_status.lock().expect("status lock poisoned");
            *status = TransactionStatus {
                hash: Some(hash),
                status: Some(TxStatusKind::Pending),
                ..TransactionStatus::default()
            };
        }
        // A broadcast transaction cannot be recalled; cancellation closes.
        self.publish(|state| {
            state.payment_progress.payment_executed = true;
            state.user_interaction.can_cancel = false;
        });
        Ok(())
    }

    /// Confirming: a hash is never success on its own; wait for the receipt.
    async fn step_confirm(&self, cx: &mut AttemptCx) -> StepOutcome {
        self.set_phase(FlowPhase::Confirming, cx);

        let hash = cx.hash.clone().expect("submission produced a hash");
        let receipt = self
            .watcher
            .await_receipt(&hash, cx.cancel_rx.clone())
            .await?;

        {
            let mut status = self.tx_status.lock().expect("status lock poisoned");
            status.status = Some(TxStatusKind::Confirmed);
            status.confirmed_at = Some(Utc::now());
            status.receipt = Some(receipt);
        }
        self.publish(|state| {
            state.payment_progress.payment_confirmed = true;
        });
        Ok(())
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    /// Enter the terminal phase, emit the `PaymentResult`, release the
    /// attempt slot.
    fn finalize(
        &self,
        request: &PaymentRequest,
        mut cx: AttemptCx,
        outcome: StepOutcome,
    ) -> PaymentResult {
        let (terminal, category, final_error) = match &outcome {
            Ok(()) => (FlowPhase::Completed, None, None),
            Err(error) => {
                let category = self.classifier.classify(error);
                if category.is_user_cancel() {
                    (FlowPhase::Cancelled, Some(category), Some(error.user_message()))
                } else {
                    (FlowPhase::Failed, Some(category), Some(error.user_message()))
                }
            }
        };

        cx.timer.enter(terminal);
        let performance = cx.timer.finish();

        // Terminal transaction record. The hash survives for explorer
        // lookup even when confirmation never arrived.
        {
            let mut status = self.tx_status.lock().expect("status lock poisoned");
            match terminal {
                FlowPhase::Completed => {}
                FlowPhase::Cancelled => {
                    status.status = Some(TxStatusKind::Cancelled);
                    status.error = final_error.clone();
                }
                _ => {
                    if status.hash.is_some() {
                        status.status = Some(TxStatusKind::Failed);
                    }
                    status.error = final_error.clone();
                }
            }
        }

        let actions = category
            .map(|c| recovery_actions(c, cx.recovery_attempts, &self.config.recovery))
            .unwrap_or_default();
        let recovery_attempts = cx.recovery_attempts;
        let performance_for_state = performance.clone();
        self.publish(move |state| {
            state.phase = terminal;
            if terminal == FlowPhase::Completed {
                state.progress = 100;
            }
            state.recovery = RecoveryContext {
                is_recovering: false,
                recovery_attempt: recovery_attempts,
                available_actions: actions,
            };
            state.performance = performance_for_state;
            state.user_interaction.can_cancel = false;
            state.payment_progress.estimated_remaining_secs = 0;
        });

        let explorer_url = cx.hash.as_ref().and_then(|hash| {
            self.config
                .pricing
                .explorer_base_url
                .as_ref()
                .map(|base| format!("{}/{}", base.trim_end_matches('/'), hash))
        });

        let result = PaymentResult {
            success: terminal == FlowPhase::Completed,
            content_id: request.content_id.clone(),
            intent_id: cx.intent.as_ref().map(|i| i.intent_id.clone()),
            method: cx.method,
            tx_hash: cx.hash.clone(),
            signature: cx.signature.clone(),
            phase_durations: performance.phase_durations,
            bottleneck_phase: performance.bottleneck_phase,
            recovery_attempts,
            error_category: category,
            final_error,
            explorer_url,
        };

        match terminal {
            FlowPhase::Completed => info!(
                content_id = %result.content_id,
                hash = ?result.tx_hash,
                recovery_attempts,
                "payment completed"
            ),
            FlowPhase::Cancelled => info!(content_id = %result.content_id, "payment cancelled"),
            _ => error!(
                content_id = %result.content_id,
                category = ?result.error_category,
                error = ?result.final_error,
                "payment failed"
            ),
        }

        // Completion hook doubles as the refresh trigger for collaborating
        // access-control and balance views.
        if let Some(hook) = &self.callbacks.completed {
            hook(&result);
        }

        *self.cancel_tx.lock().expect("cancel lock poisoned") = None;
        self.active.store(false, Ordering::SeqCst);
        result
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Content reads go through their own breaker: after three consecutive
    /// failures further fetches are short-circuited until the cooldown.
    async fn fetch_content_pricing(&self, content_id: &str) -> FlowResult<ContentPricing> {
        let breaker = self.breakers.breaker(names::CONTENT_FETCH);
        if !breaker.can_proceed() {
            return Err(ChainDataError::Read {
                message: "content fetch suspended by circuit breaker".to_string(),
                retryable: true,
            }
            .into());
        }

        match self.chain_data.content_pricing(content_id).await {
            Ok(pricing) => {
                breaker.record_success();
                Ok(pricing)
            }
            Err(e) => {
                breaker.record_failure();
                Err(e.into())
            }
        }
    }

    fn build_plan(&self, intent: &PaymentIntent, signature: Option<&str>) -> SubmissionPlan {
        let marketplace = self.config.pricing.marketplace_address.clone();
        let token = self.config.pricing.settlement_token_address.clone();

        match intent.method {
            PaymentMethod::StableDirect => SubmissionPlan::single(WalletCall::to_contract(
                marketplace,
                CallInput::Purchase {
                    content_id: intent.content_id.clone(),
                    amount: intent.amount.clone(),
                },
            )),
            PaymentMethod::BatchedApprovePay => SubmissionPlan::approve_then_purchase(
                WalletCall::to_contract(
                    token,
                    CallInput::Approve {
                        spender: marketplace.clone(),
                        amount: intent.amount.clone(),
                    },
                ),
                WalletCall::to_contract(
                    marketplace,
                    CallInput::Purchase {
                        content_id: intent.content_id.clone(),
                        amount: intent.amount.clone(),
                    },
                ),
            ),
            PaymentMethod::NativeSwap => SubmissionPlan::single(
                WalletCall::to_contract(
                    marketplace,
                    CallInput::SwapPurchase {
                        content_id: intent.content_id.clone(),
                        max_amount_in: intent.amount.clone(),
                        authorization: signature.unwrap_or_default().to_string(),
                    },
                )
                .with_value(intent.amount.clone()),
            ),
        }
    }

    /// Replace the published snapshot. All mutations flow through here so a
    /// re-entrant reader never observes a half-updated state.
    fn publish<F: FnOnce(&mut FlowState)>(&self, mutate: F) {
        let mut next = self.state_rx.borrow().clone();
        mutate(&mut next);
        self.state_tx.send_replace(next);
    }

    fn set_phase(&self, phase: FlowPhase, cx: &mut AttemptCx) {
        cx.timer.enter(phase);
        let previous = self.state_rx.borrow().phase;
        if previous != phase && !previous.valid_transitions().contains(&phase) {
            warn!(from = %previous, to = %phase, "unexpected phase transition");
        }

        let has_hash = self
            .tx_status
            .lock()
            .expect("status lock poisoned")
            .hash
            .is_some();
        self.publish(|state| {
            state.phase = phase;
            state.progress = state.progress.max(phase.progress());
            state.payment_progress.estimated_remaining_secs = phase.estimated_remaining_secs();
            state.user_interaction.can_cancel =
                !phase.is_terminal() && phase != FlowPhase::Confirming && !has_hash;
        });
        debug!(phase = %phase, "phase entered");
    }

    /// Re-snapshot backend health into the published state; fire the hook
    /// when the tier moves.
    fn refresh_health(&self) -> SystemHealth {
        let health = self.health.snapshot();
        let mut last = self.last_health_tier.lock().expect("health lock poisoned");
        let changed = *last != health.tier;
        *last = health.tier;
        drop(last);

        let for_state = health.clone();
        self.publish(move |state| {
            state.system_health = for_state;
        });

        if changed {
            info!(tier = %health.tier, "backend health tier changed");
            if let Some(hook) = &self.callbacks.health_changed {
                hook(&health);
            }
        }
        health
    }
}

/// Sleep that wakes early on cancellation. Returns true when cancelled.
async fn cancellable_sleep(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        changed = cancel.changed() => changed.is_err() || *cancel.borrow(),
        _ = tokio::time::sleep(delay) => false,
    }
}

// ============================================================================
// Tests
// ============================================================================
