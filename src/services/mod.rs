//! Services module: the payment flow components

pub mod confirmation;
pub mod flow_orchestrator;
pub mod method_resolver;
pub mod submission;

// Re-export the orchestrator surface for convenience
pub use crate::services::confirmation::{ConfirmationError, ConfirmationWatcher};
pub use crate::services::flow_orchestrator::{
    FlowCallbacks, FlowPhase, FlowState, PaymentFlowOrchestrator, PaymentProgress, PaymentRequest,
    PaymentResult, PerformanceReport, PhaseDuration, RecoveryContext, TransactionStatus,
    TxStatusKind, UserInteraction,
};
pub use crate::services::method_resolver::{
    BalanceSnapshot, MethodAvailability, MethodQuote, MethodResolution, MethodResolver,
    TokenAffordability,
};
pub use crate::services::submission::{
    adapter_for, SubmissionAdapter, SubmissionError, SubmissionPlan, SubmissionResult,
};
