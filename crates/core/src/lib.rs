pub mod audit;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod guardrails;
pub mod ledger;
pub mod lifecycle;
pub mod notify;
pub mod store;

pub use audit::{
    AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, NoopAuditSink, TracingAuditSink,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::guardrail::{Guardrail, GuardrailId, GuardrailRule, NewGuardrail, RuleType};
pub use domain::intent::{
    Alternative, IntentId, IntentStatus, IntentView, PendingIntentSummary, PurchaseDetails,
    TransactionIntent,
};
pub use domain::principal::{Agent, AgentId, Principal, User, UserId};
pub use domain::transaction::{
    AuditEntry, PaymentOutcome, Transaction, TransactionDetail, TransactionId, TransactionStatus,
    TransactionSummary,
};
pub use errors::{ApplicationError, DomainError, ErrorKind, InterfaceError};
pub use guardrails::{GuardrailDecision, GuardrailEvaluator, GuardrailInput};
pub use ledger::{ApprovalMode, AuditSigner, LedgerService, TrailVerification};
pub use lifecycle::{
    ApprovedIntent, CreatedIntent, IntentEvent, IntentStateMachine, LifecycleService,
    RejectedIntent, StatusChange, SweepReport, UserProfile,
};
pub use notify::{
    Delivered, NotificationEvent, NotificationHub, NotificationSink, NoopSink, Outbound,
    RecordingSink, Topic,
};
pub use store::{InMemoryStore, Store, StoreError};
