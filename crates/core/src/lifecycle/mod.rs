pub mod machine;
pub mod service;

pub use machine::{IntentEvent, IntentStateMachine, IntentTransitionError, StatusChange};
pub use service::{
    ApprovedIntent, CreatedIntent, LifecycleService, RejectedIntent, SweepReport, UserProfile,
    DEFAULT_SWEEP_BATCH_SIZE, REJECTION_REASON,
};
