//! Scheduler for task intents and their recurrence definitions.
//!
//! This crate provides:
//!
//! - **Schedules**: four schedule kinds (one-time, interval, calendar-rule,
//!   conditional) over immutable task intents, with validation and a
//!   state machine
//! - **Callback Bridge**: provider-agnostic "fire now" callbacks with
//!   trace-id idempotency
//! - **Execution Dispatcher**: idempotent execution records, retry with
//!   backoff, failure notifications
//! - **Predicate Evaluator**: conditional schedules evaluated against an
//!   injected subject resolver, with idempotent audit rows

pub mod audit;
pub mod callback;
pub mod dispatcher;
pub mod error;
pub mod execution;
pub mod intent;
pub mod predicate;
pub mod provider;
pub mod recurrence;
pub mod retry;
pub mod schedule;
pub mod service;
pub mod store;

pub use audit::{
    ExecutionAuditEntry, FieldChange, PredicateEvaluationAuditEntry, ScheduleAuditAction,
    ScheduleAuditEntry, ScheduleAuditRecord,
};
pub use callback::{CallbackBridge, CallbackOutcome, ProviderCallback};
pub use dispatcher::{
    DispatchOutcome, ExecutionDispatcher, FailureNotifier, InvocationRequest, InvocationResult,
    InvocationStatus, Invoker, NullFailureNotifier,
};
pub use error::{
    CallbackBridgeError, DispatchError, PredicateError, ProviderError, SchedulerError, StoreError,
};
pub use execution::{Execution, ExecutionStatus};
pub use intent::{NewTaskIntent, TaskIntent};
pub use predicate::{
    EvaluationCallback, EvaluationOutcome, EvaluationStatus, PredicateEvaluationResult,
    PredicateEvaluator, ResolverError, SubjectResolver,
};
pub use provider::{RecordingProvider, TimerProvider, TimerRegistration};
pub use recurrence::{Frequency, RecurrenceRule};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use schedule::{
    IntervalUnit, PredicateOperator, PredicateValueType, Schedule, ScheduleDefinition,
    ScheduleKind, ScheduleState,
};
pub use service::{CreateScheduleInput, CreatedSchedule, IntentRef, SchedulerService, UpdateScheduleInput};
pub use store::{InMemorySchedulerStore, NewExecution, NewSchedule, ScheduleFilter, SchedulerStore};
