//! Safety escalation core: event model, per-user state, deterministic
//! rules, decision audit log, and the action executor.
//!
//! Control flow: producers submit a [`SafetyEvent`]; the [`SafetyEngine`]
//! records it, evaluates the priority-ordered rule list (first match wins),
//! applies the action→tier mapping, and appends exactly one [`Decision`] to
//! the audit log. The [`ActionExecutor`] then dispatches the decision's
//! actions to the [`SafetyChannels`] boundary, isolating per-action
//! failures.

mod action;
mod channels;
mod decision_log;
mod engine;
mod event;
mod executor;
mod rules;
mod state_store;

pub use action::{Action, ActionKind, Decision, EvidenceOptions, SosTrigger, Urgency};
pub use channels::{CircleNotice, EmergencyContact, EventSink, SafetyChannels};
pub use decision_log::{DecisionLog, DecisionLogConfig, DEFAULT_MEMORY_CAPACITY};
pub use engine::{EngineConfig, SafetyEngine};
pub use event::{EventKind, EventMetadata, RiskLevel, SafetyEvent};
pub use executor::{
    mint_emergency_token, ActionExecutor, ExecutionReport, EMERGENCY_TOKEN_ALPHABET,
    EMERGENCY_TOKEN_LEN,
};
pub use rules::{
    canonical_rules, CheckinFailedTwiceRule, CriticalOrManualSosRule,
    InactivityWithDiaryRiskRule, RuleOutcome, SafetyRule, CHECKIN_FAILURE_THRESHOLD,
    CHECKIN_FAILURE_WINDOW_MS, DIARY_CORRELATION_WINDOW_MS, DIARY_TRIGGER_WORDS,
    SILENT_VERIFICATION_TIMEOUT_SECONDS,
};
pub use state_store::{
    EscalationTier, HistoryEntry, StateStoreConfig, TierTransition, UserState, UserStateStore,
    DEFAULT_EVENT_WINDOW_MS,
};
