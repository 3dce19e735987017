//! The rule evaluation engine: record, evaluate, transition, audit.
//!
//! `process_event` holds the triggering user's lock for the whole
//! read-modify-write (history insert, rule evaluation, tier transition) so
//! concurrent events for one user are serialized while other users proceed
//! in parallel. Nothing in here may propagate an error that would halt
//! processing of another user's events.

use tracing::{info, warn};

use vela_core::current_unix_timestamp_ms;

use crate::action::{Action, ActionKind, Decision};
use crate::decision_log::{DecisionLog, DecisionLogConfig};
use crate::event::SafetyEvent;
use crate::rules::{canonical_rules, SafetyRule};
use crate::state_store::{
    EscalationTier, StateStoreConfig, TierTransition, UserState, UserStateStore,
};

#[derive(Debug, Clone, Default)]
/// Engine construction parameters.
pub struct EngineConfig {
    pub state: StateStoreConfig,
    pub log: DecisionLogConfig,
}

/// Deterministic rules engine over per-user safety state.
pub struct SafetyEngine {
    store: UserStateStore,
    rules: Vec<Box<dyn SafetyRule>>,
    log: DecisionLog,
}

impl SafetyEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_rules(config, canonical_rules())
    }

    /// Engine with a custom rule list; list order is priority order.
    pub fn with_rules(config: EngineConfig, rules: Vec<Box<dyn SafetyRule>>) -> Self {
        Self {
            store: UserStateStore::new(config.state),
            rules,
            log: DecisionLog::new(config.log),
        }
    }

    /// Processes one event and returns the decision. Every call yields
    /// exactly one appended decision, whether or not a rule fired.
    pub async fn process_event(&self, event: &SafetyEvent) -> Decision {
        let now_unix_ms = current_unix_timestamp_ms();
        let handle = self.store.user(&event.user_id, now_unix_ms);
        let mut state = handle.lock().await;

        state.record_event(event, now_unix_ms, self.store.event_window_ms());

        let mut applied_rule = None;
        let mut actions: Vec<Action> = Vec::new();
        let mut risk_level = event.metadata.risk_level;

        for rule in &self.rules {
            match rule.evaluate(event, &state, now_unix_ms) {
                Ok(outcome) if outcome.should_trigger => {
                    info!(
                        user_id = %event.user_id,
                        rule = rule.name(),
                        "rule fired"
                    );
                    applied_rule = Some(rule.name().to_string());
                    actions = outcome.actions;
                    risk_level = outcome.risk_level;
                    apply_tier_for_actions(&mut state, &actions, now_unix_ms);
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    // A misbehaving rule is treated as non-matching; the
                    // remaining rules and the no-match decision still run.
                    warn!(
                        user_id = %event.user_id,
                        rule = rule.name(),
                        "rule evaluation failed, skipping: {err:#}"
                    );
                }
            }
        }
        drop(state);

        let decision = Decision::new(
            &event.user_id,
            &event.id,
            applied_rule,
            actions,
            risk_level,
        );
        self.log.append(&decision);
        decision
    }

    /// Safe-confirmation reset: always legal, returns the tier to observing.
    pub async fn reset_tier(&self, user_id: &str) {
        let now_unix_ms = current_unix_timestamp_ms();
        let transition = self
            .store
            .set_tier(user_id, EscalationTier::Observing, now_unix_ms)
            .await;
        if transition == TierTransition::Applied {
            info!(user_id = %user_id, "tier reset to observing");
        }
    }

    /// Point-in-time snapshot of one user's state.
    pub async fn user_state(&self, user_id: &str) -> UserState {
        self.store
            .snapshot(user_id, current_unix_timestamp_ms())
            .await
    }

    /// Most-recent-first decisions for one user.
    pub fn decisions(&self, user_id: &str, limit: usize) -> Vec<Decision> {
        self.log.query(user_id, limit)
    }
}

/// Fixed action→tier mapping. The escalate-full-SOS path is the one place
/// allowed to jump tiers; every other target is reached by single guarded
/// steps so the monotonic invariant holds.
fn apply_tier_for_actions(state: &mut UserState, actions: &[Action], now_unix_ms: u64) {
    let has = |kind: ActionKind| actions.iter().any(|action| action.kind() == kind);

    if has(ActionKind::EscalateFullSos) {
        state.force_tier(EscalationTier::FullSos, now_unix_ms);
    } else if has(ActionKind::AlertTrustCircle) {
        if state.tier != EscalationTier::FullSos {
            climb_to(state, EscalationTier::CircleAlerted, now_unix_ms);
        }
    } else if has(ActionKind::SendSilentVerification) {
        if state.tier == EscalationTier::Observing {
            state.set_tier(EscalationTier::Verifying, now_unix_ms);
        }
    } else if has(ActionKind::StopEscalation) {
        state.set_tier(EscalationTier::Observing, now_unix_ms);
    }
}

fn climb_to(state: &mut UserState, target: EscalationTier, now_unix_ms: u64) {
    while state.tier.ordinal() < target.ordinal() {
        let Some(next) = state.tier.next() else {
            break;
        };
        if state.set_tier(next, now_unix_ms) != TierTransition::Applied {
            break;
        }
    }
}
