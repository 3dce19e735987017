//! The runtime facade: one object wiring engine, executor, and guardian.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use vela_engine::{
    ActionExecutor, ActionKind, Decision, EngineConfig, EventKind, EventSink, SafetyChannels,
    SafetyEngine, SafetyEvent, UserState,
};
use vela_guardian::{EscalationRecord, GuardianConfig, PhaseController};

#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    pub engine: EngineConfig,
    pub guardian: GuardianConfig,
}

#[derive(Debug, Clone)]
/// What a safe confirmation actually did.
pub struct ConfirmSafeOutcome {
    pub escalation_cancelled: bool,
    pub decision: Decision,
}

/// Entry point for every producer in the system. Owns the full pipeline:
/// an event goes through rule evaluation, its decision's actions are
/// dispatched, and alerting decisions are handed to the phase controller.
pub struct SafetyCore {
    engine: SafetyEngine,
    executor: ActionExecutor,
    guardian: PhaseController,
    channels: Arc<dyn SafetyChannels>,
}

impl SafetyCore {
    pub fn new(config: CoreConfig, channels: Arc<dyn SafetyChannels>) -> Self {
        Self {
            engine: SafetyEngine::new(config.engine),
            executor: ActionExecutor::new(channels.clone()),
            guardian: PhaseController::new(config.guardian, channels.clone()),
            channels,
        }
    }

    /// Processes one event end to end and returns the decision.
    pub async fn submit_event(&self, event: &SafetyEvent) -> Decision {
        let decision = self.engine.process_event(event).await;
        let report = self.executor.execute(&decision).await;
        debug!(
            user_id = %decision.user_id,
            decision_id = %decision.id,
            dispatched = report.dispatched,
            failed = report.failed,
            "decision executed"
        );

        let reason = decision.applied_rule.as_deref().unwrap_or("computed_risk");
        if decision.has_action(ActionKind::EscalateFullSos) {
            self.guardian
                .request_full_activation(&decision.user_id, reason)
                .await;
        } else if decision.has_action(ActionKind::AlertTrustCircle) {
            self.guardian
                .request_circle_alert(&decision.user_id, reason)
                .await;
        } else if event.kind == EventKind::CheckinFailed {
            // A missed check-in always starts the guardian sequence, even
            // while the rules engine is still below its alert threshold.
            // An escalation already running keeps its current phase.
            self.guardian
                .request_circle_alert(&decision.user_id, "missed_checkin")
                .await;
        }
        decision
    }

    /// "I am fine": cancels any running escalation, returns the tier to
    /// observing, clears the emergency record, and leaves an auditable
    /// state-change event behind.
    pub async fn confirm_safe(&self, user_id: &str) -> ConfirmSafeOutcome {
        let escalation_cancelled = self.guardian.confirm_safe(user_id);
        self.engine.reset_tier(user_id).await;
        if let Err(err) = self.channels.close_emergency(user_id).await {
            warn!(user_id = %user_id, "emergency record cleanup failed: {err:#}");
        }
        info!(user_id = %user_id, escalation_cancelled, "safe confirmation");

        let event = SafetyEvent::state_change(user_id, "user_confirmed_safe");
        let decision = self.submit_event(&event).await;
        ConfirmSafeOutcome {
            escalation_cancelled,
            decision,
        }
    }

    pub async fn user_state(&self, user_id: &str) -> UserState {
        self.engine.user_state(user_id).await
    }

    pub fn decisions(&self, user_id: &str, limit: usize) -> Vec<Decision> {
        self.engine.decisions(user_id, limit)
    }

    pub fn active_escalation(&self, user_id: &str) -> Option<EscalationRecord> {
        self.guardian.active_record(user_id)
    }

    pub fn guardian(&self) -> &PhaseController {
        &self.guardian
    }

    pub fn channels(&self) -> &Arc<dyn SafetyChannels> {
        &self.channels
    }
}

#[async_trait]
impl EventSink for SafetyCore {
    async fn submit(&self, event: SafetyEvent) -> Result<()> {
        self.submit_event(&event).await;
        Ok(())
    }
}
