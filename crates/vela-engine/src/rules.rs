//! Deterministic safety rules, ordered most severe first.
//!
//! Rules are pure evaluators over (event, user-state snapshot). The engine
//! consults them in order and stops at the first match.

use anyhow::Result;

use crate::action::{Action, EvidenceOptions, SosTrigger, Urgency};
use crate::event::{EventKind, RiskLevel, SafetyEvent};
use crate::state_store::{EscalationTier, UserState};

/// Free-text fragments that mark a diary entry as risk language.
pub const DIARY_TRIGGER_WORDS: &[&str] = &[
    "miedo",
    "no puedo",
    "me siento sola",
    "ayuda",
    "asustada",
    "peligro",
    "amenaza",
];

/// Window consulted for a recent diary entry: 60 minutes.
pub const DIARY_CORRELATION_WINDOW_MS: u64 = 60 * 60 * 1_000;

/// Window and threshold for repeated failed check-ins.
pub const CHECKIN_FAILURE_WINDOW_MS: u64 = 120 * 60 * 1_000;
pub const CHECKIN_FAILURE_THRESHOLD: usize = 2;

/// Silent-verification response timeout handed to the channel.
pub const SILENT_VERIFICATION_TIMEOUT_SECONDS: u64 = 180;

#[derive(Debug, Clone, PartialEq)]
/// Result of evaluating one rule against one event.
pub struct RuleOutcome {
    pub should_trigger: bool,
    pub actions: Vec<Action>,
    pub risk_level: RiskLevel,
}

impl RuleOutcome {
    pub fn no_match() -> Self {
        Self {
            should_trigger: false,
            actions: Vec::new(),
            risk_level: RiskLevel::Normal,
        }
    }

    pub fn triggered(actions: Vec<Action>, risk_level: RiskLevel) -> Self {
        Self {
            should_trigger: true,
            actions,
            risk_level,
        }
    }
}

/// A named, pure evaluator. Implementations must not perform side effects;
/// they only read the event and the state snapshot.
pub trait SafetyRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(
        &self,
        event: &SafetyEvent,
        state: &UserState,
        now_unix_ms: u64,
    ) -> Result<RuleOutcome>;
}

/// Rule 1: declared CRITICAL risk or a manual SOS escalates everything at
/// once, regardless of prior tier.
pub struct CriticalOrManualSosRule;

impl SafetyRule for CriticalOrManualSosRule {
    fn name(&self) -> &'static str {
        "critical_or_manual_sos"
    }

    fn evaluate(
        &self,
        event: &SafetyEvent,
        _state: &UserState,
        _now_unix_ms: u64,
    ) -> Result<RuleOutcome> {
        let is_critical = event.metadata.risk_level == RiskLevel::Critical;
        let is_manual = event.kind == EventKind::SosManual;
        if !is_critical && !is_manual {
            return Ok(RuleOutcome::no_match());
        }

        let trigger = if is_manual {
            SosTrigger::Manual
        } else {
            SosTrigger::Automatic
        };
        Ok(RuleOutcome::triggered(
            vec![
                Action::EscalateFullSos { trigger },
                Action::StartEvidenceRecording {
                    options: EvidenceOptions::default(),
                },
                Action::AlertTrustCircle {
                    reason: "SOS activado".to_string(),
                    urgency: Urgency::Critical,
                    include_tracking_link: true,
                },
            ],
            RiskLevel::Critical,
        ))
    }
}

/// Rule 2: an inactivity event correlated with a recent diary entry that
/// contains risk language alerts the trusted circle, but only while the
/// user is still in a low tier.
pub struct InactivityWithDiaryRiskRule;

impl SafetyRule for InactivityWithDiaryRiskRule {
    fn name(&self) -> &'static str {
        "inactivity_plus_diary_risk"
    }

    fn evaluate(
        &self,
        event: &SafetyEvent,
        state: &UserState,
        now_unix_ms: u64,
    ) -> Result<RuleOutcome> {
        if event.kind != EventKind::Inactivity {
            return Ok(RuleOutcome::no_match());
        }
        if !matches!(
            state.tier,
            EscalationTier::Observing | EscalationTier::Verifying
        ) {
            return Ok(RuleOutcome::no_match());
        }

        let risky_diary_entry = state
            .recent_events(
                Some(EventKind::DiaryEntry),
                Some(DIARY_CORRELATION_WINDOW_MS),
                now_unix_ms,
            )
            .into_iter()
            .any(|entry| {
                entry
                    .context
                    .as_deref()
                    .map(contains_trigger_word)
                    .unwrap_or(false)
            });
        if !risky_diary_entry {
            return Ok(RuleOutcome::no_match());
        }

        Ok(RuleOutcome::triggered(
            vec![Action::AlertTrustCircle {
                reason: "Inactividad detectada con contexto emocional de riesgo".to_string(),
                urgency: Urgency::High,
                include_tracking_link: false,
            }],
            RiskLevel::Risk,
        ))
    }
}

/// Rule 3: the second failed check-in inside 120 minutes asks for a silent
/// verification, but only from the observing tier.
pub struct CheckinFailedTwiceRule;

impl SafetyRule for CheckinFailedTwiceRule {
    fn name(&self) -> &'static str {
        "checkin_failed_twice"
    }

    fn evaluate(
        &self,
        event: &SafetyEvent,
        state: &UserState,
        now_unix_ms: u64,
    ) -> Result<RuleOutcome> {
        if event.kind != EventKind::CheckinFailed {
            return Ok(RuleOutcome::no_match());
        }
        if state.tier != EscalationTier::Observing {
            return Ok(RuleOutcome::no_match());
        }

        // The triggering event is already in history, so the count includes it.
        let failed = state.count_events_in_window(
            EventKind::CheckinFailed,
            CHECKIN_FAILURE_WINDOW_MS,
            now_unix_ms,
        );
        if failed < CHECKIN_FAILURE_THRESHOLD {
            return Ok(RuleOutcome::no_match());
        }

        Ok(RuleOutcome::triggered(
            vec![Action::SendSilentVerification {
                message: "¿Estás bien? Fallaste 2 check-ins recientes.".to_string(),
                timeout_seconds: SILENT_VERIFICATION_TIMEOUT_SECONDS,
            }],
            RiskLevel::Alert,
        ))
    }
}

/// The fixed rule list, priority order (most severe first). List order is
/// the documented tie-break: the first rule whose `should_trigger` is true
/// wins and later rules are not consulted.
pub fn canonical_rules() -> Vec<Box<dyn SafetyRule>> {
    vec![
        Box::new(CriticalOrManualSosRule),
        Box::new(InactivityWithDiaryRiskRule),
        Box::new(CheckinFailedTwiceRule),
    ]
}

fn contains_trigger_word(text: &str) -> bool {
    let lowered = text.to_lowercase();
    DIARY_TRIGGER_WORDS
        .iter()
        .any(|word| lowered.contains(word))
}
