//! Declarative protective actions and the decisions that carry them.
//!
//! Actions are a closed enumeration: the executor matches exhaustively, so
//! adding a kind is a compile-time-checked change everywhere it matters.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vela_core::current_unix_timestamp_ms;

use crate::event::RiskLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Message urgency on the trusted-circle channel.
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// How a full SOS was triggered.
pub enum SosTrigger {
    Manual,
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Options for an evidence-capture request.
pub struct EvidenceOptions {
    pub record_audio: bool,
    pub record_video: bool,
    pub gps_interval_seconds: u64,
}

impl Default for EvidenceOptions {
    fn default() -> Self {
        Self {
            record_audio: true,
            record_video: false,
            gps_interval_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// One declarative instruction for the executor. Carries no behavior.
pub enum Action {
    SendSilentVerification {
        message: String,
        timeout_seconds: u64,
    },
    AlertTrustCircle {
        reason: String,
        urgency: Urgency,
        include_tracking_link: bool,
    },
    EscalateFullSos {
        trigger: SosTrigger,
    },
    StartEvidenceRecording {
        options: EvidenceOptions,
    },
    StopEscalation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Action discriminant, used for tier mapping and log fields.
pub enum ActionKind {
    SendSilentVerification,
    AlertTrustCircle,
    EscalateFullSos,
    StartEvidenceRecording,
    StopEscalation,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::SendSilentVerification { .. } => ActionKind::SendSilentVerification,
            Action::AlertTrustCircle { .. } => ActionKind::AlertTrustCircle,
            Action::EscalateFullSos { .. } => ActionKind::EscalateFullSos,
            Action::StartEvidenceRecording { .. } => ActionKind::StartEvidenceRecording,
            Action::StopEscalation => ActionKind::StopEscalation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Durable record of one event's rule-evaluation outcome. Created exactly
/// once per processed event; immutable; appended to the audit log and
/// never deleted.
pub struct Decision {
    pub id: String,
    pub user_id: String,
    pub triggered_by_event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_rule: Option<String>,
    pub actions: Vec<Action>,
    pub computed_risk_level: RiskLevel,
    pub timestamp_unix_ms: u64,
}

impl Decision {
    pub fn new(
        user_id: &str,
        triggered_by_event_id: &str,
        applied_rule: Option<String>,
        actions: Vec<Action>,
        computed_risk_level: RiskLevel,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            triggered_by_event_id: triggered_by_event_id.to_string(),
            applied_rule,
            actions,
            computed_risk_level,
            timestamp_unix_ms: current_unix_timestamp_ms(),
        }
    }

    pub fn has_action(&self, kind: ActionKind) -> bool {
        self.actions.iter().any(|action| action.kind() == kind)
    }
}
