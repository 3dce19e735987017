//! Canonical safety event model.
//!
//! Events are immutable once created: producers (the check-in scheduler,
//! UI collaborators, the inactivity detector) build one and hand it to the
//! engine, which never mutates it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vela_core::current_unix_timestamp_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Computed or declared severity of a safety occurrence.
pub enum RiskLevel {
    Normal,
    Alert,
    Risk,
    Critical,
}

impl RiskLevel {
    /// Persistence priority used when a decision is written to the audit log.
    pub fn storage_priority(self) -> &'static str {
        match self {
            RiskLevel::Normal => "low",
            RiskLevel::Alert => "medium",
            RiskLevel::Risk => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates the safety-relevant occurrences the engine understands.
pub enum EventKind {
    CheckinFailed,
    CheckinCompleted,
    Inactivity,
    DiaryEntry,
    StateChange,
    SosManual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Producer-supplied context attached to an event.
pub struct EventMetadata {
    pub source: String,
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self {
            source: "app".to_string(),
            risk_level: RiskLevel::Normal,
            context: None,
            extra: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One safety-relevant occurrence for one user.
pub struct SafetyEvent {
    pub id: String,
    pub user_id: String,
    pub kind: EventKind,
    pub timestamp_unix_ms: u64,
    pub metadata: EventMetadata,
}

impl SafetyEvent {
    pub fn new(user_id: &str, kind: EventKind, metadata: EventMetadata) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind,
            timestamp_unix_ms: current_unix_timestamp_ms(),
            metadata,
        }
    }

    /// Manual panic trigger pressed by the user.
    pub fn manual_sos(user_id: &str) -> Self {
        Self::new(
            user_id,
            EventKind::SosManual,
            EventMetadata {
                source: "app".to_string(),
                risk_level: RiskLevel::Critical,
                context: None,
                extra: serde_json::Value::Null,
            },
        )
    }

    /// Free-text diary entry; the text rides along as context for rule predicates.
    pub fn diary_entry(user_id: &str, text: &str) -> Self {
        Self::new(
            user_id,
            EventKind::DiaryEntry,
            EventMetadata {
                context: Some(text.to_string()),
                ..EventMetadata::default()
            },
        )
    }

    /// Session-inactivity detection from a collaborator.
    pub fn inactivity(user_id: &str, source: &str) -> Self {
        Self::new(
            user_id,
            EventKind::Inactivity,
            EventMetadata {
                source: source.to_string(),
                ..EventMetadata::default()
            },
        )
    }

    /// Synthesized by the check-in scheduler when a required offset is overdue.
    pub fn checkin_failed(user_id: &str, context: &str) -> Self {
        Self::new(
            user_id,
            EventKind::CheckinFailed,
            EventMetadata {
                source: "checkin_monitor".to_string(),
                risk_level: RiskLevel::Alert,
                context: Some(context.to_string()),
                extra: serde_json::Value::Null,
            },
        )
    }

    /// Emitted when a user confirms a scheduled check-in.
    pub fn checkin_completed(user_id: &str, context: &str) -> Self {
        Self::new(
            user_id,
            EventKind::CheckinCompleted,
            EventMetadata {
                source: "checkin_monitor".to_string(),
                risk_level: RiskLevel::Normal,
                context: Some(context.to_string()),
                extra: serde_json::Value::Null,
            },
        )
    }

    /// System-sourced state change, e.g. the safe-confirmation reset.
    pub fn state_change(user_id: &str, context: &str) -> Self {
        Self::new(
            user_id,
            EventKind::StateChange,
            EventMetadata {
                source: "system".to_string(),
                risk_level: RiskLevel::Normal,
                context: Some(context.to_string()),
                extra: serde_json::Value::Null,
            },
        )
    }
}
