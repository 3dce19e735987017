//! Outbound boundary of the core: side-effect channels to external
//! collaborators (push, telephony, emergency records, evidence capture).
//!
//! Implementations are free collaborators; the core only relies on these
//! semantic contracts and treats every call as fire-and-forget from the
//! perspective of event processing.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::{EvidenceOptions, SosTrigger, Urgency};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Human-readable notice delivered to the user's trusted circle.
pub struct CircleNotice {
    pub title: String,
    pub body: String,
    pub urgency: Urgency,
}

impl CircleNotice {
    pub fn new(title: &str, body: &str, urgency: Urgency) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            urgency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Prioritized emergency contact (lower priority value is called first).
pub struct EmergencyContact {
    pub name: String,
    pub phone: String,
    pub priority: u32,
}

#[async_trait]
/// Side-effect channels consumed by the executor and the phase controller.
pub trait SafetyChannels: Send + Sync {
    /// Deliver a notice to every member of the user's trusted circle.
    async fn notify_circle(&self, user_id: &str, notice: &CircleNotice) -> Result<()>;

    /// Plain reminder/notification to the user themself.
    async fn notify_user(&self, user_id: &str, message: &str) -> Result<()>;

    /// Quiet "are you ok?" prompt with a response timeout.
    async fn send_silent_verification(
        &self,
        user_id: &str,
        message: &str,
        timeout_seconds: u64,
    ) -> Result<()>;

    /// Open (or elevate) a shareable emergency record under `token`.
    async fn open_emergency(&self, user_id: &str, token: &str, trigger: SosTrigger) -> Result<()>;

    /// Clear the user's active emergency record.
    async fn close_emergency(&self, user_id: &str) -> Result<()>;

    /// Request that audio/video/location capture begin.
    async fn start_evidence_capture(
        &self,
        user_id: &str,
        options: &EvidenceOptions,
    ) -> Result<()>;

    /// Switch the user's location sharing to continuous.
    async fn enable_live_tracking(&self, user_id: &str) -> Result<()>;

    /// Publish a public read-only tracking reference.
    async fn publish_tracking_link(&self, user_id: &str, token: &str, url: &str) -> Result<()>;

    /// Place calls to prioritized contacts; returns how many were attempted.
    async fn place_calls(
        &self,
        user_id: &str,
        contacts: &[EmergencyContact],
        message: &str,
    ) -> Result<usize>;

    /// SMS fallback when call placement is unavailable.
    async fn send_sms(
        &self,
        user_id: &str,
        contacts: &[EmergencyContact],
        message: &str,
    ) -> Result<usize>;

    /// Size of the user's trusted circle (0 when none is configured).
    async fn trusted_circle_size(&self, user_id: &str) -> Result<usize>;

    /// Prioritized emergency contact list, most important first.
    async fn emergency_contacts(&self, user_id: &str) -> Result<Vec<EmergencyContact>>;
}

#[async_trait]
/// Entry point for event producers (UI actions, scheduler ticks, the
/// inactivity detector). Implemented by the runtime facade.
pub trait EventSink: Send + Sync {
    async fn submit(&self, event: crate::event::SafetyEvent) -> Result<()>;
}
