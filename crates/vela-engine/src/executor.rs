//! Action executor: dispatches a decision's actions to the outbound
//! channels, isolating each action's failure.
//!
//! Dispatch is deliberately best effort with no transactionality or
//! rollback. One unreachable channel must not stop the remaining actions
//! of the same decision.

use std::sync::Arc;

use anyhow::Result;
use rand::Rng;
use tracing::{error, info};

use crate::action::{Action, Decision};
use crate::channels::{CircleNotice, SafetyChannels};

/// Alphabet for shareable emergency tokens. Ambiguous glyphs (I, O, 0, 1)
/// are excluded so the token survives being read aloud.
pub const EMERGENCY_TOKEN_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a minted emergency token.
pub const EMERGENCY_TOKEN_LEN: usize = 8;

/// Mints a short random alphanumeric token suitable for a shareable link.
pub fn mint_emergency_token() -> String {
    let mut rng = rand::thread_rng();
    (0..EMERGENCY_TOKEN_LEN)
        .map(|_| {
            let index = rng.gen_range(0..EMERGENCY_TOKEN_ALPHABET.len());
            EMERGENCY_TOKEN_ALPHABET[index] as char
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Per-decision dispatch counters.
pub struct ExecutionReport {
    pub dispatched: usize,
    pub failed: usize,
}

/// Thin adapter layer between decisions and external channels.
pub struct ActionExecutor {
    channels: Arc<dyn SafetyChannels>,
}

impl ActionExecutor {
    pub fn new(channels: Arc<dyn SafetyChannels>) -> Self {
        Self { channels }
    }

    /// Executes every action of `decision`. Each dispatch is wrapped so one
    /// failure is logged and the rest still run.
    pub async fn execute(&self, decision: &Decision) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for action in &decision.actions {
            match self.dispatch(&decision.user_id, action).await {
                Ok(()) => {
                    report.dispatched = report.dispatched.saturating_add(1);
                }
                Err(err) => {
                    report.failed = report.failed.saturating_add(1);
                    error!(
                        user_id = %decision.user_id,
                        decision_id = %decision.id,
                        action = ?action.kind(),
                        "action dispatch failed: {err:#}"
                    );
                }
            }
        }
        report
    }

    async fn dispatch(&self, user_id: &str, action: &Action) -> Result<()> {
        match action {
            Action::SendSilentVerification {
                message,
                timeout_seconds,
            } => {
                self.channels
                    .send_silent_verification(user_id, message, *timeout_seconds)
                    .await
            }
            Action::AlertTrustCircle {
                reason,
                urgency,
                include_tracking_link: _,
            } => {
                let notice = CircleNotice::new("Atención en tu círculo", reason, *urgency);
                self.channels.notify_circle(user_id, &notice).await
            }
            Action::EscalateFullSos { trigger } => {
                let token = mint_emergency_token();
                self.channels
                    .open_emergency(user_id, &token, *trigger)
                    .await?;
                info!(user_id = %user_id, token = %token, "emergency record opened");
                Ok(())
            }
            Action::StartEvidenceRecording { options } => {
                self.channels.start_evidence_capture(user_id, options).await
            }
            Action::StopEscalation => self.channels.close_emergency(user_id).await,
        }
    }
}
