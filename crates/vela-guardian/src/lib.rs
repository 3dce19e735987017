//! Phase escalation controller: guardian-side response intensity.
//!
//! A second, coarser state machine layered on top of tier transitions.
//! Phase 1 softly alerts the trusted circle, Phase 2 places calls and
//! turns on continuous location sharing, Phase 3 publishes a public
//! tracking link and requests continuous evidence capture. Entering
//! Phase 1 or 2 arms an auto-escalation timer; a safe confirmation
//! cancels the active record and any pending timer. Critical decisions
//! may enter Phase 3 directly; this is the one state machine in the
//! system where skipping levels is allowed. Phases never mutate the
//! rules-engine tier.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use vela_core::current_unix_timestamp_ms;

use vela_engine::{
    mint_emergency_token, CircleNotice, EvidenceOptions, SafetyChannels, Urgency,
};

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Guardian-side escalation phase.
pub enum EscalationPhase {
    /// Phase 1: soft notice to the trusted circle.
    SoftCircleAlert,
    /// Phase 2: direct contact attempts plus continuous location sharing.
    DirectContact,
    /// Phase 3: public tracking link, continuous evidence capture, and
    /// external notification.
    PublicActivation,
}

impl EscalationPhase {
    pub fn number(self) -> u8 {
        match self {
            EscalationPhase::SoftCircleAlert => 1,
            EscalationPhase::DirectContact => 2,
            EscalationPhase::PublicActivation => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Snapshot of one user's active escalation.
pub struct EscalationRecord {
    pub user_id: String,
    pub phase: EscalationPhase,
    pub started_at_unix_ms: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
/// Controller tunables. Production values are 5 and 10 minutes; tests
/// inject short durations and drive them under a paused clock.
pub struct GuardianConfig {
    pub phase1_auto_advance: Duration,
    pub phase2_auto_advance: Duration,
    pub tracking_base_url: String,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            phase1_auto_advance: Duration::from_secs(5 * 60),
            phase2_auto_advance: Duration::from_secs(10 * 60),
            tracking_base_url: "https://vela.app/tracking".to_string(),
        }
    }
}

struct ActiveEscalation {
    record: EscalationRecord,
    /// Renewed on every phase entry from a controller-wide counter, so a
    /// generation is never reused even across cancel-and-restart. A timer
    /// only advances the phase when its captured generation still
    /// matches, so a cancellation or a newer transition strictly before
    /// firing wins the race.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct ControllerInner {
    config: GuardianConfig,
    channels: Arc<dyn SafetyChannels>,
    active: StdMutex<HashMap<String, ActiveEscalation>>,
    next_generation: AtomicU64,
}

#[derive(Clone)]
/// Timed, cancellable, multi-step escalation sequences, one per user.
pub struct PhaseController {
    inner: Arc<ControllerInner>,
}

impl PhaseController {
    pub fn new(config: GuardianConfig, channels: Arc<dyn SafetyChannels>) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                config,
                channels,
                active: StdMutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Requests Phase 1 for a circle-alert class decision. A user whose
    /// escalation is already running keeps their current (equal or higher)
    /// phase. An empty trusted circle skips straight to Phase 2: there is
    /// nobody to soft-alert.
    pub async fn request_circle_alert(&self, user_id: &str, reason: &str) -> EscalationPhase {
        if let Some(record) = self.active_record(user_id) {
            info!(
                user_id = %user_id,
                phase = record.phase.number(),
                "escalation already active, ignoring circle-alert request"
            );
            return record.phase;
        }

        let circle_size = match self.inner.channels.trusted_circle_size(user_id).await {
            Ok(size) => size,
            Err(err) => {
                warn!(user_id = %user_id, "trusted circle lookup failed: {err:#}");
                0
            }
        };
        if circle_size == 0 {
            warn!(user_id = %user_id, "no trusted circle, entering phase 2 directly");
            self.enter_phase(user_id, EscalationPhase::DirectContact, reason)
                .await;
            return EscalationPhase::DirectContact;
        }

        self.enter_phase(user_id, EscalationPhase::SoftCircleAlert, reason)
            .await;
        EscalationPhase::SoftCircleAlert
    }

    /// Requests Phase 3 directly for a critical/manual-SOS decision.
    pub async fn request_full_activation(&self, user_id: &str, reason: &str) -> EscalationPhase {
        if let Some(record) = self.active_record(user_id) {
            if record.phase == EscalationPhase::PublicActivation {
                return record.phase;
            }
        }
        self.enter_phase(user_id, EscalationPhase::PublicActivation, reason)
            .await;
        EscalationPhase::PublicActivation
    }

    /// Safe confirmation: cancels the active record and any pending timer.
    /// Returns whether an escalation was active. A timer that already began
    /// its transition is allowed to complete; one that has not fired yet is
    /// prevented.
    pub fn confirm_safe(&self, user_id: &str) -> bool {
        let mut active = lock(&self.inner.active);
        let Some(mut entry) = active.remove(user_id) else {
            return false;
        };
        entry.record.cancelled = true;
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }
        info!(
            user_id = %user_id,
            phase = entry.record.phase.number(),
            "escalation cancelled by safe confirmation"
        );
        true
    }

    /// Snapshot of the user's active escalation, if any.
    pub fn active_record(&self, user_id: &str) -> Option<EscalationRecord> {
        let active = lock(&self.inner.active);
        active.get(user_id).map(|entry| entry.record.clone())
    }

    async fn enter_phase(&self, user_id: &str, phase: EscalationPhase, reason: &str) {
        self.enter_phase_guarded(user_id, phase, reason, None).await;
    }

    /// Performs the transition and arms the next timer. When
    /// `expected_generation` is set (the timer path), the check against
    /// the live entry and the transition happen under one lock
    /// acquisition: a safe confirmation that removed the entry, or any
    /// newer transition, makes the stale timer a no-op instead of
    /// resurrecting the escalation.
    async fn enter_phase_guarded(
        &self,
        user_id: &str,
        phase: EscalationPhase,
        reason: &str,
        expected_generation: Option<u64>,
    ) {
        {
            let mut active = lock(&self.inner.active);
            let entry = match expected_generation {
                Some(generation) => {
                    let Some(entry) = active.get_mut(user_id) else {
                        info!(user_id = %user_id, "stale timer found no escalation, skipping");
                        return;
                    };
                    if entry.generation != generation || entry.record.cancelled {
                        info!(user_id = %user_id, "stale timer outlived its generation, skipping");
                        return;
                    }
                    entry
                }
                None => active
                    .entry(user_id.to_string())
                    .or_insert_with(|| ActiveEscalation {
                        record: EscalationRecord {
                            user_id: user_id.to_string(),
                            phase,
                            started_at_unix_ms: current_unix_timestamp_ms(),
                            cancelled: false,
                        },
                        generation: 0,
                        timer: None,
                    }),
            };
            entry.record.phase = phase;
            entry.record.started_at_unix_ms = current_unix_timestamp_ms();
            entry.record.cancelled = false;
            entry.generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
            let previous = entry.timer.take();
            if expected_generation.is_none() {
                // On the timer path the taken handle is the firing task
                // itself; aborting it here would cancel the phase effects
                // below at their first await.
                if let Some(previous) = previous {
                    previous.abort();
                }
            }

            let auto_advance = match phase {
                EscalationPhase::SoftCircleAlert => Some((
                    self.inner.config.phase1_auto_advance,
                    EscalationPhase::DirectContact,
                )),
                EscalationPhase::DirectContact => Some((
                    self.inner.config.phase2_auto_advance,
                    EscalationPhase::PublicActivation,
                )),
                EscalationPhase::PublicActivation => None,
            };
            if let Some((delay, next)) = auto_advance {
                entry.timer = Some(self.arm_timer(user_id.to_string(), entry.generation, delay, next));
            }
        }

        info!(
            user_id = %user_id,
            phase = phase.number(),
            reason = %reason,
            "phase entered"
        );
        self.run_phase_effects(user_id, phase).await;
    }

    fn arm_timer(
        &self,
        user_id: String,
        generation: u64,
        delay: Duration,
        next: EscalationPhase,
    ) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            controller
                .enter_phase_guarded(&user_id, next, "auto_escalation_timeout", Some(generation))
                .await;
        })
    }

    /// Per-phase side effects. Each outbound call is fire-and-forget: a
    /// failing channel is logged and the rest of the phase still runs.
    async fn run_phase_effects(&self, user_id: &str, phase: EscalationPhase) {
        let channels = &self.inner.channels;
        match phase {
            EscalationPhase::SoftCircleAlert => {
                let notice = CircleNotice::new(
                    "Atención en tu círculo",
                    "Podría necesitar apoyo. Te mantendremos informada.",
                    Urgency::Medium,
                );
                if let Err(err) = channels.notify_circle(user_id, &notice).await {
                    warn!(user_id = %user_id, "phase 1 circle notice failed: {err:#}");
                }
                self.system_notice(
                    user_id,
                    "No has confirmado que estás bien. Tu círculo fue notificado (Fase 1).",
                    Urgency::Medium,
                )
                .await;
            }
            EscalationPhase::DirectContact => {
                if let Err(err) = channels.enable_live_tracking(user_id).await {
                    warn!(user_id = %user_id, "live tracking activation failed: {err:#}");
                }

                let contacts = match channels.emergency_contacts(user_id).await {
                    Ok(contacts) => contacts,
                    Err(err) => {
                        warn!(user_id = %user_id, "emergency contact lookup failed: {err:#}");
                        Vec::new()
                    }
                };
                if contacts.is_empty() {
                    warn!(user_id = %user_id, "no emergency contacts configured");
                } else {
                    let message = "No ha respondido. Por favor, intenta contactarla.";
                    match channels.place_calls(user_id, &contacts, message).await {
                        Ok(placed) => {
                            info!(user_id = %user_id, placed, "emergency calls placed");
                        }
                        Err(err) => {
                            warn!(
                                user_id = %user_id,
                                "call placement failed, falling back to sms: {err:#}"
                            );
                            if let Err(err) = channels.send_sms(user_id, &contacts, message).await {
                                warn!(user_id = %user_id, "sms fallback failed: {err:#}");
                            }
                        }
                    }
                }

                let notice = CircleNotice::new(
                    "Situación que requiere atención",
                    "No ha respondido. Por favor, intenta contactarla.",
                    Urgency::High,
                );
                if let Err(err) = channels.notify_circle(user_id, &notice).await {
                    warn!(user_id = %user_id, "phase 2 circle notice failed: {err:#}");
                }
                self.system_notice(
                    user_id,
                    "Escalamiento Fase 2: se iniciaron llamadas automáticas a tus contactos de emergencia.",
                    Urgency::High,
                )
                .await;
            }
            EscalationPhase::PublicActivation => {
                let token = mint_emergency_token();
                let url = format!("{}/{}", self.inner.config.tracking_base_url, token);
                if let Err(err) = channels.publish_tracking_link(user_id, &token, &url).await {
                    warn!(user_id = %user_id, "public tracking publication failed: {err:#}");
                }
                if let Err(err) = channels
                    .start_evidence_capture(user_id, &EvidenceOptions::default())
                    .await
                {
                    warn!(user_id = %user_id, "continuous evidence request failed: {err:#}");
                }
                self.system_notice(
                    user_id,
                    &format!("SOS ACTIVADO. Tracking público activo: {url}"),
                    Urgency::Critical,
                )
                .await;
            }
        }
    }

    async fn system_notice(&self, user_id: &str, body: &str, urgency: Urgency) {
        let notice = CircleNotice::new("Sistema", body, urgency);
        if let Err(err) = self.inner.channels.notify_circle(user_id, &notice).await {
            warn!(user_id = %user_id, "system notice delivery failed: {err:#}");
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
