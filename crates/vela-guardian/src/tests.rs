//! Tests for phase transitions, auto-escalation timers, and cancellation
//! under a paused clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use vela_engine::{
    CircleNotice, EmergencyContact, EvidenceOptions, SafetyChannels, SosTrigger,
};

use super::{EscalationPhase, GuardianConfig, PhaseController};

struct StubChannels {
    calls: Mutex<Vec<String>>,
    circle_size: usize,
    calls_fail: bool,
}

impl StubChannels {
    fn new(circle_size: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            circle_size,
            calls_fail: false,
        }
    }

    fn with_failing_calls(circle_size: usize) -> Self {
        Self {
            calls_fail: true,
            ..Self::new(circle_size)
        }
    }

    fn record(&self, label: &str) {
        self.calls.lock().expect("lock").push(label.to_string());
    }

    fn recorded(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    fn count(&self, label: &str) -> usize {
        self.recorded()
            .iter()
            .filter(|entry| entry.as_str() == label)
            .count()
    }
}

#[async_trait]
impl SafetyChannels for StubChannels {
    async fn notify_circle(&self, _user_id: &str, _notice: &CircleNotice) -> Result<()> {
        self.record("notify_circle");
        Ok(())
    }

    async fn notify_user(&self, _user_id: &str, _message: &str) -> Result<()> {
        self.record("notify_user");
        Ok(())
    }

    async fn send_silent_verification(
        &self,
        _user_id: &str,
        _message: &str,
        _timeout_seconds: u64,
    ) -> Result<()> {
        self.record("send_silent_verification");
        Ok(())
    }

    async fn open_emergency(
        &self,
        _user_id: &str,
        _token: &str,
        _trigger: SosTrigger,
    ) -> Result<()> {
        self.record("open_emergency");
        Ok(())
    }

    async fn close_emergency(&self, _user_id: &str) -> Result<()> {
        self.record("close_emergency");
        Ok(())
    }

    async fn start_evidence_capture(
        &self,
        _user_id: &str,
        _options: &EvidenceOptions,
    ) -> Result<()> {
        self.record("start_evidence_capture");
        Ok(())
    }

    async fn enable_live_tracking(&self, _user_id: &str) -> Result<()> {
        self.record("enable_live_tracking");
        Ok(())
    }

    async fn publish_tracking_link(
        &self,
        _user_id: &str,
        _token: &str,
        url: &str,
    ) -> Result<()> {
        self.record(&format!("publish_tracking_link:{url}"));
        Ok(())
    }

    async fn place_calls(
        &self,
        _user_id: &str,
        contacts: &[EmergencyContact],
        _message: &str,
    ) -> Result<usize> {
        if self.calls_fail {
            self.record("place_calls:failed");
            bail!("telephony unavailable");
        }
        self.record("place_calls");
        Ok(contacts.len())
    }

    async fn send_sms(
        &self,
        _user_id: &str,
        contacts: &[EmergencyContact],
        _message: &str,
    ) -> Result<usize> {
        self.record("send_sms");
        Ok(contacts.len())
    }

    async fn trusted_circle_size(&self, _user_id: &str) -> Result<usize> {
        Ok(self.circle_size)
    }

    async fn emergency_contacts(&self, _user_id: &str) -> Result<Vec<EmergencyContact>> {
        Ok(vec![
            EmergencyContact {
                name: "Ana".to_string(),
                phone: "+34600000001".to_string(),
                priority: 1,
            },
            EmergencyContact {
                name: "Luz".to_string(),
                phone: "+34600000002".to_string(),
                priority: 2,
            },
        ])
    }
}

fn controller(channels: Arc<StubChannels>) -> PhaseController {
    PhaseController::new(GuardianConfig::default(), channels)
}

#[tokio::test(start_paused = true)]
async fn functional_phase1_auto_advances_through_phase2_to_phase3() {
    let channels = Arc::new(StubChannels::new(2));
    let guardian = controller(channels.clone());

    let phase = guardian.request_circle_alert("user-1", "circle_alert").await;
    assert_eq!(phase, EscalationPhase::SoftCircleAlert);
    let record = guardian.active_record("user-1").expect("active record");
    assert_eq!(record.phase, EscalationPhase::SoftCircleAlert);
    assert!(!record.cancelled);

    // 5-minute timer fires without a safe confirmation.
    tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
    let record = guardian.active_record("user-1").expect("active record");
    assert_eq!(record.phase, EscalationPhase::DirectContact);
    assert_eq!(channels.count("enable_live_tracking"), 1);
    assert_eq!(channels.count("place_calls"), 1);

    // 10-minute timer advances to full activation.
    tokio::time::sleep(Duration::from_secs(10 * 60 + 1)).await;
    let record = guardian.active_record("user-1").expect("active record");
    assert_eq!(record.phase, EscalationPhase::PublicActivation);
    assert_eq!(channels.count("start_evidence_capture"), 1);
    assert!(channels
        .recorded()
        .iter()
        .any(|entry| entry.starts_with("publish_tracking_link:https://vela.app/tracking/")));

    // Phase 3 arms no further timer.
    tokio::time::sleep(Duration::from_secs(60 * 60)).await;
    let record = guardian.active_record("user-1").expect("active record");
    assert_eq!(record.phase, EscalationPhase::PublicActivation);
}

#[tokio::test(start_paused = true)]
async fn functional_confirm_safe_cancels_pending_timer() {
    let channels = Arc::new(StubChannels::new(2));
    let guardian = controller(channels.clone());

    guardian.request_circle_alert("user-1", "circle_alert").await;
    tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
    assert_eq!(
        guardian.active_record("user-1").expect("record").phase,
        EscalationPhase::DirectContact
    );

    // Mid-Phase-2 confirmation: the 10-minute timer must never fire.
    assert!(guardian.confirm_safe("user-1"));
    assert!(guardian.active_record("user-1").is_none());

    tokio::time::sleep(Duration::from_secs(60 * 60)).await;
    assert!(guardian.active_record("user-1").is_none());
    assert_eq!(channels.count("start_evidence_capture"), 0);
}

#[tokio::test(start_paused = true)]
async fn functional_critical_decisions_enter_phase3_directly() {
    let channels = Arc::new(StubChannels::new(2));
    let guardian = controller(channels.clone());

    let phase = guardian
        .request_full_activation("user-1", "critical_or_manual_sos")
        .await;
    assert_eq!(phase, EscalationPhase::PublicActivation);
    assert_eq!(channels.count("start_evidence_capture"), 1);
    // Phases 1 and 2 were skipped entirely.
    assert_eq!(channels.count("place_calls"), 0);
    assert_eq!(channels.count("enable_live_tracking"), 0);
}

#[tokio::test(start_paused = true)]
async fn functional_empty_circle_skips_phase1() {
    let channels = Arc::new(StubChannels::new(0));
    let guardian = controller(channels.clone());

    let phase = guardian.request_circle_alert("user-1", "circle_alert").await;
    assert_eq!(phase, EscalationPhase::DirectContact);
    assert_eq!(channels.count("enable_live_tracking"), 1);
}

#[tokio::test(start_paused = true)]
async fn functional_call_failure_falls_back_to_sms() {
    let channels = Arc::new(StubChannels::with_failing_calls(0));
    let guardian = controller(channels.clone());

    guardian.request_circle_alert("user-1", "circle_alert").await;
    assert_eq!(channels.count("place_calls:failed"), 1);
    assert_eq!(channels.count("send_sms"), 1);
}

#[tokio::test(start_paused = true)]
async fn unit_repeated_circle_alert_keeps_current_phase() {
    let channels = Arc::new(StubChannels::new(2));
    let guardian = controller(channels.clone());

    guardian.request_circle_alert("user-1", "circle_alert").await;
    let before = channels.recorded().len();
    let phase = guardian.request_circle_alert("user-1", "circle_alert").await;
    assert_eq!(phase, EscalationPhase::SoftCircleAlert);
    assert_eq!(channels.recorded().len(), before, "no duplicate side effects");
}

#[tokio::test(start_paused = true)]
async fn unit_stale_timer_cannot_resurrect_cancelled_escalation() {
    let channels = Arc::new(StubChannels::new(2));
    let guardian = controller(channels.clone());

    // First phase entry takes generation 1 from the controller counter.
    guardian.request_circle_alert("user-1", "circle_alert").await;
    assert!(guardian.confirm_safe("user-1"));

    // A timer that fired just before the confirmation removed the entry
    // re-checks under the lock and must find nothing to advance.
    guardian
        .enter_phase_guarded(
            "user-1",
            EscalationPhase::DirectContact,
            "auto_escalation_timeout",
            Some(1),
        )
        .await;
    assert!(guardian.active_record("user-1").is_none());
    assert_eq!(channels.count("enable_live_tracking"), 0);

    // A fresh escalation after the cancellation gets a new generation,
    // so the same stale timer cannot advance it either.
    guardian.request_circle_alert("user-1", "circle_alert").await;
    guardian
        .enter_phase_guarded(
            "user-1",
            EscalationPhase::PublicActivation,
            "auto_escalation_timeout",
            Some(1),
        )
        .await;
    assert_eq!(
        guardian.active_record("user-1").expect("record").phase,
        EscalationPhase::SoftCircleAlert
    );
    assert_eq!(channels.count("start_evidence_capture"), 0);
}

#[tokio::test(start_paused = true)]
async fn unit_confirm_safe_without_escalation_is_a_noop() {
    let channels = Arc::new(StubChannels::new(2));
    let guardian = controller(channels);
    assert!(!guardian.confirm_safe("user-1"));
}

#[tokio::test(start_paused = true)]
async fn unit_users_escalate_independently() {
    let channels = Arc::new(StubChannels::new(2));
    let guardian = controller(channels);

    guardian.request_circle_alert("user-1", "circle_alert").await;
    guardian
        .request_full_activation("user-2", "critical_or_manual_sos")
        .await;

    assert_eq!(
        guardian.active_record("user-1").expect("record").phase,
        EscalationPhase::SoftCircleAlert
    );
    assert_eq!(
        guardian.active_record("user-2").expect("record").phase,
        EscalationPhase::PublicActivation
    );
    assert!(guardian.confirm_safe("user-1"));
    assert!(guardian.active_record("user-2").is_some());
}
