//! Full-pipeline scenarios over the runtime facade: events in, decisions
//! and outbound channel traffic out.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use vela_checkin::{CheckInMonitor, ExitStore, MonitorConfig, ScheduledExit};
use vela_engine::{
    ActionKind, DecisionLogConfig, EngineConfig, EscalationTier, RiskLevel, SafetyEvent,
};
use vela_guardian::{EscalationPhase, GuardianConfig};
use vela_runtime::{CoreConfig, FileChannels, SafetyCore};

const MINUTE_MS: u64 = 60_000;

struct Harness {
    temp: TempDir,
    core: Arc<SafetyCore>,
    channels: Arc<FileChannels>,
}

fn harness() -> Harness {
    let temp = tempfile::tempdir().expect("tempdir");
    let channels = Arc::new(FileChannels::new(temp.path().join("state")));
    channels
        .set_trusted_circle("user-1", &["ana".to_string(), "luz".to_string()])
        .expect("circle");
    let config = CoreConfig {
        engine: EngineConfig {
            log: DecisionLogConfig {
                durable_path: Some(temp.path().join("state/decisions.jsonl")),
                ..DecisionLogConfig::default()
            },
            ..EngineConfig::default()
        },
        guardian: GuardianConfig::default(),
    };
    let core = Arc::new(SafetyCore::new(config, channels.clone()));
    Harness {
        temp,
        core,
        channels,
    }
}

fn outbox_channels(harness: &Harness, user_id: &str) -> Vec<String> {
    harness
        .channels
        .outbox(user_id)
        .expect("outbox")
        .into_iter()
        .map(|record| record.channel)
        .collect()
}

// Two missed check-ins within the failure window move the user into
// quiet verification, never a loud alert.
#[tokio::test]
async fn scenario_repeated_checkin_failures_end_in_silent_verification() {
    let harness = harness();
    let store = ExitStore::new(harness.temp.path().join("exits"));
    let monitor = CheckInMonitor::new(
        MonitorConfig::default(),
        ExitStore::new(harness.temp.path().join("exits")),
        harness.core.clone(),
        harness.channels.clone(),
    );

    store
        .save(&ScheduledExit::new("user-1", "cita médica", None, 0, vec![30]))
        .expect("save");
    store
        .save(&ScheduledExit::new(
            "user-1",
            "vuelta a casa",
            Some("centro".to_string()),
            0,
            vec![45],
        ))
        .expect("save");

    let report = monitor.poll_once(60 * MINUTE_MS).await.expect("sweep");
    assert_eq!(report.escalations_started, 2);

    let state = harness.core.user_state("user-1").await;
    assert_eq!(state.tier, EscalationTier::Verifying);

    let names = outbox_channels(&harness, "user-1");
    assert!(names.iter().any(|name| name == "silent_verification"));
    // The guardian starts its soft sequence on the first missed
    // check-in; no emergency record is opened at this stage.
    assert_eq!(
        harness.core.active_escalation("user-1").expect("record").phase,
        EscalationPhase::SoftCircleAlert
    );
    assert!(harness
        .channels
        .active_emergency("user-1")
        .expect("read")
        .is_none());

    // Repeated sweeps stay quiet thanks to the per-exit alerted flag.
    let report = monitor.poll_once(61 * MINUTE_MS).await.expect("sweep");
    assert_eq!(report.escalations_started, 0);
}

// A risky diary entry followed by inactivity alerts the circle and
// starts the guardian's soft phase.
#[tokio::test]
async fn scenario_risky_diary_plus_inactivity_alerts_the_circle() {
    let harness = harness();

    let diary = harness
        .core
        .submit_event(&SafetyEvent::diary_entry(
            "user-1",
            "hoy tengo miedo de volver sola",
        ))
        .await;
    assert!(diary.applied_rule.is_none(), "diary alone triggers nothing");

    let decision = harness
        .core
        .submit_event(&SafetyEvent::inactivity("user-1", "session_monitor"))
        .await;
    assert_eq!(
        decision.applied_rule.as_deref(),
        Some("inactivity_plus_diary_risk")
    );
    assert!(decision.has_action(ActionKind::AlertTrustCircle));
    assert_eq!(decision.computed_risk_level, RiskLevel::Risk);

    let state = harness.core.user_state("user-1").await;
    assert_eq!(state.tier, EscalationTier::CircleAlerted);
    assert_eq!(
        harness.core.active_escalation("user-1").expect("record").phase,
        EscalationPhase::SoftCircleAlert
    );
    assert!(outbox_channels(&harness, "user-1")
        .iter()
        .any(|name| name == "circle"));
}

// Manual SOS: straight to full activation regardless of prior state.
#[tokio::test]
async fn scenario_manual_sos_jumps_every_intermediate_level() {
    let harness = harness();

    let decision = harness
        .core
        .submit_event(&SafetyEvent::manual_sos("user-1"))
        .await;
    assert_eq!(
        decision.applied_rule.as_deref(),
        Some("critical_or_manual_sos")
    );
    assert!(decision.has_action(ActionKind::EscalateFullSos));
    assert!(decision.has_action(ActionKind::AlertTrustCircle));
    assert!(decision.has_action(ActionKind::StartEvidenceRecording));

    let state = harness.core.user_state("user-1").await;
    assert_eq!(state.tier, EscalationTier::FullSos);
    assert_eq!(
        harness.core.active_escalation("user-1").expect("record").phase,
        EscalationPhase::PublicActivation
    );

    let names = outbox_channels(&harness, "user-1");
    assert!(names.iter().any(|name| name == "emergency_open"));
    assert!(names.iter().any(|name| name == "tracking_link"));
    let emergency = harness
        .channels
        .active_emergency("user-1")
        .expect("read")
        .expect("open");
    assert_eq!(emergency.token.len(), 8);
}

// Unattended circle alert climbs phase by phase on its own timers.
#[tokio::test(start_paused = true)]
async fn scenario_unattended_alert_escalates_phase_by_phase() {
    let harness = harness();

    harness
        .core
        .submit_event(&SafetyEvent::diary_entry("user-1", "siento peligro"))
        .await;
    harness
        .core
        .submit_event(&SafetyEvent::inactivity("user-1", "session_monitor"))
        .await;
    assert_eq!(
        harness.core.active_escalation("user-1").expect("record").phase,
        EscalationPhase::SoftCircleAlert
    );

    tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
    assert_eq!(
        harness.core.active_escalation("user-1").expect("record").phase,
        EscalationPhase::DirectContact
    );
    assert!(outbox_channels(&harness, "user-1")
        .iter()
        .any(|name| name == "live_tracking"));

    tokio::time::sleep(Duration::from_secs(10 * 60 + 1)).await;
    assert_eq!(
        harness.core.active_escalation("user-1").expect("record").phase,
        EscalationPhase::PublicActivation
    );
    assert!(outbox_channels(&harness, "user-1")
        .iter()
        .any(|name| name == "tracking_link"));
}

// "Estoy bien" stops everything: escalation, tier, emergency record.
#[tokio::test(start_paused = true)]
async fn scenario_safe_confirmation_stops_a_running_escalation() {
    let harness = harness();

    harness
        .core
        .submit_event(&SafetyEvent::diary_entry("user-1", "siento una amenaza"))
        .await;
    harness
        .core
        .submit_event(&SafetyEvent::inactivity("user-1", "session_monitor"))
        .await;

    let outcome = harness.core.confirm_safe("user-1").await;
    assert!(outcome.escalation_cancelled);
    assert!(harness.core.active_escalation("user-1").is_none());
    assert_eq!(
        harness.core.user_state("user-1").await.tier,
        EscalationTier::Observing
    );

    // Long after the would-be timers, nothing has advanced.
    tokio::time::sleep(Duration::from_secs(60 * 60)).await;
    assert!(harness.core.active_escalation("user-1").is_none());
    let names = outbox_channels(&harness, "user-1");
    assert!(!names.iter().any(|name| name == "tracking_link"));
}

// The durable decision log survives on disk and reads newest first.
#[tokio::test]
async fn scenario_decision_audit_survives_on_disk() {
    let harness = harness();

    harness
        .core
        .submit_event(&SafetyEvent::diary_entry("user-1", "todo tranquilo"))
        .await;
    harness
        .core
        .submit_event(&SafetyEvent::manual_sos("user-1"))
        .await;

    let decisions = harness.core.decisions("user-1", 10);
    assert_eq!(decisions.len(), 2);
    assert_eq!(
        decisions[0].applied_rule.as_deref(),
        Some("critical_or_manual_sos"),
        "newest first"
    );

    let raw = std::fs::read_to_string(harness.temp.path().join("state/decisions.jsonl"))
        .expect("durable log");
    assert_eq!(raw.lines().count(), 2);
    let first: serde_json::Value = serde_json::from_str(raw.lines().next().expect("line"))
        .expect("json");
    assert_eq!(first["priority"], "low");
    assert_eq!(first["user_id"], "user-1");
}
