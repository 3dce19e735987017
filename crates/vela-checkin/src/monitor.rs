//! Sweep logic: finds due check-ins, reminds on time, and escalates
//! after the grace window.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use vela_core::current_unix_timestamp_ms;
use vela_engine::{CircleNotice, EventSink, SafetyChannels, SafetyEvent, Urgency};

use crate::exit::{ExitStatus, ScheduledExit};
use crate::store::ExitStore;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_GRACE_MINUTES: u64 = 10;

#[derive(Debug, Clone)]
/// Monitor tunables. The full-fleet sweep runs with no user filter;
/// a per-user monitor narrows the scan to one user's exits.
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub grace_minutes: u64,
    pub user_filter: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_minutes: DEFAULT_GRACE_MINUTES,
            user_filter: None,
        }
    }
}

impl MonitorConfig {
    /// Fleet-wide sweep profile: slower cadence, every user's exits.
    pub fn sweep() -> Self {
        Self {
            poll_interval: DEFAULT_SWEEP_INTERVAL,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Counters for one sweep pass.
pub struct SweepReport {
    pub scanned: u64,
    pub malformed_skipped: u64,
    pub reminders_sent: u64,
    pub escalations_started: u64,
}

/// Periodic watcher over the exit store. Each sweep classifies every
/// monitorable exit by the delay of its earliest unconfirmed check-in:
/// zero minutes late means a reminder, past the grace window means the
/// failed-check-in protocol, anything in between waits.
pub struct CheckInMonitor {
    config: MonitorConfig,
    store: ExitStore,
    sink: Arc<dyn EventSink>,
    channels: Arc<dyn SafetyChannels>,
}

impl CheckInMonitor {
    pub fn new(
        config: MonitorConfig,
        store: ExitStore,
        sink: Arc<dyn EventSink>,
        channels: Arc<dyn SafetyChannels>,
    ) -> Self {
        Self {
            config,
            store,
            sink,
            channels,
        }
    }

    /// Runs sweeps forever at the configured interval until ctrl-c.
    pub async fn run(&self) -> Result<()> {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            grace_minutes = self.config.grace_minutes,
            "check-in monitor started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.poll_once(current_unix_timestamp_ms()).await {
                        Ok(report) => {
                            debug!(
                                scanned = report.scanned,
                                reminders = report.reminders_sent,
                                escalations = report.escalations_started,
                                "sweep complete"
                            );
                        }
                        Err(err) => warn!("sweep failed: {err:#}"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("check-in monitor shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// One sweep over the store at the given wall-clock instant.
    pub async fn poll_once(&self, now_unix_ms: u64) -> Result<SweepReport> {
        let scan = self.store.load_all()?;
        let mut report = SweepReport {
            malformed_skipped: scan.malformed_skipped,
            ..SweepReport::default()
        };

        for mut exit in scan.exits {
            if let Some(filter) = &self.config.user_filter {
                if &exit.user_id != filter {
                    continue;
                }
            }
            if !exit.is_monitorable() {
                continue;
            }
            report.scanned = report.scanned.saturating_add(1);

            let Some(due) = exit.next_due_check_in(now_unix_ms) else {
                continue;
            };

            if due.delay_minutes >= self.config.grace_minutes {
                self.escalate(&mut exit, due.offset_minutes, due.delay_minutes)
                    .await;
                report.escalations_started = report.escalations_started.saturating_add(1);
            } else if due.delay_minutes == 0 {
                self.remind(&mut exit, due.offset_minutes).await;
                report.reminders_sent = report.reminders_sent.saturating_add(1);
            }
        }
        Ok(report)
    }

    /// On-time reminder: ping the user and leave a low-urgency trace for
    /// the circle. The exit flips to active on its first due check-in.
    async fn remind(&self, exit: &mut ScheduledExit, offset_minutes: u32) {
        if exit.status == ExitStatus::Scheduled {
            exit.status = ExitStatus::Active;
            if let Err(err) = self.store.save(exit) {
                warn!(exit_id = %exit.id, "failed to mark exit active: {err:#}");
            }
        }
        info!(
            user_id = %exit.user_id,
            exit_id = %exit.id,
            offset_minutes,
            "check-in due, sending reminder"
        );
        let message = format!(
            "Check-in pendiente para '{}'{} ({} min). ¿Estás bien?",
            exit.title,
            place_suffix(exit),
            offset_minutes
        );
        if let Err(err) = self.channels.notify_user(&exit.user_id, &message).await {
            warn!(user_id = %exit.user_id, "check-in reminder failed: {err:#}");
        }
        let notice = CircleNotice::new(
            "Check-in programado",
            &format!(
                "Check-in de '{}'{} ({}) pendiente de confirmar.",
                exit.title,
                place_suffix(exit),
                exit.scheduled_at_text()
            ),
            Urgency::Low,
        );
        if let Err(err) = self.channels.notify_circle(&exit.user_id, &notice).await {
            warn!(user_id = %exit.user_id, "circle trace failed: {err:#}");
        }
    }

    /// Grace window exceeded: the alerted flag is persisted before the
    /// event is submitted. That ordering makes the flag the idempotency
    /// guard against repeated sweeps; a persist failure therefore skips
    /// the event rather than risk double escalation.
    async fn escalate(&self, exit: &mut ScheduledExit, offset_minutes: u32, delay_minutes: u64) {
        warn!(
            user_id = %exit.user_id,
            exit_id = %exit.id,
            offset_minutes,
            delay_minutes,
            "check-in missed past grace window"
        );
        exit.status = ExitStatus::Alerted;
        if let Err(err) = self.store.save(exit) {
            warn!(
                exit_id = %exit.id,
                "could not persist alerted flag, deferring escalation: {err:#}"
            );
            return;
        }

        let context = format!(
            "missed check-in for '{}' at +{} min ({} min late)",
            exit.title, offset_minutes, delay_minutes
        );
        let event = SafetyEvent::checkin_failed(&exit.user_id, &context);
        if let Err(err) = self.sink.submit(event).await {
            warn!(user_id = %exit.user_id, "failed check-in event rejected: {err:#}");
        }
    }
}

fn place_suffix(exit: &ScheduledExit) -> String {
    exit.place
        .as_deref()
        .map(|place| format!(" en {place}"))
        .unwrap_or_default()
}

/// User confirmation of one scheduled check-in. Persists the updated
/// exit, then reports the completion to the engine.
pub async fn confirm_check_in(
    store: &ExitStore,
    sink: &dyn EventSink,
    exit_id: &str,
    offset_minutes: u32,
) -> Result<ScheduledExit> {
    let Some(mut exit) = store.load(exit_id)? else {
        anyhow::bail!("no scheduled exit with id '{exit_id}'");
    };
    if !exit.required_offsets_minutes.contains(&offset_minutes) {
        anyhow::bail!(
            "offset {offset_minutes} is not part of exit '{exit_id}' ({:?})",
            exit.required_offsets_minutes
        );
    }

    let all_done = exit.complete_offset(offset_minutes);
    exit.status = if all_done {
        ExitStatus::Completed
    } else {
        ExitStatus::Active
    };
    store.save(&exit)?;
    info!(
        user_id = %exit.user_id,
        exit_id = %exit.id,
        offset_minutes,
        completed = all_done,
        "check-in confirmed"
    );

    let context = format!(
        "check-in confirmed for '{}' at +{} min",
        exit.title, offset_minutes
    );
    let event = SafetyEvent::checkin_completed(&exit.user_id, &context);
    if let Err(err) = sink.submit(event).await {
        warn!(user_id = %exit.user_id, "completion event rejected: {err:#}");
    }
    Ok(exit)
}
