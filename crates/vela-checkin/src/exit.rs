//! Scheduled exits: user-declared appointments with required safety
//! check-in offsets.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vela_core::minutes_to_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Lifecycle of one scheduled exit.
pub enum ExitStatus {
    Scheduled,
    Active,
    /// The failed-check-in protocol already ran for this exit; repeated
    /// sweeps must not re-trigger it.
    Alerted,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One scheduled exit with its check-in plan.
pub struct ScheduledExit {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place: Option<String>,
    pub scheduled_at_unix_ms: u64,
    /// Fixed sorted list set at creation, e.g. [30, 60, 120].
    pub required_offsets_minutes: Vec<u32>,
    /// Grows monotonically as the user confirms.
    pub completed_offsets_minutes: Vec<u32>,
    pub status: ExitStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The earliest required offset that is past due and unconfirmed.
pub struct DueCheckIn {
    pub offset_minutes: u32,
    pub due_at_unix_ms: u64,
    pub delay_minutes: u64,
}

impl ScheduledExit {
    pub fn new(
        user_id: &str,
        title: &str,
        place: Option<String>,
        scheduled_at_unix_ms: u64,
        mut required_offsets_minutes: Vec<u32>,
    ) -> Self {
        required_offsets_minutes.sort_unstable();
        required_offsets_minutes.dedup();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            place,
            scheduled_at_unix_ms,
            required_offsets_minutes,
            completed_offsets_minutes: Vec::new(),
            status: ExitStatus::Scheduled,
        }
    }

    /// Whether the monitor should look at this exit at all.
    pub fn is_monitorable(&self) -> bool {
        matches!(self.status, ExitStatus::Scheduled | ExitStatus::Active)
    }

    /// Earliest required offset that is both past due and not yet
    /// confirmed. Future offsets end the scan; `None` means nothing is
    /// pending right now.
    pub fn next_due_check_in(&self, now_unix_ms: u64) -> Option<DueCheckIn> {
        for &offset in &self.required_offsets_minutes {
            if self.completed_offsets_minutes.contains(&offset) {
                continue;
            }
            let due_at_unix_ms = self
                .scheduled_at_unix_ms
                .saturating_add(minutes_to_ms(offset as u64));
            if due_at_unix_ms > now_unix_ms {
                return None;
            }
            return Some(DueCheckIn {
                offset_minutes: offset,
                due_at_unix_ms,
                delay_minutes: now_unix_ms.saturating_sub(due_at_unix_ms) / 60_000,
            });
        }
        None
    }

    /// Records a confirmed offset. Returns whether every required offset
    /// is now complete.
    pub fn complete_offset(&mut self, offset_minutes: u32) -> bool {
        if !self.completed_offsets_minutes.contains(&offset_minutes) {
            self.completed_offsets_minutes.push(offset_minutes);
            self.completed_offsets_minutes.sort_unstable();
        }
        self.required_offsets_minutes
            .iter()
            .all(|offset| self.completed_offsets_minutes.contains(offset))
    }

    /// Human-readable scheduled time for notices.
    pub fn scheduled_at_text(&self) -> String {
        DateTime::from_timestamp_millis(self.scheduled_at_unix_ms as i64)
            .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| self.scheduled_at_unix_ms.to_string())
    }
}
