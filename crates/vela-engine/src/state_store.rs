//! Per-user escalation tier plus a bounded rolling event history.
//!
//! The store is the only shared mutable resource in the engine. Lookups are
//! keyed by user id; each user's state sits behind its own async mutex so
//! one user's read-modify-write is serialized while other users proceed in
//! parallel. The store never calls out externally.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::event::{EventKind, SafetyEvent};

/// Default rolling history window: 120 minutes.
pub const DEFAULT_EVENT_WINDOW_MS: u64 = 120 * 60 * 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Per-user escalation level inside the rules engine.
pub enum EscalationTier {
    Observing,
    Verifying,
    CircleAlerted,
    FullSos,
}

impl EscalationTier {
    pub fn ordinal(self) -> u8 {
        match self {
            EscalationTier::Observing => 0,
            EscalationTier::Verifying => 1,
            EscalationTier::CircleAlerted => 2,
            EscalationTier::FullSos => 3,
        }
    }

    /// The tier one step above this one, if any.
    pub fn next(self) -> Option<EscalationTier> {
        match self {
            EscalationTier::Observing => Some(EscalationTier::Verifying),
            EscalationTier::Verifying => Some(EscalationTier::CircleAlerted),
            EscalationTier::CircleAlerted => Some(EscalationTier::FullSos),
            EscalationTier::FullSos => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Compact history entry retained inside the rolling window.
pub struct HistoryEntry {
    pub event_id: String,
    pub kind: EventKind,
    pub timestamp_unix_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One user's escalation state. Created lazily on first event.
pub struct UserState {
    pub user_id: String,
    pub tier: EscalationTier,
    pub last_updated_unix_ms: u64,
    pub history: Vec<HistoryEntry>,
}

/// Outcome of a tier transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierTransition {
    Applied,
    Unchanged,
    RejectedSkip,
}

impl UserState {
    fn new(user_id: &str, now_unix_ms: u64) -> Self {
        Self {
            user_id: user_id.to_string(),
            tier: EscalationTier::Observing,
            last_updated_unix_ms: now_unix_ms,
            history: Vec::new(),
        }
    }

    /// Appends a history entry and prunes entries older than `window_ms`.
    pub fn record_event(&mut self, event: &SafetyEvent, now_unix_ms: u64, window_ms: u64) {
        self.history.push(HistoryEntry {
            event_id: event.id.clone(),
            kind: event.kind,
            timestamp_unix_ms: event.timestamp_unix_ms,
            context: event.metadata.context.clone(),
        });
        self.history
            .retain(|entry| now_unix_ms.saturating_sub(entry.timestamp_unix_ms) < window_ms);
    }

    /// Requests a tier transition, enforcing the monotonic-step invariant:
    /// anything other than a reset to `Observing` may climb at most one
    /// step. A rejected skip leaves state unchanged and surfaces a warning,
    /// never an error.
    pub fn set_tier(&mut self, tier: EscalationTier, now_unix_ms: u64) -> TierTransition {
        if tier != EscalationTier::Observing && tier.ordinal() > self.tier.ordinal() + 1 {
            warn!(
                user_id = %self.user_id,
                from = ?self.tier,
                to = ?tier,
                "tier skip rejected"
            );
            return TierTransition::RejectedSkip;
        }
        if tier == self.tier {
            return TierTransition::Unchanged;
        }
        self.tier = tier;
        self.last_updated_unix_ms = now_unix_ms;
        TierTransition::Applied
    }

    /// Forces the tier without the one-step guard. Reserved for the
    /// critical/manual-SOS path, which is allowed to jump straight to
    /// `FullSos`.
    pub fn force_tier(&mut self, tier: EscalationTier, now_unix_ms: u64) {
        if tier != self.tier {
            self.tier = tier;
            self.last_updated_unix_ms = now_unix_ms;
        }
    }

    /// Counts history entries of `kind` whose age is within `window_ms`.
    pub fn count_events_in_window(
        &self,
        kind: EventKind,
        window_ms: u64,
        now_unix_ms: u64,
    ) -> usize {
        self.recent_events(Some(kind), Some(window_ms), now_unix_ms)
            .len()
    }

    /// History entries within `window_ms` (default: the full retention
    /// window), optionally filtered by kind, oldest first.
    pub fn recent_events(
        &self,
        kind: Option<EventKind>,
        window_ms: Option<u64>,
        now_unix_ms: u64,
    ) -> Vec<&HistoryEntry> {
        let window = window_ms.unwrap_or(DEFAULT_EVENT_WINDOW_MS);
        self.history
            .iter()
            .filter(|entry| {
                let in_window = now_unix_ms.saturating_sub(entry.timestamp_unix_ms) < window;
                let kind_matches = kind.map(|wanted| entry.kind == wanted).unwrap_or(true);
                in_window && kind_matches
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
/// Tunables for the state store.
pub struct StateStoreConfig {
    pub event_window_ms: u64,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            event_window_ms: DEFAULT_EVENT_WINDOW_MS,
        }
    }
}

/// Keyed per-user state map. The outer lock is held only long enough to
/// fetch or create a user's entry; all real work happens under the
/// per-user mutex.
pub struct UserStateStore {
    config: StateStoreConfig,
    users: StdMutex<HashMap<String, Arc<Mutex<UserState>>>>,
}

impl UserStateStore {
    pub fn new(config: StateStoreConfig) -> Self {
        Self {
            config,
            users: StdMutex::new(HashMap::new()),
        }
    }

    pub fn event_window_ms(&self) -> u64 {
        self.config.event_window_ms
    }

    /// Fetches (lazily creating) the handle serializing one user's state.
    pub fn user(&self, user_id: &str, now_unix_ms: u64) -> Arc<Mutex<UserState>> {
        let mut users = self.users.lock().unwrap_or_else(|poisoned| {
            // A panic while holding the map lock cannot corrupt the map
            // itself; keep serving other users.
            poisoned.into_inner()
        });
        users
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(UserState::new(user_id, now_unix_ms))))
            .clone()
    }

    /// Point-in-time clone of one user's state.
    pub async fn snapshot(&self, user_id: &str, now_unix_ms: u64) -> UserState {
        let handle = self.user(user_id, now_unix_ms);
        let state = handle.lock().await;
        state.clone()
    }

    /// Applies a guarded tier transition outside of event processing.
    pub async fn set_tier(
        &self,
        user_id: &str,
        tier: EscalationTier,
        now_unix_ms: u64,
    ) -> TierTransition {
        let handle = self.user(user_id, now_unix_ms);
        let mut state = handle.lock().await;
        state.set_tier(tier, now_unix_ms)
    }
}
