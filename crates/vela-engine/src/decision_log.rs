//! Decision audit log: bounded in-memory ring plus a best-effort durable
//! JSONL file.
//!
//! `append` must never fail from the caller's perspective. The ring is the
//! authoritative fast path for the running process; a durable-write failure
//! is logged and swallowed. Queries prefer the durable file and fall back
//! to the ring when it is unavailable.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;

use serde::{Deserialize, Serialize};
use tracing::error;

use vela_core::{append_jsonl_line, read_jsonl_records};

use crate::action::Decision;
use crate::event::RiskLevel;

/// Default in-memory ring capacity.
pub const DEFAULT_MEMORY_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
/// Tunables for the audit log.
pub struct DecisionLogConfig {
    pub memory_capacity: usize,
    /// JSONL file receiving every decision; `None` keeps the log memory-only.
    pub durable_path: Option<PathBuf>,
}

impl Default for DecisionLogConfig {
    fn default() -> Self {
        Self {
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            durable_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
/// Durable audit row: the decision plus its storage priority.
struct DecisionAuditRow {
    priority: &'static str,
    #[serde(flatten)]
    decision: Decision,
}

#[derive(Debug, Clone, Deserialize)]
struct DecisionAuditRowOwned {
    #[allow(dead_code)]
    priority: String,
    #[serde(flatten)]
    decision: Decision,
}

/// Append-only decision record.
pub struct DecisionLog {
    config: DecisionLogConfig,
    ring: StdMutex<VecDeque<Decision>>,
}

impl DecisionLog {
    pub fn new(config: DecisionLogConfig) -> Self {
        let capacity = config.memory_capacity.max(1);
        Self {
            config: DecisionLogConfig {
                memory_capacity: capacity,
                ..config
            },
            ring: StdMutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Records a decision. The in-memory path always succeeds; the durable
    /// write is best effort and never blocks or fails the caller.
    pub fn append(&self, decision: &Decision) {
        {
            let mut ring = self
                .ring
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if ring.len() >= self.config.memory_capacity {
                ring.pop_front();
            }
            ring.push_back(decision.clone());
        }

        if let Some(path) = self.config.durable_path.as_ref() {
            let row = DecisionAuditRow {
                priority: priority_of(decision.computed_risk_level),
                decision: decision.clone(),
            };
            if let Err(err) = append_jsonl_line(path, &row) {
                error!(
                    decision_id = %decision.id,
                    path = %path.display(),
                    "durable decision write failed: {err:#}"
                );
            }
        }
    }

    /// Most-recent-first decisions for one user. Reads the durable file
    /// when configured and readable, otherwise serves the ring.
    pub fn query(&self, user_id: &str, limit: usize) -> Vec<Decision> {
        let limit = limit.max(1);
        if let Some(path) = self.config.durable_path.as_ref() {
            match read_jsonl_records::<DecisionAuditRowOwned>(path) {
                Ok(rows) => {
                    let mut decisions = rows
                        .into_iter()
                        .map(|row| row.decision)
                        .filter(|decision| decision.user_id == user_id)
                        .collect::<Vec<_>>();
                    decisions.reverse();
                    decisions.truncate(limit);
                    return decisions;
                }
                Err(err) => {
                    error!(
                        path = %path.display(),
                        "durable decision read failed, serving memory ring: {err:#}"
                    );
                }
            }
        }
        self.query_memory(user_id, limit)
    }

    fn query_memory(&self, user_id: &str, limit: usize) -> Vec<Decision> {
        let ring = self
            .ring
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ring.iter()
            .rev()
            .filter(|decision| decision.user_id == user_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of decisions currently held in memory.
    pub fn memory_len(&self) -> usize {
        self.ring
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

fn priority_of(risk: RiskLevel) -> &'static str {
    risk.storage_priority()
}
