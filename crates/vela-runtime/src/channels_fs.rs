//! Filesystem-backed channel implementation.
//!
//! Every outbound delivery becomes an appended JSONL record in the user's
//! outbox, so an operator (or a test) can replay exactly what left the
//! core and in what order. Circle membership and emergency contacts are
//! plain JSON documents under the same per-user directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use vela_core::{append_jsonl_line, current_unix_timestamp_ms, write_json_document};
use vela_engine::{
    CircleNotice, EmergencyContact, EvidenceOptions, SafetyChannels, SosTrigger,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
/// One delivered (or simulated) outbound message.
pub struct OutboxRecord {
    pub timestamp_unix_ms: u64,
    pub channel: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Active emergency document, one per user while an SOS is open.
pub struct EmergencyRecord {
    pub token: String,
    pub trigger: SosTrigger,
    pub opened_at_unix_ms: u64,
}

/// Channels rooted at a state directory:
///
/// ```text
/// <root>/users/<user-id>/outbox.jsonl
/// <root>/users/<user-id>/circle.json
/// <root>/users/<user-id>/contacts.json
/// <root>/users/<user-id>/emergency.json
/// ```
pub struct FileChannels {
    root: PathBuf,
}

impl FileChannels {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn user_dir(&self, user_id: &str) -> PathBuf {
        self.root.join("users").join(user_id)
    }

    fn outbox_path(&self, user_id: &str) -> PathBuf {
        self.user_dir(user_id).join("outbox.jsonl")
    }

    fn append(&self, user_id: &str, channel: &str, payload: serde_json::Value) -> Result<()> {
        let record = OutboxRecord {
            timestamp_unix_ms: current_unix_timestamp_ms(),
            channel: channel.to_string(),
            payload,
        };
        append_jsonl_line(&self.outbox_path(user_id), &record)
    }

    /// Full outbox history for one user, oldest first.
    pub fn outbox(&self, user_id: &str) -> Result<Vec<OutboxRecord>> {
        vela_core::read_jsonl_records(&self.outbox_path(user_id))
    }

    pub fn set_trusted_circle(&self, user_id: &str, members: &[String]) -> Result<()> {
        write_json_document(&self.user_dir(user_id).join("circle.json"), &members)
    }

    pub fn set_emergency_contacts(
        &self,
        user_id: &str,
        contacts: &[EmergencyContact],
    ) -> Result<()> {
        write_json_document(&self.user_dir(user_id).join("contacts.json"), &contacts)
    }

    pub fn active_emergency(&self, user_id: &str) -> Result<Option<EmergencyRecord>> {
        read_json_if_present(&self.user_dir(user_id).join("emergency.json"))
    }
}

fn read_json_if_present<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value =
        serde_json::from_str(&raw).with_context(|| format!("invalid json {}", path.display()))?;
    Ok(Some(value))
}

#[async_trait]
impl SafetyChannels for FileChannels {
    async fn notify_circle(&self, user_id: &str, notice: &CircleNotice) -> Result<()> {
        self.append(user_id, "circle", serde_json::to_value(notice)?)
    }

    async fn notify_user(&self, user_id: &str, message: &str) -> Result<()> {
        self.append(user_id, "push", json!({ "message": message }))
    }

    async fn send_silent_verification(
        &self,
        user_id: &str,
        message: &str,
        timeout_seconds: u64,
    ) -> Result<()> {
        self.append(
            user_id,
            "silent_verification",
            json!({ "message": message, "timeout_seconds": timeout_seconds }),
        )
    }

    async fn open_emergency(&self, user_id: &str, token: &str, trigger: SosTrigger) -> Result<()> {
        let record = EmergencyRecord {
            token: token.to_string(),
            trigger,
            opened_at_unix_ms: current_unix_timestamp_ms(),
        };
        write_json_document(&self.user_dir(user_id).join("emergency.json"), &record)?;
        self.append(user_id, "emergency_open", serde_json::to_value(&record)?)
    }

    async fn close_emergency(&self, user_id: &str) -> Result<()> {
        let path = self.user_dir(user_id).join("emergency.json");
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to remove {}", path.display()));
            }
        }
        self.append(user_id, "emergency_close", serde_json::Value::Null)
    }

    async fn start_evidence_capture(
        &self,
        user_id: &str,
        options: &EvidenceOptions,
    ) -> Result<()> {
        self.append(user_id, "evidence", serde_json::to_value(options)?)
    }

    async fn enable_live_tracking(&self, user_id: &str) -> Result<()> {
        self.append(user_id, "live_tracking", serde_json::Value::Null)
    }

    async fn publish_tracking_link(&self, user_id: &str, token: &str, url: &str) -> Result<()> {
        self.append(
            user_id,
            "tracking_link",
            json!({ "token": token, "url": url }),
        )
    }

    async fn place_calls(
        &self,
        user_id: &str,
        contacts: &[EmergencyContact],
        message: &str,
    ) -> Result<usize> {
        for contact in contacts {
            self.append(
                user_id,
                "call",
                json!({ "to": contact.phone, "name": contact.name, "message": message }),
            )?;
        }
        Ok(contacts.len())
    }

    async fn send_sms(
        &self,
        user_id: &str,
        contacts: &[EmergencyContact],
        message: &str,
    ) -> Result<usize> {
        for contact in contacts {
            self.append(
                user_id,
                "sms",
                json!({ "to": contact.phone, "message": message }),
            )?;
        }
        Ok(contacts.len())
    }

    async fn trusted_circle_size(&self, user_id: &str) -> Result<usize> {
        let members: Option<Vec<String>> =
            read_json_if_present(&self.user_dir(user_id).join("circle.json"))?;
        Ok(members.map(|members| members.len()).unwrap_or(0))
    }

    async fn emergency_contacts(&self, user_id: &str) -> Result<Vec<EmergencyContact>> {
        let mut contacts: Vec<EmergencyContact> =
            read_json_if_present(&self.user_dir(user_id).join("contacts.json"))?
                .unwrap_or_default();
        contacts.sort_by_key(|contact| contact.priority);
        Ok(contacts)
    }
}
