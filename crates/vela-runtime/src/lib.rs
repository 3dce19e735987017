//! Runtime wiring for the safety core: the `SafetyCore` facade that
//! producers talk to, and the filesystem-backed channel implementation
//! used by the CLI and by operators inspecting outbound traffic.

mod channels_fs;
mod core;

pub use channels_fs::{EmergencyRecord, FileChannels, OutboxRecord};
pub use core::{ConfirmSafeOutcome, CoreConfig, SafetyCore};
