//! Check-in scheduler: scheduled exits with required confirmation
//! offsets, a directory-backed store, and the periodic monitor that
//! reminds on time and hands missed check-ins to the rules engine.

mod exit;
mod monitor;
mod store;

pub use exit::{DueCheckIn, ExitStatus, ScheduledExit};
pub use monitor::{
    confirm_check_in, CheckInMonitor, MonitorConfig, SweepReport, DEFAULT_GRACE_MINUTES,
    DEFAULT_POLL_INTERVAL, DEFAULT_SWEEP_INTERVAL,
};
pub use store::{ExitScan, ExitStore};
