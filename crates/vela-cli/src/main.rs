//! `vela` binary: run the safety core, submit events, manage scheduled
//! exits, and inspect per-user state from the command line.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vela_checkin::{
    confirm_check_in, CheckInMonitor, ExitStore, MonitorConfig, ScheduledExit,
};
use vela_core::{current_unix_timestamp_ms, minutes_to_ms};
use vela_engine::{DecisionLogConfig, EngineConfig, SafetyEvent};
use vela_guardian::GuardianConfig;
use vela_runtime::{CoreConfig, FileChannels, SafetyCore};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(name = "vela", about = "Personal safety escalation core", version)]
struct Cli {
    #[arg(
        long = "state-dir",
        env = "VELA_STATE_DIR",
        default_value = ".vela",
        help = "Root directory for channel outboxes, exits, and the decision log"
    )]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the check-in monitor until ctrl-c.
    Run {
        #[arg(
            long = "poll-interval-secs",
            env = "VELA_POLL_INTERVAL_SECS",
            default_value_t = 60,
            value_parser = parse_positive_u64,
            help = "Seconds between monitor sweeps"
        )]
        poll_interval_secs: u64,

        #[arg(
            long = "grace-minutes",
            env = "VELA_GRACE_MINUTES",
            default_value_t = 10,
            value_parser = parse_positive_u64,
            help = "Minutes a due check-in may stay unconfirmed before escalation"
        )]
        grace_minutes: u64,

        #[arg(long, help = "Restrict the sweep to one user id")]
        user: Option<String>,
    },

    /// Submit a manual SOS event.
    Sos {
        #[arg(long)]
        user: String,
    },

    /// Submit a free-text diary entry.
    Diary {
        #[arg(long)]
        user: String,

        #[arg(long, help = "Diary text")]
        text: String,
    },

    /// Submit a session-inactivity event.
    Inactivity {
        #[arg(long)]
        user: String,

        #[arg(long, default_value = "cli", help = "Detector that noticed the inactivity")]
        source: String,
    },

    /// Confirm the user is safe, cancelling any running escalation.
    ConfirmSafe {
        #[arg(long)]
        user: String,
    },

    /// Create a scheduled exit with required check-in offsets.
    ScheduleExit {
        #[arg(long)]
        user: String,

        #[arg(long)]
        title: String,

        #[arg(long)]
        place: Option<String>,

        #[arg(
            long = "starts-in-minutes",
            default_value_t = 0,
            help = "Minutes from now until the exit starts"
        )]
        starts_in_minutes: u64,

        #[arg(
            long,
            value_delimiter = ',',
            required = true,
            help = "Required check-in offsets in minutes, e.g. 30,60,120"
        )]
        offsets: Vec<u32>,
    },

    /// Confirm one check-in offset of a scheduled exit.
    CheckIn {
        #[arg(long = "exit-id")]
        exit_id: String,

        #[arg(long = "offset-minutes")]
        offset_minutes: u32,
    },

    /// Print one user's escalation state.
    State {
        #[arg(long)]
        user: String,
    },

    /// Print a user's most recent decisions.
    Decisions {
        #[arg(long)]
        user: String,

        #[arg(
            long,
            default_value_t = 20,
            value_parser = parse_positive_usize,
            help = "Maximum number of decisions to print"
        )]
        limit: usize,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn build_core(state_dir: &PathBuf) -> (Arc<SafetyCore>, Arc<FileChannels>) {
    let channels = Arc::new(FileChannels::new(state_dir));
    let config = CoreConfig {
        engine: EngineConfig {
            log: DecisionLogConfig {
                durable_path: Some(state_dir.join("decisions.jsonl")),
                ..DecisionLogConfig::default()
            },
            ..EngineConfig::default()
        },
        guardian: GuardianConfig::default(),
    };
    let core = Arc::new(SafetyCore::new(config, channels.clone()));
    (core, channels)
}

fn exit_store(state_dir: &PathBuf) -> ExitStore {
    ExitStore::new(state_dir.join("exits"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let state_dir = cli.state_dir;

    match cli.command {
        Command::Run {
            poll_interval_secs,
            grace_minutes,
            user,
        } => {
            let (core, channels) = build_core(&state_dir);
            let monitor = CheckInMonitor::new(
                MonitorConfig {
                    poll_interval: Duration::from_secs(poll_interval_secs),
                    grace_minutes,
                    user_filter: user.clone(),
                },
                exit_store(&state_dir),
                core.clone(),
                channels.clone(),
            );
            if user.is_some() {
                // A user-filtered monitor still needs the slower fleet-wide
                // sweep so other users' exits are not left unwatched.
                let sweep = CheckInMonitor::new(
                    MonitorConfig {
                        grace_minutes,
                        ..MonitorConfig::sweep()
                    },
                    exit_store(&state_dir),
                    core,
                    channels,
                );
                tokio::try_join!(monitor.run(), sweep.run())?;
            } else {
                monitor.run().await?;
            }
        }
        Command::Sos { user } => {
            let (core, _) = build_core(&state_dir);
            let decision = core.submit_event(&SafetyEvent::manual_sos(&user)).await;
            print_json(&decision)?;
        }
        Command::Diary { user, text } => {
            let (core, _) = build_core(&state_dir);
            let decision = core
                .submit_event(&SafetyEvent::diary_entry(&user, &text))
                .await;
            print_json(&decision)?;
        }
        Command::Inactivity { user, source } => {
            let (core, _) = build_core(&state_dir);
            let decision = core
                .submit_event(&SafetyEvent::inactivity(&user, &source))
                .await;
            print_json(&decision)?;
        }
        Command::ConfirmSafe { user } => {
            let (core, _) = build_core(&state_dir);
            let outcome = core.confirm_safe(&user).await;
            info!(
                user_id = %user,
                escalation_cancelled = outcome.escalation_cancelled,
                "safe confirmation processed"
            );
            print_json(&outcome.decision)?;
        }
        Command::ScheduleExit {
            user,
            title,
            place,
            starts_in_minutes,
            offsets,
        } => {
            if offsets.is_empty() {
                bail!("at least one check-in offset is required");
            }
            let scheduled_at =
                current_unix_timestamp_ms().saturating_add(minutes_to_ms(starts_in_minutes));
            let exit = ScheduledExit::new(&user, &title, place, scheduled_at, offsets);
            exit_store(&state_dir).save(&exit)?;
            print_json(&exit)?;
        }
        Command::CheckIn {
            exit_id,
            offset_minutes,
        } => {
            let (core, _) = build_core(&state_dir);
            let store = exit_store(&state_dir);
            let exit = confirm_check_in(&store, core.as_ref(), &exit_id, offset_minutes).await?;
            print_json(&exit)?;
        }
        Command::State { user } => {
            let (core, _) = build_core(&state_dir);
            let state = core.user_state(&user).await;
            print_json(&state)?;
        }
        Command::Decisions { user, limit } => {
            let (core, _) = build_core(&state_dir);
            let decisions = core.decisions(&user, limit);
            print_json(&decisions)?;
        }
    }
    Ok(())
}
