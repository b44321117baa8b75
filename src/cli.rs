use crate::job::{RetryPolicy, SettlePolicy};
use crate::logging::LogFormat;
use crate::monitor::{DEFAULT_QUEUE_CAPACITY, DEFAULT_STOP_TIMEOUT};
use crate::pipeline::{PipelineOptions, DEFAULT_WORKERS};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use ftpdrop_ftp::DataChannelMode;
use std::path::PathBuf;
use std::time::Duration;

/// Watch a folder, upload every new file over FTP, then archive it.
#[derive(Parser, Debug)]
#[command(name = "ftpdrop", version, about, long_about = None)]
pub struct Cli {
    /// Settings file (KEY=VALUE lines)
    #[arg(long, value_name = "FILE", global = true)]
    pub settings: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    /// Data channel mode for uploads and `test-connection`
    #[arg(long, value_enum, default_value_t = PassiveMode::Pasv, global = true)]
    pub passive_mode: PassiveMode,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Watch the source folder until interrupted (default)
    Run(RunArgs),
    /// Log in with the saved settings and list the remote directory
    TestConnection,
    /// Print the effective settings with the password hidden
    ShowSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PassiveMode {
    Pasv,
    Epsv,
}

impl From<PassiveMode> for DataChannelMode {
    fn from(mode: PassiveMode) -> Self {
        match mode {
            PassiveMode::Pasv => DataChannelMode::Passive,
            PassiveMode::Epsv => DataChannelMode::ExtendedPassive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventOutput {
    /// Outcomes as log lines
    Log,
    /// Outcomes as JSON lines on stdout
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Concurrent upload jobs
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Pending file events buffered before the watcher blocks
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Seconds to let in-flight jobs finish on pause/exit
    #[arg(long, default_value_t = DEFAULT_STOP_TIMEOUT.as_secs())]
    pub stop_timeout_secs: u64,

    /// Retries for connection/transfer failures
    #[arg(long, default_value_t = 2)]
    pub retries: u32,

    /// First retry delay in seconds, doubled per retry
    #[arg(long, default_value_t = 2)]
    pub retry_delay_secs: u64,

    /// Milliseconds a new file must stay unchanged before upload (0 = off)
    #[arg(long, default_value_t = 500)]
    pub settle_ms: u64,

    /// Where upload outcomes are reported
    #[arg(long, value_enum, default_value_t = EventOutput::Log)]
    pub events: EventOutput,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT.as_secs(),
            retries: 2,
            retry_delay_secs: 2,
            settle_ms: 500,
            events: EventOutput::Log,
        }
    }
}

impl RunArgs {
    pub fn pipeline_options(&self) -> PipelineOptions {
        let defaults = RetryPolicy::default();
        PipelineOptions {
            workers: self.workers.max(1),
            queue_capacity: self.queue_capacity.max(1),
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
            retry: RetryPolicy {
                max_retries: self.retries,
                base_delay: Duration::from_secs(self.retry_delay_secs),
                max_delay: defaults.max_delay,
            },
            settle: SettlePolicy {
                interval: Duration::from_millis(self.settle_ms),
                ..SettlePolicy::default()
            },
        }
    }
}
