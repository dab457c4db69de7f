use crate::params::SamplingParams;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Largest burst the CLI accepts
pub const MAX_SAMPLES_PER_BURST: u32 = 100_000;

/// Shortest sampling interval the CLI accepts for multi-sample bursts
pub const MIN_SAMPLING_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Parser, Debug)]
#[command(name = "stackprof")]
#[command(about = "Burst-based stack sampling profiler for threads of this process")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Output database path
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Built-in workload to run and profile
    #[arg(long, short = 'w', value_enum, default_value = "spin")]
    pub workload: Workload,

    /// Delay before the first burst
    #[arg(long, default_value = "0s", value_parser = parse_duration)]
    pub initial_delay: Duration,

    /// Number of bursts
    #[arg(long, short = 'b', default_value = "1")]
    pub bursts: u32,

    /// Time between the starts of consecutive bursts
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub burst_interval: Duration,

    /// Samples per burst
    #[arg(long, short = 'n', default_value = "300")]
    pub samples: u32,

    /// Time between samples within a burst
    #[arg(long, short = 'i', default_value = "100ms", value_parser = parse_duration)]
    pub interval: Duration,

    /// Ask consumers to keep samples in capture order
    #[arg(long)]
    pub preserve_order: bool,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the hottest innermost frames of a recording
    Top {
        /// Profile database file
        file: PathBuf,

        /// Number of entries to display
        #[arg(long, short = 'n', default_value = "20")]
        top: usize,

        /// Minimum percentage to display
        #[arg(long, short = 't', default_value = "0")]
        threshold: f64,

        /// Output as CSV
        #[arg(long)]
        csv: bool,
    },

    /// Execute raw SQL query on a profile database
    Query {
        /// Profile database file
        file: PathBuf,

        /// SQL query to execute
        sql: String,

        /// Tab-separated output instead of a table
        #[arg(long)]
        tsv: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Synthetic code the recorder profiles
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Workload {
    /// Tight arithmetic loop
    Spin,
    /// Deep recursive calls
    Recurse,
    /// Mostly blocked in sleep
    Sleep,
}

impl Workload {
    pub fn name(self) -> &'static str {
        match self {
            Workload::Spin => "spin",
            Workload::Recurse => "recurse",
            Workload::Sleep => "sleep",
        }
    }
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }

    // Bare number as seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    Err(format!(
        "Invalid duration '{}'. Examples: 100ms, 30s, 5m, 1h30m, 90",
        s
    ))
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        if self.command.is_some() {
            return Ok(());
        }

        if self.samples > MAX_SAMPLES_PER_BURST {
            return Err(format!(
                "Samples per burst must be at most {}, got {}",
                MAX_SAMPLES_PER_BURST, self.samples
            ));
        }

        if self.samples > 1 && self.interval < MIN_SAMPLING_INTERVAL {
            return Err(format!(
                "Sampling interval must be at least {} when taking more than one sample, got {}",
                humantime::format_duration(MIN_SAMPLING_INTERVAL),
                humantime::format_duration(self.interval)
            ));
        }

        Ok(())
    }

    /// Sampling configuration of a recording
    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            initial_delay: self.initial_delay,
            bursts: self.bursts,
            burst_interval: self.burst_interval,
            samples_per_burst: self.samples,
            sampling_interval: self.interval,
            preserve_sample_ordering: self.preserve_order,
        }
    }
}
