use anyhow::Context;
use clap::Parser;
use stackprof::cli::{Cli, Command};
use stackprof::commands::record::Recorder;
use stackprof::error::exit_code;
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS as u8),
        Err(e) => {
            eprintln!("Error: {e:#}");
            if let Some(err) = e.downcast_ref::<stackprof::Error>() {
                ExitCode::from(err.exit_code() as u8)
            } else if e.is::<InvalidArguments>() {
                ExitCode::from(exit_code::INVALID_ARGUMENTS as u8)
            } else {
                ExitCode::from(exit_code::GENERAL_ERROR as u8)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid arguments: {0}")]
struct InvalidArguments(String);

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    cli.validate().map_err(InvalidArguments)?;

    match cli.command {
        Some(Command::Top {
            ref file,
            top,
            threshold,
            csv,
        }) => {
            stackprof::commands::top::run(file, top, threshold, csv)
                .with_context(|| format!("Failed to read {}", file.display()))?;
        }
        Some(Command::Query {
            ref file,
            ref sql,
            tsv,
        }) => {
            stackprof::commands::query::run(file, sql, tsv)?;
        }
        Some(Command::Completions { shell }) => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "stackprof", &mut std::io::stdout());
        }
        None => record(&cli)?,
    }

    Ok(())
}

/// RUST_LOG overrides `--log-level`; output goes to stderr
fn setup_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn record(cli: &Cli) -> anyhow::Result<()> {
    let params = cli.sampling_params();

    let output_path = cli.output.clone().unwrap_or_else(|| {
        let timestamp = chrono::Local::now().format("%y%m%d%H%M%S");
        std::path::PathBuf::from(format!(
            "stackprof.{}.{}.db",
            cli.workload.name(),
            timestamp
        ))
    });

    let recorder = Recorder::new(&output_path, cli.workload, params.clone())
        .with_context(|| format!("Failed to create {}", output_path.display()))?;

    let stop = recorder.stop_handle();
    ctrlc::set_handler(move || stop.stop()).context("Failed to set Ctrl-C handler")?;

    eprintln!(
        "Profiling {} workload (thread {})",
        cli.workload.name(),
        recorder.target()
    );
    eprintln!("Sampling: {}", params);
    eprintln!("Output: {}", output_path.display());
    match params.nominal_duration() {
        Some(limit) => eprintln!(
            "Recording for up to {} (Ctrl-C to stop)...",
            humantime::format_duration(limit)
        ),
        None => eprintln!("Recording, unbounded (Ctrl-C to stop)..."),
    }

    let outcome = recorder.run()?;

    if outcome.run.stopped {
        eprintln!("Stopped early.");
    }
    eprintln!(
        "Recording complete. Profiles: {}, samples: {}, skipped slots: {}",
        outcome.written, outcome.samples, outcome.run.skipped
    );
    eprintln!(
        "Inspect with: stackprof top {}",
        outcome.output.display()
    );

    Ok(())
}
