//! CLI Entry Point for dapp-pumps
//!
//! Provides command-line interface for:
//! - Profile-driven co-infusion runs (`run`)
//! - Single-step runs at fixed rates (`constant`)
//! - Start-offset calculation without touching hardware (`delays`)
//! - Querying both pumps (`status`)
//! - Printing the resolved configuration (`show-config`)
//!
//! # Usage
//!
//! Rehearse a profile on simulated pumps:
//! ```bash
//! dapp-pumps run --profile demos/glucose_profile.csv --dry-run
//! ```
//!
//! Drive the pumps at fixed rates:
//! ```bash
//! dapp-pumps --config config/dapp.toml constant --glucose-rate 5 --buffer-rate 10
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dapp_pumps::clock::{CancelHandle, Clock, TokioClock, VirtualClock};
use dapp_pumps::config::{AppConfig, DEFAULT_CONFIG_PATH};
use dapp_pumps::delay::compute_delays;
use dapp_pumps::experiment::{ExperimentParams, RunReport, RunSequencer};
use dapp_pumps::logging;
use dapp_pumps::profile::ConcentrationProfile;
use dapp_pumps::pump::{CallLog, MockPump, PumpChannel, SerialPump};
use dapp_pumps::schedule::Schedule;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dapp-pumps")]
#[command(about = "Dual syringe-pump co-infusion controller", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a concentration profile from a CSV file
    Run {
        /// CSV file with a concentration column and an optional time column
        #[arg(long)]
        profile: PathBuf,

        /// Simulate both pumps on a virtual clock
        #[arg(long)]
        dry_run: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run both pumps at fixed rates for one dwell period
    Constant {
        /// Glucose pump rate
        #[arg(long)]
        glucose_rate: f64,

        /// Buffer pump rate
        #[arg(long)]
        buffer_rate: f64,

        /// Simulate both pumps on a virtual clock
        #[arg(long)]
        dry_run: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the start delays for a pair of rates
    Delays {
        /// Glucose pump rate
        #[arg(long)]
        glucose_rate: f64,

        /// Buffer pump rate
        #[arg(long)]
        buffer_rate: f64,

        /// Travel length (defaults to the configured one)
        #[arg(long)]
        length: Option<f64>,
    },

    /// Query the display of both pumps
    Status,

    /// Print the resolved configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_validated(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Run {
            profile,
            dry_run,
            json,
        } => {
            let profile = ConcentrationProfile::from_path(&profile)
                .with_context(|| format!("Failed to read profile {}", profile.display()))?;
            let schedule = config
                .mixing
                .build_schedule(&profile, config.experiment.dwell())
                .context("Failed to build schedule from profile")?;
            run_schedule(&config, &schedule, dry_run, json).await
        }
        Commands::Constant {
            glucose_rate,
            buffer_rate,
            dry_run,
            json,
        } => {
            let schedule =
                Schedule::constant(glucose_rate, buffer_rate, config.experiment.dwell());
            run_schedule(&config, &schedule, dry_run, json).await
        }
        Commands::Delays {
            glucose_rate,
            buffer_rate,
            length,
        } => {
            let length = length.unwrap_or(config.experiment.travel_length);
            let delays = compute_delays(glucose_rate, buffer_rate, length)?;
            println!("Glucose delay: {}", delays.glucose);
            println!("Buffer delay:  {}", delays.buffer);
            println!("Starts first:  {}", delays.lead());
            Ok(())
        }
        Commands::Status => query_status(&config).await,
        Commands::ShowConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn run_schedule(
    config: &AppConfig,
    schedule: &Schedule,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let params = config.experiment.params();
    info!(
        "Schedule: {} steps, {:.0} s total dwell",
        schedule.len(),
        schedule.total_dwell().as_secs_f64()
    );

    if dry_run {
        let log = CallLog::new();
        let glucose = MockPump::new("glucose", log.clone());
        let buffer = MockPump::new("buffer", log.clone());
        let (clock, cancel) = VirtualClock::new();
        let result = execute(schedule, &params, glucose, buffer, clock, cancel, json).await;
        info!("Dry run issued {} pump commands", log.records().len());
        return result;
    }

    // Open both ports before any command reaches either pump
    let glucose = SerialPump::open("glucose", &config.pumps.glucose.port, config.serial.clone())
        .await
        .context("Failed to open glucose pump")?;
    let buffer = SerialPump::open("buffer", &config.pumps.buffer.port, config.serial.clone())
        .await
        .context("Failed to open buffer pump")?;
    let (clock, cancel) = TokioClock::new();
    execute(schedule, &params, glucose, buffer, clock, cancel, json).await
}

async fn execute<G, B, C>(
    schedule: &Schedule,
    params: &ExperimentParams,
    glucose: G,
    buffer: B,
    clock: C,
    cancel: CancelHandle,
    json: bool,
) -> Result<()>
where
    G: PumpChannel,
    B: PumpChannel,
    C: Clock,
{
    let interrupt = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C - stopping both pumps");
            cancel.cancel();
        }
    });

    let mut sequencer = RunSequencer::new(glucose, buffer, clock);
    let result = sequencer.run(schedule, params).await;
    interrupt.abort();

    if let Some(report) = sequencer.last_report() {
        print_report(report, sequencer.clock().elapsed(), json)?;
    }
    result.map(|_| ()).context("Run failed")
}

fn print_report(report: &RunReport, elapsed: std::time::Duration, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("Run {}", report.run_id);
    println!("  Outcome:  {:?}", report.outcome);
    println!(
        "  Steps:    {} of {}",
        report.steps_completed, report.steps_total
    );
    println!("  Elapsed:  {:.1} s", elapsed.as_secs_f64());
    println!("  State:    {}", report.final_state());
    Ok(())
}

async fn query_status(config: &AppConfig) -> Result<()> {
    // Open both ports before any command reaches either pump
    let glucose = SerialPump::open("glucose", &config.pumps.glucose.port, config.serial.clone())
        .await
        .context("Failed to open glucose pump")?;
    let buffer = SerialPump::open("buffer", &config.pumps.buffer.port, config.serial.clone())
        .await
        .context("Failed to open buffer pump")?;

    for (pump, port) in [
        (&glucose, &config.pumps.glucose.port),
        (&buffer, &config.pumps.buffer.port),
    ] {
        let status = pump
            .status()
            .await
            .with_context(|| format!("Failed to query {} pump", pump.name()))?;
        println!("{} ({port}): {status}", pump.name());
    }
    Ok(())
}
