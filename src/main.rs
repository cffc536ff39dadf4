//! CLI Entry Point for signal-lab
//!
//! Runs the acquisition pipeline headless against the simulated gateway:
//! - `run`: start acquisition, stream for a while, print pipeline statistics
//! - `config`: print the effective configuration
//!
//! # Usage
//!
//! ```bash
//! signal_lab run --duration 10s --channels 4
//! signal_lab run --config config/signal_lab.toml --format json
//! signal_lab config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use signal_lab::config::{LabConfig, DEFAULT_CONFIG_PATH};
use signal_lab::data::fft::BandPowerProcessor;
use signal_lab::mock::MockGateway;
use signal_lab::tracing_setup::{self, OutputFormat, TracingConfig};
use signal_lab::Pipeline;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "signal_lab")]
#[command(about = "Live biosignal acquisition and display pacing", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire from the simulated device and report statistics
    Run {
        /// How long to acquire, e.g. "10s" or "1m"
        #[arg(long, value_parser = parse_duration, default_value = "10s")]
        duration: Duration,

        /// Channels produced by the simulated device
        #[arg(long, default_value_t = 1)]
        channels: usize,

        /// Samples per window returned by each read
        #[arg(long, default_value_t = 64)]
        window_len: usize,

        /// Run a baseline calculation once acquisition is running
        #[arg(long)]
        baseline: bool,

        /// Log output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn parse_duration(text: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(text).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = LabConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Run {
            duration,
            channels,
            window_len,
            baseline,
            format,
        } => {
            let level = tracing_setup::parse_log_level(&config.application.log_level)?;
            tracing_setup::init(TracingConfig::new(level).with_format(format))?;
            run(config, duration, channels, window_len, baseline).await
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run(
    config: LabConfig,
    duration: Duration,
    channels: usize,
    window_len: usize,
    baseline: bool,
) -> Result<()> {
    info!(app = %config.application.name, ?duration, channels, "Starting acquisition");

    let sample_rate = config.pipeline.sample_rate_hz;
    let processor = BandPowerProcessor::spawn(sample_rate, config.pipeline.band_count);
    let pipeline = Pipeline::builder(config.pipeline.clone())
        .processor(processor)
        .build()?;

    let gateway = Arc::new(
        MockGateway::new("Simulated headband")
            .with_channels(channels)
            .with_window_len(window_len)
            .with_sample_rate(sample_rate),
    );
    pipeline.attach(gateway).await?;
    pipeline.start().await?;

    let mut state = pipeline.subscribe_state();
    state
        .wait_for(|s| s.is_running())
        .await
        .context("controller stopped before acquisition began")?;

    if baseline {
        if let Err(err) = pipeline.calculate_baseline() {
            warn!(error = %err, "Baseline calculation not started");
        }
    }

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    let mut report = tokio::time::interval(Duration::from_secs(1));
    report.tick().await;
    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Acquisition period elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = report.tick() => {
                let snapshot = pipeline.snapshot().await?;
                let stats = pipeline.stats();
                info!(
                    state = pipeline.state().label(),
                    points = snapshot.raw.len(),
                    axis = ?snapshot.axis,
                    samples = stats.samples_forwarded,
                    dropped = stats.samples_dropped,
                    "Display"
                );
            }
        }
    }

    pipeline.stop().await?;
    let snapshot = pipeline.snapshot().await?;
    info!(
        points = snapshot.raw.len(),
        bands = snapshot.bands.len(),
        "Final display"
    );

    let stats = pipeline.shutdown().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
