use anyhow::{Context, Result};
use clap::Parser;
use std::thread;
use tracing_subscriber::EnvFilter;
use wattrace::calibration::Calibrator;
use wattrace::cli::{Cli, Command};
use wattrace::config::MonitorConfig;
use wattrace::power::{self, PowerSource, TimeoutSource};

/// Initialize tracing subscriber; `--debug` raises the level to TRACE
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_source(config: &MonitorConfig) -> Result<TimeoutSource> {
    let source = power::from_config(config).context("Cannot create power source")?;
    TimeoutSource::new(source, config.sample_timeout()).context("Cannot start power worker")
}

fn run_calibrate(config: &MonitorConfig) -> Result<()> {
    let source = open_source(config)?;
    let baseline = Calibrator::from_config(config)
        .calibrate(&source)
        .context("Calibration failed")?;
    println!("Idle power: {:.3} W", baseline.power_in_watts);
    Ok(())
}

fn run_sample(config: &MonitorConfig, count: u32) -> Result<()> {
    let source = open_source(config)?;
    let mut readings = 0u32;

    for i in 0..count {
        if i > 0 {
            thread::sleep(config.sampling_interval());
        }
        match source.pull() {
            Ok(sample) => {
                readings += 1;
                println!(
                    "{} {:.3} {}",
                    sample.timestamp.to_rfc3339(),
                    sample.watts,
                    sample.unit()
                );
            }
            Err(e) => eprintln!("Sample {} unavailable: {}", i + 1, e),
        }
    }

    if count > 0 && readings == 0 {
        anyhow::bail!("No power reading available from {}", source.describe());
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    let config = MonitorConfig::load(args.config.as_deref()).context("Cannot load configuration")?;

    match args.command {
        Command::Calibrate => run_calibrate(&config)?,
        Command::Sample { count } => run_sample(&config, count)?,
        Command::Config => print!("{}", config.to_toml_string()?),
    }

    Ok(())
}
