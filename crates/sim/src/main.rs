//! # Locomotive Simulator
//!
//! Runs the controller core against the simulated boiler plant in virtual
//! time, with scripted fault scenarios, and optionally dumps a JSON trace
//! for analysis.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use sim::{Scenario, SimHarness};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScenarioArg {
    /// Cold boot, throttle up, run cleanly.
    Startup,
    /// DCC base station goes silent after 5 s.
    DccLoss,
    /// Boiler thermistor reads over-limit at 10 s.
    DryBoil,
    /// Operator programs an impossible power budget.
    OverBudget,
}

impl From<ScenarioArg> for Scenario {
    fn from(arg: ScenarioArg) -> Self {
        match arg {
            ScenarioArg::Startup => Scenario::Startup,
            ScenarioArg::DccLoss => Scenario::DccLoss,
            ScenarioArg::DryBoil => Scenario::DryBoil,
            ScenarioArg::OverBudget => Scenario::OverBudget,
        }
    }
}

/// Host-side simulator for the live steam locomotive controller.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Fault scenario to run.
    #[arg(short, long, value_enum, default_value_t = ScenarioArg::Startup)]
    scenario: ScenarioArg,

    /// Virtual seconds to simulate.
    #[arg(long, default_value_t = 120)]
    seconds: u64,

    /// Directory for config.json / error_log.json.
    #[arg(long, default_value = "sim-data")]
    data_dir: PathBuf,

    /// Write the per-second trace to this JSON file.
    #[arg(long)]
    trace: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.data_dir)?;
    let mut harness = SimHarness::new(cli.scenario.into(), &cli.data_dir)?;
    let outcome = harness.run(cli.seconds);

    match outcome.shutdown {
        Some(cause) => info!(
            "simulation ended in emergency shutdown: {cause} after {} ms",
            outcome.simulated_ms
        ),
        None => info!(
            "simulation completed cleanly after {} ms",
            outcome.simulated_ms
        ),
    }
    info!("{} telemetry frames captured", outcome.telemetry_lines.len());
    if let Some(last) = outcome.telemetry_lines.last() {
        info!("last frame: {}", last.trim_end());
    }

    if let Some(path) = cli.trace {
        harness.dump_trace(&path)?;
    }
    Ok(())
}
