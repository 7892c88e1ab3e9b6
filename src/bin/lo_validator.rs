// Local oscillator auto-validation through a bench multimeter.
//
// Usage:
//   lo_validator
//   lo_validator --config bench.toml
//   lo_validator --resource TCPIP0::192.168.1.50::5025::SOCKET --log lo.csv
//   lo_validator --simulate

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use sdr_check::console::{self, highlight};
use sdr_check::{Connection, LoConfig, LoValidator, ResultsLog, SimulatedDmm};

/// SDR local oscillator validator.
#[derive(Parser)]
#[command(name = "lo_validator", version, about)]
struct Cli {
    /// TOML file with the instrument address, log path and limits.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Instrument resource string; overrides the config file.
    #[arg(short, long)]
    resource: Option<String>,

    /// CSV results log; overrides the config file.
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Use a simulated multimeter that reads back the expected values.
    #[arg(long)]
    simulate: bool,
}

fn main() -> ExitCode {
    console::init_logging();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[ERROR] {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<LoConfig> {
    let mut config = match &cli.config {
        Some(path) => LoConfig::load(path)?,
        None => LoConfig::default(),
    };
    if let Some(resource) = &cli.resource {
        config.resource = resource.clone();
    }
    if let Some(log) = &cli.log {
        config.log_path = log.clone();
    }
    Ok(config)
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;

    let connection = if cli.simulate {
        Connection::Simulated(SimulatedDmm::new(
            Some(config.voltage.expected),
            Some(config.frequency.expected),
        ))
    } else {
        Connection::open(&config.resource, config.timeout())
            .with_context(|| format!("Could not connect to DMM ({})", config.resource))?
    };

    let log = ResultsLog::new(&config.log_path);
    let mut validator = LoValidator::new(connection, config);

    // Returning early drops the validator, which closes the connection.
    let run = validator
        .run(|identity| println!("Connected to DMM: {}", identity))
        .context("DMM setup failed")?;
    validator.close();
    if let Err(e) = &run.voltage {
        println!("Voltage measurement failed: {}", e);
    }
    if let Err(e) = &run.frequency {
        println!("Frequency measurement failed: {}", e);
    }

    let record = &run.record;
    println!("\n=== SDR LO Validation Results ===");
    match record.voltage {
        Some(v) => println!("Measured Voltage:   {:.3} V", v),
        None => println!("Voltage: N/A"),
    }
    match record.frequency {
        Some(f) => println!("Measured Frequency: {:.1} Hz", f),
        None => println!("Frequency: N/A"),
    }
    println!(
        "Voltage PASS:   {}",
        highlight(&record.voltage_pass.to_string(), record.voltage_pass)
    );
    println!(
        "Frequency PASS: {}",
        highlight(&record.frequency_pass.to_string(), record.frequency_pass)
    );

    log.append(record)
        .with_context(|| format!("Could not write {}", log.path().display()))?;
    println!("\nResults logged to {}", log.path().display());
    Ok(())
}
