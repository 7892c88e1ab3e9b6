// CAT protocol tester for the SDR controller board.
//
// Usage:
//   cat_tester --port /dev/ttyUSB0
//   cat_tester -p COM11 -b 9600 -t 1.5
//   cat_tester --simulate

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;

use sdr_check::cat::{self, TEST_FREQUENCY_HZ};
use sdr_check::console::{self, highlight, verdict};
use sdr_check::{CatTester, Channel, SerialChannel, SerialSettings, SimulatedChannel, Simulator};

/// SDR controller CAT protocol tester.
#[derive(Parser)]
#[command(name = "cat_tester", version, about)]
struct Cli {
    /// Serial port (e.g. COM11 or /dev/ttyUSB0).
    #[arg(short, long, default_value = "COM11")]
    port: String,

    /// Baud rate.
    #[arg(short, long, default_value_t = 9600)]
    baud: u32,

    /// Read timeout in seconds.
    #[arg(short, long, default_value_t = 1.0)]
    timeout: f64,

    /// Run against the built-in firmware simulator instead of a serial port.
    #[arg(long)]
    simulate: bool,
}

fn main() -> ExitCode {
    console::init_logging();
    let cli = Cli::parse();

    // Errors only come back from setup; the port is already dropped here.
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[ERROR] {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let timeout = match Duration::try_from_secs_f64(cli.timeout) {
        Ok(t) if !t.is_zero() => t,
        _ => bail!("timeout must be a positive number of seconds, got {}", cli.timeout),
    };
    let settings = SerialSettings {
        port: cli.port.clone(),
        baud: cli.baud,
        timeout,
    };

    println!("========== SDR Controller CAT Protocol Test ==========");
    if cli.simulate {
        println!("Target: built-in firmware simulator\n");
        run_plan(SimulatedChannel::new(Simulator::new()));
    } else {
        println!(
            "Serial Port: {} | Baud: {} | Timeout: {}s\n",
            settings.port, settings.baud, cli.timeout
        );
        run_plan(SerialChannel::open(settings)?);
    }
    Ok(())
}

fn run_plan<C: Channel>(channel: C) {
    let plan = cat::standard_plan(TEST_FREQUENCY_HZ);
    let mut tester = CatTester::new(channel);

    let mut current_group = "";
    let report = tester.run(&plan, |outcome| {
        if outcome.case.group != current_group {
            current_group = outcome.case.group;
            println!("{}:", current_group);
        }
        println!("{}", outcome);
        println!("  {}\n", verdict(outcome.passed));
    });

    tester.into_inner().close();

    println!("======================================================");
    println!(
        "\nCases passed: {}/{}",
        report.pass_count(),
        report.outcomes.len()
    );
    let summary = if report.passed() {
        "ALL TESTS PASSED"
    } else {
        "SOME TESTS FAILED"
    };
    println!("Overall Result: {}", highlight(summary, report.passed()));
}
