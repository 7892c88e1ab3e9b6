//! Local oscillator validation against a bench multimeter.
//!
//! The sequence is identify, reset, measure DC voltage, measure frequency.
//! Failing to identify or reset the meter aborts the run. A failed
//! measurement only marks that value unavailable.

use std::thread;

use chrono::{Local, NaiveDateTime};
use log::{info, warn};
use serde::Deserialize;

use crate::config::LoConfig;
use crate::error::{Error, Result};
use crate::scpi::Instrument;

/// Timestamp layout used on screen and in the results log.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Sentinel written for a value that could not be measured.
pub const NOT_AVAILABLE: &str = "N/A";

/// An expected value and the allowed deviation either side of it.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Tolerance {
    pub expected: f64,
    pub tolerance: f64,
}

impl Tolerance {
    pub const fn new(expected: f64, tolerance: f64) -> Self {
        Self { expected, tolerance }
    }

    pub fn lower(&self) -> f64 {
        self.expected - self.tolerance
    }

    pub fn upper(&self) -> f64 {
        self.expected + self.tolerance
    }

    /// Passes when a value is present and within the band, edges included.
    /// A reading equal to the written bound passes: 1.1 against 1.0 +/- 0.1.
    pub fn check(&self, value: Option<f64>) -> bool {
        value.is_some_and(|v| v >= self.lower() && v <= self.upper())
    }
}

/// One run of the validator, as written to the results log.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub timestamp: NaiveDateTime,
    pub voltage: Option<f64>,
    pub frequency: Option<f64>,
    pub voltage_pass: bool,
    pub frequency_pass: bool,
}

impl MeasurementRecord {
    /// Evaluates readings against the configured limits.
    pub fn evaluate(
        timestamp: NaiveDateTime,
        voltage: Option<f64>,
        frequency: Option<f64>,
        config: &LoConfig,
    ) -> Self {
        Self {
            timestamp,
            voltage,
            frequency,
            voltage_pass: config.voltage.check(voltage),
            frequency_pass: config.frequency.check(frequency),
        }
    }

    /// `[timestamp, voltage, frequency, PASS|FAIL, PASS|FAIL]`.
    pub fn to_row(&self) -> [String; 5] {
        [
            self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            value_field(self.voltage),
            value_field(self.frequency),
            verdict_field(self.voltage_pass).to_string(),
            verdict_field(self.frequency_pass).to_string(),
        ]
    }
}

// Debug formatting keeps the ".0" on whole numbers (10000000.0, not 10000000).
fn value_field(value: Option<f64>) -> String {
    value.map_or_else(|| NOT_AVAILABLE.to_string(), |v| format!("{:?}", v))
}

fn verdict_field(passed: bool) -> &'static str {
    if passed {
        "PASS"
    } else {
        "FAIL"
    }
}

/// Both readings and the record built from them.
#[derive(Debug)]
pub struct Measurements {
    pub voltage: Result<f64>,
    pub frequency: Result<f64>,
    pub record: MeasurementRecord,
}

/// Everything one validation run produced.
#[derive(Debug)]
pub struct LoRun {
    /// The meter's `*IDN?` answer.
    pub identity: String,
    pub voltage: Result<f64>,
    pub frequency: Result<f64>,
    pub record: MeasurementRecord,
}

/// Drives the multimeter through the validation sequence.
pub struct LoValidator<I: Instrument> {
    instrument: I,
    config: LoConfig,
}

impl<I: Instrument> LoValidator<I> {
    pub fn new(instrument: I, config: LoConfig) -> Self {
        Self { instrument, config }
    }

    pub fn instrument(&self) -> &I {
        &self.instrument
    }

    pub fn config(&self) -> &LoConfig {
        &self.config
    }

    pub fn identify(&mut self) -> Result<String> {
        let idn = self.instrument.query("*IDN?")?;
        if idn.is_empty() {
            return Err(Error::Protocol(String::from("empty *IDN? response")));
        }
        info!("connected to {}", idn);
        Ok(idn)
    }

    /// Resets the meter and waits for it to settle.
    pub fn reset(&mut self) -> Result<()> {
        self.instrument.write("*RST")?;
        let settle = self.config.reset_settle();
        if !settle.is_zero() {
            thread::sleep(settle);
        }
        Ok(())
    }

    pub fn measure_voltage(&mut self) -> Result<f64> {
        self.measure("CONF:VOLT:DC AUTO", "MEAS:VOLT:DC?")
    }

    pub fn measure_frequency(&mut self) -> Result<f64> {
        self.measure("CONF:FREQ", "MEAS:FREQ?")
    }

    fn measure(&mut self, configure: &str, query: &str) -> Result<f64> {
        self.instrument.write(configure)?;
        let response = self.instrument.query(query)?;
        response
            .parse::<f64>()
            .map_err(|_| Error::Protocol(format!("'{}' returned non-numeric '{}'", query, response)))
    }

    /// Takes both readings. A failed reading is kept as its error and
    /// recorded as unavailable.
    pub fn measure_all(&mut self) -> Measurements {
        let voltage = self.measure_voltage();
        if let Err(e) = &voltage {
            warn!("voltage measurement failed: {}", e);
        }
        let frequency = self.measure_frequency();
        if let Err(e) = &frequency {
            warn!("frequency measurement failed: {}", e);
        }

        let record = MeasurementRecord::evaluate(
            Local::now().naive_local(),
            voltage.as_ref().ok().copied(),
            frequency.as_ref().ok().copied(),
            &self.config,
        );
        Measurements {
            voltage,
            frequency,
            record,
        }
    }

    /// Runs the whole sequence. Only identify and reset failures are
    /// returned as errors. `on_identified` sees the `*IDN?` answer before
    /// the meter is reset.
    pub fn run<F>(&mut self, on_identified: F) -> Result<LoRun>
    where
        F: FnOnce(&str),
    {
        let identity = self.identify()?;
        on_identified(&identity);
        self.reset()?;
        let Measurements {
            voltage,
            frequency,
            record,
        } = self.measure_all();
        Ok(LoRun {
            identity,
            voltage,
            frequency,
            record,
        })
    }

    pub fn close(&mut self) {
        self.instrument.close();
    }

    pub fn into_inner(self) -> I {
        self.instrument
    }
}
