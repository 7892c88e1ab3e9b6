//! # SDR Subsystem Validation Library
//!
//! Bench checks for the SDR controller board: a CAT protocol tester that
//! drives the UART control interface, an LO validator that reads the local
//! oscillator through a bench multimeter, and a simulator of the board's CAT
//! firmware so the tester can run without hardware.

pub mod cat;
pub mod channel;
pub mod config;
pub mod console;
pub mod error;
pub mod lo;
pub mod results;
pub mod scpi;
pub mod simulator;

pub use cat::{CaseOutcome, CatTester, TestCase, TestReport};
pub use channel::{Channel, SerialChannel, SerialSettings, SimulatedChannel};
pub use config::LoConfig;
pub use error::{Error, Result};
pub use lo::{LoRun, LoValidator, MeasurementRecord, Measurements, Tolerance};
pub use results::ResultsLog;
pub use scpi::{Connection, Instrument, Resource, SimulatedDmm};
pub use simulator::{CommandError, FrameBuffer, Simulator};
