//! LO validator configuration.
//!
//! Every field has a default, so an empty TOML file is a valid config. The
//! default limits are placeholders for a 10 MHz reference at about 1 V; real
//! calibration targets belong in the config file.
//!
//! ```toml
//! resource = "TCPIP0::192.168.1.50::5025::SOCKET"
//! log_path = "lo_validation_results.csv"
//! timeout_ms = 5000
//! reset_settle_ms = 500
//!
//! [voltage]
//! expected = 1.0
//! tolerance = 0.1
//!
//! [frequency]
//! expected = 10000000.0
//! tolerance = 1000.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::lo::Tolerance;

pub const DEFAULT_RESOURCE: &str = "USB0::0x2A8D::0x3502::MY12345678::INSTR";
pub const DEFAULT_LOG_PATH: &str = "lo_validation_results.csv";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoConfig {
    /// Instrument resource string.
    pub resource: String,
    /// CSV results log, appended to on every run.
    pub log_path: PathBuf,
    /// Per-call I/O timeout.
    pub timeout_ms: u64,
    /// Pause after `*RST` before the first configure command.
    pub reset_settle_ms: u64,
    pub voltage: Tolerance,
    pub frequency: Tolerance,
}

impl Default for LoConfig {
    fn default() -> Self {
        Self {
            resource: String::from(DEFAULT_RESOURCE),
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            timeout_ms: 5000,
            reset_settle_ms: 500,
            voltage: Tolerance::new(1.0, 0.1),
            frequency: Tolerance::new(10_000_000.0, 1_000.0),
        }
    }
}

impl LoConfig {
    /// Parses a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::Config(String::from("timeout_ms must be greater than zero")));
        }
        for (name, limit) in [("voltage", &self.voltage), ("frequency", &self.frequency)] {
            if !limit.tolerance.is_finite() || limit.tolerance < 0.0 || !limit.expected.is_finite() {
                return Err(Error::Config(format!(
                    "{} limits must be finite with a non-negative tolerance",
                    name
                )));
            }
        }
        Ok(())
    }
}
