//! Error types shared by the CAT tester and the LO validator.
//!
//! Channel, instrument, configuration and log failures all land in [`Error`].
//! Whether a given failure is fatal or merely recorded is decided by the
//! procedure that hit it, not by the variant.

/// The error type for all library operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The serial port or instrument could not be opened.
    #[error("failed to open {target}: {reason}")]
    Open { target: String, reason: String },

    /// An operation was attempted on a channel that has been closed.
    #[error("not connected")]
    NotConnected,

    /// Timed out waiting for a response.
    #[error("timeout waiting for response to '{0}'")]
    Timeout(String),

    /// The device answered with something that could not be interpreted.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The resource string names a transport this crate cannot drive.
    #[error("unsupported resource: {0}")]
    UnsupportedResource(String),

    /// The configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The results log could not be written.
    #[error("results log error: {0}")]
    Log(#[from] csv::Error),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
