//! CAT communication channels.
//!
//! [`Channel`] is the seam between the CAT tester and the wire. The serial
//! implementation talks to real hardware; [`SimulatedChannel`] loops frames
//! through an in-process [`Simulator`] instead.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use log::{debug, info};
use serialport::SerialPort;

use crate::error::{Error, Result};
use crate::simulator::{FrameBuffer, Simulator, TERMINATOR};

/// A line-oriented command channel.
pub trait Channel {
    /// Writes one command frame.
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Reads one response line.
    ///
    /// A line ends at the `;` frame terminator or a newline. If the timeout
    /// runs out first, whatever arrived so far is returned, possibly nothing.
    fn read_line(&mut self) -> Result<String>;

    /// Releases the underlying resource. Calling it twice is harmless.
    fn close(&mut self);
}

/// Serial port parameters for a CAT link.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    pub port: String,
    pub baud: u32,
    pub timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: String::from("COM11"),
            baud: 9600,
            timeout: Duration::from_secs(1),
        }
    }
}

/// A CAT channel over a serial port.
///
/// The port is acquired by [`SerialChannel::ensure_open`] and released by
/// [`Channel::close`] or when the channel is dropped.
pub struct SerialChannel {
    settings: SerialSettings,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialChannel {
    /// Creates a channel without touching the port.
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings, port: None }
    }

    /// Creates a channel and opens the port.
    pub fn open(settings: SerialSettings) -> Result<Self> {
        let mut channel = Self::new(settings);
        channel.ensure_open()?;
        Ok(channel)
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Opens the port unless it is already open.
    pub fn ensure_open(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = serialport::new(&self.settings.port, self.settings.baud)
            .timeout(self.settings.timeout)
            .open()
            .map_err(|e| Error::Open {
                target: format!("serial port {}", self.settings.port),
                reason: e.to_string(),
            })?;
        info!(
            "opened {} at {} baud ({} ms timeout)",
            self.settings.port,
            self.settings.baud,
            self.settings.timeout.as_millis()
        );
        self.port = Some(port);
        Ok(())
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(Error::NotConnected)
    }
}

impl Channel for SerialChannel {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port()?;
        debug!("-> {}", String::from_utf8_lossy(bytes).escape_default());
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String> {
        let timeout = self.settings.timeout;
        let port = self.port()?;
        let line = read_terminated(port, timeout)?;
        debug!("<- {}", line.escape_default());
        Ok(line)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("closed {}", self.settings.port);
        }
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// A byte source whose next blocking read can be capped.
trait BoundedRead: Read {
    fn limit_next_read(&mut self, limit: Duration) -> io::Result<()>;
}

impl BoundedRead for Box<dyn SerialPort> {
    fn limit_next_read(&mut self, limit: Duration) -> io::Result<()> {
        (**self).set_timeout(limit).map_err(io::Error::from)
    }
}

/// Reads bytes until a frame terminator, a newline, or the deadline.
///
/// Each read may block only for what is left of `timeout`. Whitespace left
/// over from a previous line is skipped before the line starts.
fn read_terminated<R: BoundedRead + ?Sized>(reader: &mut R, timeout: Duration) -> Result<String> {
    let deadline = Instant::now() + timeout;
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        reader.limit_next_read(remaining)?;
        match reader.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                let b = byte[0];
                if line.is_empty() && b.is_ascii_whitespace() {
                    continue;
                }
                if b == b'\n' {
                    break;
                }
                line.push(b);
                if b == TERMINATOR as u8 {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    reader.limit_next_read(timeout)?;
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// A channel wired to an in-process firmware simulator.
#[derive(Debug, Default)]
pub struct SimulatedChannel {
    simulator: Simulator,
    frames: FrameBuffer,
    outbox: VecDeque<u8>,
    closed: bool,
}

impl SimulatedChannel {
    pub fn new(simulator: Simulator) -> Self {
        Self {
            simulator,
            ..Self::default()
        }
    }

    /// The simulated board behind the channel.
    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    pub fn simulator_mut(&mut self) -> &mut Simulator {
        &mut self.simulator
    }
}

impl Channel for SimulatedChannel {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        for &b in bytes {
            let Some(frame) = self.frames.push(b) else {
                continue;
            };
            match self.simulator.process_frame(&frame) {
                Ok(Some(response)) => self.outbox.extend(response.bytes()),
                Ok(None) => {}
                Err(e) => debug!("simulator ignored '{}': {}", frame, e),
            }
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<String> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        let mut line = Vec::new();
        while let Some(b) = self.outbox.pop_front() {
            line.push(b);
            if b == TERMINATOR as u8 {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
