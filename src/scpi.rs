//! SCPI instrument connections.
//!
//! Instruments are addressed with VISA-style resource strings. Two
//! transports are driven directly:
//!
//! - `TCPIP0::192.168.1.50::5025::SOCKET`: raw SCPI over TCP (LXI socket)
//! - `ASRL/dev/ttyUSB0::INSTR` or `ASRLCOM3::INSTR`: SCPI over a serial port
//!
//! `USB...::INSTR`, `GPIB...::INSTR` and `TCPIP...::INSTR` (VXI-11/HiSLIP)
//! go through the vendor VISA library and need the `visa` feature. Without
//! it they are reported as unsupported when connecting.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

use log::{debug, info};
use serialport::{ClearBuffer, SerialPort};

use crate::error::{Error, Result};

/// Baud rate used for `ASRL` resources.
pub const SERIAL_BAUD: u32 = 9600;

/// A text-command instrument.
pub trait Instrument {
    /// Sends a command that produces no response.
    fn write(&mut self, command: &str) -> Result<()>;

    /// Sends a command and returns its trimmed one-line response.
    fn query(&mut self, command: &str) -> Result<String>;

    /// Releases the connection. Calling it twice is harmless.
    fn close(&mut self);
}

/// A parsed instrument resource string.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    TcpSocket { host: String, port: u16 },
    Serial { device: String },
    /// An `INSTR` resource only a VISA library can open.
    Visa { address: String },
}

impl FromStr for Resource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let unsupported = || Error::UnsupportedResource(s.to_string());
        let parts: Vec<&str> = s.trim().split("::").collect();
        let interface = parts.first().copied().unwrap_or_default();
        let prefix = |p: &str| {
            interface
                .get(..p.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(p))
        };

        if prefix("TCPIP") && parts.len() == 4 && parts[3].eq_ignore_ascii_case("SOCKET") {
            let port = parts[2].parse::<u16>().map_err(|_| unsupported())?;
            if parts[1].is_empty() {
                return Err(unsupported());
            }
            return Ok(Resource::TcpSocket {
                host: parts[1].to_string(),
                port,
            });
        }

        if prefix("ASRL") && parts.len() == 2 && parts[1].eq_ignore_ascii_case("INSTR") {
            let device = &interface[4..];
            if device.is_empty() {
                return Err(unsupported());
            }
            return Ok(Resource::Serial {
                device: device.to_string(),
            });
        }

        let visa_bus = prefix("USB") || prefix("GPIB") || prefix("TCPIP");
        let is_instr = parts.last().is_some_and(|p| p.eq_ignore_ascii_case("INSTR"));
        if visa_bus && is_instr && parts.len() >= 3 && parts[1..].iter().all(|p| !p.is_empty()) {
            return Ok(Resource::Visa {
                address: s.trim().to_string(),
            });
        }

        Err(unsupported())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::TcpSocket { host, port } => write!(f, "TCPIP0::{}::{}::SOCKET", host, port),
            Resource::Serial { device } => write!(f, "ASRL{}::INSTR", device),
            Resource::Visa { address } => f.write_str(address),
        }
    }
}

/// A byte stream an instrument answers on.
pub trait Transport: Read + Write {
    /// Drops input the device sent but nobody has read yet.
    fn discard_input(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn discard_input(&mut self) -> io::Result<()> {
        self.set_nonblocking(true)?;
        let mut scratch = [0u8; 256];
        let drained = loop {
            match self.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };
        self.set_nonblocking(false)?;
        drained
    }
}

impl Transport for Box<dyn SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        (**self).clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Newline-terminated SCPI over any byte stream.
///
/// Each query starts from an empty input, so a reply that arrives after its
/// query timed out is not taken as the answer to the next one.
pub struct LineInstrument<S: Transport> {
    name: String,
    reader: Option<BufReader<S>>,
}

impl<S: Transport> LineInstrument<S> {
    pub fn new(name: impl Into<String>, stream: S) -> Self {
        Self {
            name: name.into(),
            reader: Some(BufReader::new(stream)),
        }
    }

    fn reader(&mut self) -> Result<&mut BufReader<S>> {
        self.reader.as_mut().ok_or(Error::NotConnected)
    }

    fn discard_stale_input(&mut self) -> Result<()> {
        let reader = self.reader()?;
        let buffered = reader.buffer().len();
        if buffered > 0 {
            debug!("dropping {} stale bytes", buffered);
            reader.consume(buffered);
        }
        reader.get_mut().discard_input()?;
        Ok(())
    }
}

impl<S: Transport> Instrument for LineInstrument<S> {
    fn write(&mut self, command: &str) -> Result<()> {
        debug!("{} <- {}", self.name, command);
        let stream = self.reader()?.get_mut();
        stream.write_all(command.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        Ok(())
    }

    fn query(&mut self, command: &str) -> Result<String> {
        self.discard_stale_input()?;
        self.write(command)?;
        let mut line = Vec::new();
        match self.reader()?.read_until(b'\n', &mut line) {
            Ok(0) => {
                return Err(Error::Protocol(format!(
                    "connection closed before answering '{}'",
                    command
                )))
            }
            Ok(_) => {}
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                return Err(Error::Timeout(command.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        let response = String::from_utf8_lossy(&line).trim().to_string();
        debug!("{} -> {}", self.name, response);
        Ok(response)
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            info!("closed {}", self.name);
        }
    }
}

#[cfg(feature = "visa")]
mod visa {
    use std::ffi::CString;
    use std::io::{self, Read, Write};
    use std::time::Duration;

    use visa_rs::prelude::*;

    use super::Transport;
    use crate::error::{Error, Result};

    /// A session opened through the system VISA library.
    ///
    /// The resource manager owns the session, so it is kept alongside it and
    /// dropped after it.
    pub struct VisaSession {
        instrument: visa_rs::Instrument,
        _manager: DefaultRM,
    }

    impl VisaSession {
        pub fn open(address: &str, timeout: Duration) -> Result<Self> {
            let open_err = |reason: String| Error::Open {
                target: address.to_string(),
                reason,
            };
            let manager = DefaultRM::new().map_err(|e| open_err(e.to_string()))?;
            let expr = CString::new(address)
                .map_err(|e| open_err(e.to_string()))?
                .into();
            let id = manager.find_res(&expr).map_err(|e| open_err(e.to_string()))?;
            let instrument = manager
                .open(&id, AccessMode::NO_LOCK, timeout)
                .map_err(|e| open_err(e.to_string()))?;
            Ok(Self {
                instrument,
                _manager: manager,
            })
        }
    }

    impl Read for VisaSession {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            (&self.instrument).read(buf)
        }
    }

    impl Write for VisaSession {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            (&self.instrument).write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            (&self.instrument).flush()
        }
    }

    // VISA reads are message based; nothing queues up between them beyond
    // what the line reader has buffered.
    impl Transport for VisaSession {
        fn discard_input(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(feature = "visa")]
pub use visa::VisaSession;

/// An open instrument connection of whichever transport the resource named.
pub enum Connection {
    Tcp(LineInstrument<TcpStream>),
    Serial(LineInstrument<Box<dyn SerialPort>>),
    #[cfg(feature = "visa")]
    Visa(LineInstrument<VisaSession>),
    Simulated(SimulatedDmm),
}

impl Connection {
    /// Opens the instrument named by `resource`.
    pub fn open(resource: &str, timeout: Duration) -> Result<Self> {
        let parsed: Resource = resource.parse()?;
        let open_err = |reason: String| Error::Open {
            target: resource.to_string(),
            reason,
        };

        match parsed {
            Resource::TcpSocket { host, port } => {
                let addr = (host.as_str(), port)
                    .to_socket_addrs()
                    .map_err(|e| open_err(e.to_string()))?
                    .next()
                    .ok_or_else(|| open_err(format!("could not resolve {}", host)))?;
                let stream =
                    TcpStream::connect_timeout(&addr, timeout).map_err(|e| open_err(e.to_string()))?;
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                info!("connected to {} ({})", resource, addr);
                Ok(Connection::Tcp(LineInstrument::new(resource, stream)))
            }
            Resource::Serial { device } => {
                let port = serialport::new(&device, SERIAL_BAUD)
                    .timeout(timeout)
                    .open()
                    .map_err(|e| open_err(e.to_string()))?;
                info!("opened {} at {} baud", device, SERIAL_BAUD);
                Ok(Connection::Serial(LineInstrument::new(resource, port)))
            }
            #[cfg(feature = "visa")]
            Resource::Visa { address } => {
                let session = VisaSession::open(&address, timeout)?;
                info!("opened {} through VISA", address);
                Ok(Connection::Visa(LineInstrument::new(resource, session)))
            }
            #[cfg(not(feature = "visa"))]
            Resource::Visa { address } => Err(Error::UnsupportedResource(format!(
                "{} (built without the `visa` feature)",
                address
            ))),
        }
    }
}

impl Instrument for Connection {
    fn write(&mut self, command: &str) -> Result<()> {
        match self {
            Connection::Tcp(inst) => inst.write(command),
            Connection::Serial(inst) => inst.write(command),
            #[cfg(feature = "visa")]
            Connection::Visa(inst) => inst.write(command),
            Connection::Simulated(inst) => inst.write(command),
        }
    }

    fn query(&mut self, command: &str) -> Result<String> {
        match self {
            Connection::Tcp(inst) => inst.query(command),
            Connection::Serial(inst) => inst.query(command),
            #[cfg(feature = "visa")]
            Connection::Visa(inst) => inst.query(command),
            Connection::Simulated(inst) => inst.query(command),
        }
    }

    fn close(&mut self) {
        match self {
            Connection::Tcp(inst) => inst.close(),
            Connection::Serial(inst) => inst.close(),
            #[cfg(feature = "visa")]
            Connection::Visa(inst) => inst.close(),
            Connection::Simulated(inst) => inst.close(),
        }
    }
}

/// Identity string the simulated meter reports for `*IDN?`.
pub const SIMULATED_IDN: &str = "Keysight Technologies,EDU34450A,SIM00000001,1.00";

/// Measurement function selected with `CONF:...`.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Function {
    VoltageDc,
    Frequency,
}

/// A bench multimeter that answers the SCPI subset the LO validator uses.
///
/// A reading set to `None` makes the matching `MEAS` query time out.
#[derive(Debug, Clone)]
pub struct SimulatedDmm {
    pub voltage: Option<f64>,
    pub frequency: Option<f64>,
    /// Makes `*RST` fail.
    pub reject_reset: bool,
    /// Every command received, in order.
    pub history: Vec<String>,
    function: Option<Function>,
    closed: bool,
}

impl SimulatedDmm {
    pub fn new(voltage: Option<f64>, frequency: Option<f64>) -> Self {
        Self {
            voltage,
            frequency,
            reject_reset: false,
            history: Vec::new(),
            function: None,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn reading(&self, command: &str, value: Option<f64>) -> Result<String> {
        value
            .map(|v| format!("{:+.8E}", v))
            .ok_or_else(|| Error::Timeout(command.to_string()))
    }
}

impl Instrument for SimulatedDmm {
    fn write(&mut self, command: &str) -> Result<()> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        self.history.push(command.to_string());
        match command.trim().to_ascii_uppercase().as_str() {
            "*RST" if self.reject_reset => Err(Error::Protocol(String::from("reset rejected"))),
            "*RST" => {
                self.function = None;
                Ok(())
            }
            "CONF:VOLT:DC AUTO" | "CONF:VOLT:DC" => {
                self.function = Some(Function::VoltageDc);
                Ok(())
            }
            "CONF:FREQ" => {
                self.function = Some(Function::Frequency);
                Ok(())
            }
            other => Err(Error::Protocol(format!("undefined header '{}'", other))),
        }
    }

    fn query(&mut self, command: &str) -> Result<String> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        self.history.push(command.to_string());
        match command.trim().to_ascii_uppercase().as_str() {
            "*IDN?" => Ok(String::from(SIMULATED_IDN)),
            "MEAS:VOLT:DC?" => {
                self.function = Some(Function::VoltageDc);
                self.reading(command, self.voltage)
            }
            "MEAS:FREQ?" => {
                self.function = Some(Function::Frequency);
                self.reading(command, self.frequency)
            }
            "READ?" => match self.function {
                Some(Function::VoltageDc) => self.reading(command, self.voltage),
                Some(Function::Frequency) => self.reading(command, self.frequency),
                None => Err(Error::Protocol(String::from("no function configured"))),
            },
            other => Err(Error::Protocol(format!("undefined header '{}'", other))),
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory instrument. Each query line written queues the next reply;
    /// anything in `input` before that is what the meter sent earlier.
    struct Loopback {
        input: VecDeque<u8>,
        replies: VecDeque<&'static str>,
        output: Vec<u8>,
    }

    impl Loopback {
        fn new(pending: &str) -> Self {
            Self {
                input: pending.bytes().collect(),
                replies: VecDeque::new(),
                output: Vec::new(),
            }
        }

        fn answering(replies: &[&'static str]) -> Self {
            Self {
                replies: replies.iter().copied().collect(),
                ..Self::new("")
            }
        }
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.input.len());
            for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            if buf.ends_with(b"\n") {
                let body = &self.output[..self.output.len() - 1];
                let last_line = body.rsplit(|&b| b == b'\n').next().unwrap_or_default();
                if last_line.contains(&b'?') {
                    if let Some(reply) = self.replies.pop_front() {
                        self.input.extend(reply.bytes());
                    }
                }
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for Loopback {
        fn discard_input(&mut self) -> io::Result<()> {
            self.input.clear();
            Ok(())
        }
    }

    #[test]
    fn parse_tcp_socket_resource() {
        let r: Resource = "TCPIP0::192.168.1.50::5025::SOCKET".parse().unwrap();
        assert_eq!(
            r,
            Resource::TcpSocket {
                host: String::from("192.168.1.50"),
                port: 5025
            }
        );
        assert_eq!(r.to_string(), "TCPIP0::192.168.1.50::5025::SOCKET");
    }

    #[test]
    fn parse_serial_resource() {
        let r: Resource = "ASRL/dev/ttyUSB0::INSTR".parse().unwrap();
        assert_eq!(
            r,
            Resource::Serial {
                device: String::from("/dev/ttyUSB0")
            }
        );
        let r: Resource = "asrlCOM3::instr".parse().unwrap();
        assert_eq!(r, Resource::Serial { device: String::from("COM3") });
    }

    #[test]
    fn parse_visa_resources() {
        for s in [
            "USB0::0x2A8D::0x3502::MY12345678::INSTR",
            "GPIB0::22::INSTR",
            "TCPIP0::10.0.0.2::inst0::INSTR",
            "TCPIP0::10.0.0.2::INSTR",
        ] {
            let r: Resource = s.parse().unwrap();
            assert_eq!(r, Resource::Visa { address: s.to_string() });
            assert_eq!(r.to_string(), s);
        }
    }

    #[test]
    fn malformed_resources_are_unsupported() {
        for s in [
            "USB0::INSTR",
            "GPIB0::::INSTR",
            "VXI0::1::INSTR",
            "TCPIP0::10.0.0.2::notaport::SOCKET",
            "ASRL::INSTR",
            "",
        ] {
            let err = s.parse::<Resource>().unwrap_err();
            assert!(matches!(err, Error::UnsupportedResource(_)), "{}", s);
        }
    }

    #[cfg(not(feature = "visa"))]
    #[test]
    fn visa_resource_needs_visa_feature() {
        let err = Connection::open("USB0::0x2A8D::0x3502::MY12345678::INSTR", Duration::from_millis(10))
            .err()
            .unwrap();
        match err {
            Error::UnsupportedResource(msg) => assert!(msg.contains("visa"), "{}", msg),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn line_instrument_appends_newline() {
        let mut inst = LineInstrument::new("loop", Loopback::new(""));
        inst.write("*RST").unwrap();
        inst.write("CONF:FREQ").unwrap();
        let stream = inst.reader.as_ref().unwrap().get_ref();
        assert_eq!(stream.output, b"*RST\nCONF:FREQ\n");
    }

    #[test]
    fn line_instrument_query_trims_response() {
        let mut inst = LineInstrument::new("loop", Loopback::answering(&["+1.00023400E+00\r\n"]));
        assert_eq!(inst.query("MEAS:VOLT:DC?").unwrap(), "+1.00023400E+00");
    }

    #[test]
    fn late_reply_is_not_taken_for_the_next_answer() {
        // A voltage reading that arrived after its query gave up.
        let mut inst = LineInstrument::new("loop", Loopback::new("+1.00000000E+00\n"));
        inst.reader.as_mut().unwrap().get_mut().replies.push_back("+1.00000000E+07\n");
        assert_eq!(inst.query("MEAS:FREQ?").unwrap(), "+1.00000000E+07");
    }

    #[test]
    fn buffered_extra_line_is_dropped_before_next_query() {
        let mut inst = LineInstrument::new("loop", Loopback::answering(&["first\nlate\n", "second\n"]));
        assert_eq!(inst.query("*IDN?").unwrap(), "first");
        assert_eq!(inst.query("READ?").unwrap(), "second");
    }

    #[test]
    fn line_instrument_query_on_closed_stream() {
        let mut inst = LineInstrument::new("loop", Loopback::new(""));
        assert!(matches!(inst.query("*IDN?"), Err(Error::Protocol(_))));
        inst.close();
        assert!(matches!(inst.write("*RST"), Err(Error::NotConnected)));
    }

    #[test]
    fn simulated_dmm_answers_measurements() {
        let mut dmm = SimulatedDmm::new(Some(1.0), Some(10_000_000.0));
        assert_eq!(dmm.query("*IDN?").unwrap(), SIMULATED_IDN);
        dmm.write("CONF:VOLT:DC AUTO").unwrap();
        let v: f64 = dmm.query("MEAS:VOLT:DC?").unwrap().parse().unwrap();
        assert_eq!(v, 1.0);
        dmm.write("CONF:FREQ").unwrap();
        let f: f64 = dmm.query("MEAS:FREQ?").unwrap().parse().unwrap();
        assert_eq!(f, 10_000_000.0);
        assert_eq!(dmm.query("READ?").unwrap(), dmm.query("MEAS:FREQ?").unwrap());
    }

    #[test]
    fn simulated_dmm_missing_reading_times_out() {
        let mut dmm = SimulatedDmm::new(None, Some(1.0));
        assert!(matches!(dmm.query("MEAS:VOLT:DC?"), Err(Error::Timeout(_))));
    }

    #[test]
    fn simulated_dmm_rejects_unknown_headers() {
        let mut dmm = SimulatedDmm::new(None, None);
        assert!(matches!(dmm.write("SYST:BEEP"), Err(Error::Protocol(_))));
        dmm.reject_reset = true;
        assert!(dmm.write("*RST").is_err());
        dmm.close();
        assert!(matches!(dmm.query("*IDN?"), Err(Error::NotConnected)));
    }
}
