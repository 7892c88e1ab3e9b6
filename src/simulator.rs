//! # SDR Controller CAT Simulator
//!
//! Core logic for simulating the SDR controller board's CAT responder.
//! It holds the state the firmware keeps (output frequency, TX line, AI and
//! split flags, front-panel step size) and answers command frames with the
//! exact bytes the real hardware sends back.

/// Frame terminator used by every CAT command and response.
pub const TERMINATOR: char = ';';

/// Output frequency the board powers up with.
pub const INITIAL_FREQUENCY_HZ: u32 = 10_000_000;
/// Lowest frequency the Si5351 output is allowed to reach.
pub const MIN_FREQUENCY_HZ: u32 = 8_000_000;
/// Highest frequency the Si5351 output is allowed to reach.
pub const MAX_FREQUENCY_HZ: u32 = 16_000_000;

/// Static identifier returned for `ID`.
pub const DEVICE_ID: &str = "ID0650;";

/// The receive buffer on the board is 32 bytes including the NUL.
const MAX_FRAME_LEN: usize = 31;

/// Front-panel step sizes, cycled in this order.
const STEP_SIZES: [u32; 4] = [1_000_000, 100_000, 10_000, 1_000];

// Reasons a frame produced no response. The board itself stays silent in
// all of these cases; the variants exist so callers can report why.
#[derive(Debug, PartialEq)]
pub enum CommandError {
    /// The input holds no ';' terminated frame.
    MissingTerminator,
    /// The frame is empty or shorter than a two-letter command code.
    TooShort,
    /// The two-letter command code is not one the board knows.
    UnknownCommand(String),
    /// The command is known, but its parameter is not accepted.
    InvalidParameter(String),
    /// A frequency set request outside the 8-16 MHz window.
    FrequencyOutOfRange(u64),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::MissingTerminator => write!(f, "frame is missing the ';' terminator"),
            CommandError::TooShort => write!(f, "frame is too short"),
            CommandError::UnknownCommand(code) => write!(f, "unknown command '{}'", code),
            CommandError::InvalidParameter(frame) => write!(f, "invalid parameter in '{}'", frame),
            CommandError::FrequencyOutOfRange(hz) => write!(
                f,
                "frequency {} Hz outside {}-{} Hz",
                hz, MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ
            ),
        }
    }
}

impl std::error::Error for CommandError {}

/// Accumulates received bytes into `;` terminated frames.
///
/// Characters past the board's buffer capacity are dropped, the same way the
/// firmware stops storing once its receive buffer is full.
#[derive(Debug, Default, Clone)]
pub struct FrameBuffer {
    buf: String,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes one received byte. Returns the frame content (without the
    /// terminator) once a `;` arrives.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        if byte == TERMINATOR as u8 {
            return Some(std::mem::take(&mut self.buf));
        }
        if self.buf.len() < MAX_FRAME_LEN {
            self.buf.push(byte as char);
        }
        None
    }

    /// Bytes received since the last terminator.
    pub fn pending(&self) -> &str {
        &self.buf
    }
}

// The main struct that holds the simulated controller state.
#[derive(Debug, Clone)]
pub struct Simulator {
    /// Current Si5351 output frequency in Hz.
    pub frequency_hz: u32,
    /// State of the TXEN line.
    pub transmitting: bool,
    /// Auto-information flag (`AI`).
    pub auto_info: bool,
    /// Split flag (`ST`).
    pub split: bool,
    // Index into STEP_SIZES.
    precision_mode: usize,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    /// Creates a simulator in the board's power-on state.
    pub fn new() -> Self {
        Self {
            frequency_hz: INITIAL_FREQUENCY_HZ,
            transmitting: false,
            auto_info: false,
            split: false,
            precision_mode: 0,
        }
    }

    /// Current front-panel frequency step in Hz.
    pub fn step_size(&self) -> u32 {
        STEP_SIZES[self.precision_mode]
    }

    /// Processes a command string holding one `;` terminated frame and
    /// returns the response the board would send, if any.
    ///
    /// Anything after the first terminator is ignored.
    pub fn process_command(&mut self, command_str: &str) -> Result<Option<String>, CommandError> {
        let end = command_str.find(TERMINATOR).ok_or(CommandError::MissingTerminator)?;
        let content = command_str[..end].trim();
        let content = match content.char_indices().nth(MAX_FRAME_LEN) {
            Some((cut, _)) => &content[..cut],
            None => content,
        };
        self.process_frame(content)
    }

    /// Processes the content of a single frame, terminator already removed.
    pub fn process_frame(&mut self, content: &str) -> Result<Option<String>, CommandError> {
        if content.len() < 2 || !content.is_char_boundary(2) {
            return Err(CommandError::TooShort);
        }
        let (code, param) = content.split_at(2);

        match code {
            "TX" => self.handle_flag(param, content, |sim| &mut sim.transmitting, "TX"),
            "AI" => self.handle_flag(param, content, |sim| &mut sim.auto_info, "AI"),
            "ST" => self.handle_flag(param, content, |sim| &mut sim.split, "ST"),
            "FA" => self.handle_frequency(param, content),
            "ID" => Ok(Some(String::from(DEVICE_ID))),
            "MD" => {
                if param.starts_with('0') {
                    Ok(Some(String::from("MD0C;")))
                } else {
                    Err(CommandError::InvalidParameter(content.to_string()))
                }
            }
            "SH" => Ok(Some(String::from("SH0000;"))),
            "NA" => Ok(Some(String::from("NA00;"))),
            "IF" => Ok(Some(format!("IF001{:09}+000000C00000;", self.frequency_hz))),
            _ => Err(CommandError::UnknownCommand(code.to_string())),
        }
    }

    /// Handles the on/off style commands: an empty parameter is a query,
    /// `0` or `1` as the first parameter character sets the flag.
    fn handle_flag(
        &mut self,
        param: &str,
        content: &str,
        flag: fn(&mut Simulator) -> &mut bool,
        code: &str,
    ) -> Result<Option<String>, CommandError> {
        if param.is_empty() {
            return Ok(Some(format!("{}{};", code, u8::from(*flag(self)))));
        }
        match param.as_bytes()[0] {
            b'0' => *flag(self) = false,
            b'1' => *flag(self) = true,
            _ => return Err(CommandError::InvalidParameter(content.to_string())),
        }
        Ok(None)
    }

    fn handle_frequency(&mut self, param: &str, content: &str) -> Result<Option<String>, CommandError> {
        if param.is_empty() {
            return Ok(Some(format!("FA{:09};", self.frequency_hz)));
        }
        // Only the leading run of digits counts, like strtoul.
        let digits: String = param.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(CommandError::InvalidParameter(content.to_string()));
        }
        let requested = digits.parse::<u64>().unwrap_or(u64::MAX);
        if requested < u64::from(MIN_FREQUENCY_HZ) || requested > u64::from(MAX_FREQUENCY_HZ) {
            return Err(CommandError::FrequencyOutOfRange(requested));
        }
        self.frequency_hz = requested as u32;
        Ok(None)
    }

    /// Front-panel "up" button. Ignored if it would pass 16 MHz.
    pub fn step_up(&mut self) {
        let raised = self.frequency_hz.saturating_add(self.step_size());
        if raised <= MAX_FREQUENCY_HZ {
            self.frequency_hz = raised;
        }
    }

    /// Front-panel "down" button. Ignored if it would drop below 8 MHz.
    pub fn step_down(&mut self) {
        match self.frequency_hz.checked_sub(self.step_size()) {
            Some(lowered) if lowered >= MIN_FREQUENCY_HZ => self.frequency_hz = lowered,
            _ => {}
        }
    }

    /// Front-panel step button: 1 MHz, 100 kHz, 10 kHz, 1 kHz, then around.
    pub fn cycle_step_size(&mut self) {
        self.precision_mode = (self.precision_mode + 1) % STEP_SIZES.len();
    }

    /// Front-panel TX button.
    pub fn toggle_tx(&mut self) {
        self.transmitting = !self.transmitting;
    }
}
