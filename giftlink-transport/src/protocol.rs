//! Line protocol spoken by gift-driven microcontrollers
//!
//! Every command is one line of ASCII text terminated by `\n`; the board
//! answers with exactly one line. Fields are separated by `:`.

use std::fmt;

/// Default serial speed of the stock firmware
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Probe sent right after opening a port
pub const HANDSHAKE_PROBE: &str = "TEST";

/// Liveness probe sent by the heartbeat sweep
pub const HEARTBEAT_PROBE: &str = "HEARTBEAT";

/// Greetings accepted as a successful handshake (case-insensitive)
pub const HANDSHAKE_ACKS: &[&str] = &["OK", "READY", "ARDUINO READY"];

/// Timing constants
pub mod timing {
    /// Read deadline for a single response
    pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
    /// Boards reset when the port opens; wait before talking to them
    pub const BOOT_DELAY_MS: u64 = 2000;
    pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
    /// Consecutive failures before the handle is closed
    pub const DEFAULT_RETRY_COUNT: u32 = 3;
}

/// Parameter defaults used when a command omits them
pub mod defaults {
    pub const LED_COLOR: &str = "#ffffff";
    pub const LED_BRIGHTNESS: u8 = 50;
    pub const LED_DURATION_MS: u32 = 3000;
    pub const RAINBOW_DURATION_MS: u32 = 5000;
    pub const SERVO_ANGLE: u16 = 90;
    pub const SOUND_NAME: &str = "beep";
    pub const SOUND_DURATION_MS: u32 = 1000;
    pub const DISPLAY_DURATION_MS: u32 = 5000;
}

/// True if `response` is one of the accepted handshake greetings
pub fn is_handshake_ack(response: &str) -> bool {
    let response = response.trim();
    HANDSHAKE_ACKS
        .iter()
        .any(|ack| response.eq_ignore_ascii_case(ack))
}

/// True if `text` can travel as a single protocol line
pub fn is_single_line(text: &str) -> bool {
    !text.is_empty() && !text.contains(['\n', '\r'])
}

/// A command understood by the stock firmware.
///
/// `Display` renders the wire text without the trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `GIFT:<TYPE>` - let the firmware run its own effect
    Gift { gift_type: String },
    /// `LED:COLOR:<color>:<brightness>:<duration_ms>`
    LedColor {
        color: String,
        brightness: u8,
        duration_ms: u32,
    },
    /// `LED:RAINBOW:<duration_ms>`
    LedRainbow { duration_ms: u32 },
    /// `LED:CLEAR`
    LedClear,
    /// `SERVO:<index>:<angle>`
    Servo { index: u8, angle: u16 },
    /// `SOUND:<name>:<duration_ms>`
    Sound { name: String, duration_ms: u32 },
    /// `DISPLAY:<text>:<duration_ms>`
    Display { text: String, duration_ms: u32 },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Gift { gift_type } => write!(f, "GIFT:{gift_type}"),
            Command::LedColor {
                color,
                brightness,
                duration_ms,
            } => write!(f, "LED:COLOR:{color}:{brightness}:{duration_ms}"),
            Command::LedRainbow { duration_ms } => write!(f, "LED:RAINBOW:{duration_ms}"),
            Command::LedClear => f.write_str("LED:CLEAR"),
            Command::Servo { index, angle } => write!(f, "SERVO:{index}:{angle}"),
            Command::Sound { name, duration_ms } => write!(f, "SOUND:{name}:{duration_ms}"),
            Command::Display { text, duration_ms } => write!(f, "DISPLAY:{text}:{duration_ms}"),
        }
    }
}
