//! Telemetry line codec: outbound frames and inbound CV commands.
//!
//! The link itself (BLE UART, advertising, UUIDs) is boundary code behind
//! [`loco_hal::TelemetrySink`]; this module owns the byte-level grammar
//! on both directions.

use thiserror::Error;

/// kPa per PSI, for the transducer conversion and the outbound frame.
pub const KPA_PER_PSI: f32 = 6.89476;

/// Maximum bytes buffered while waiting for a line terminator.
pub const RX_LINE_MAX: usize = 128;
/// Maximum queued commands.
pub const RX_QUEUE_DEPTH: usize = 16;
/// Maximum length of a single parsed command.
pub const COMMAND_MAX: usize = 32;

/// Formats the 1 Hz outbound telemetry frame.
///
/// Pressure is carried canonically in kPa inside the core and reported in
/// PSI on the wire, one decimal on every float.
pub fn format_frame(
    speed_cms: f32,
    pressure_kpa: f32,
    boiler_c: f32,
    super_c: f32,
    logic_c: f32,
    servo_duty: u16,
) -> String {
    format!(
        "SPD:{:.1}|PSI:{:.1}|TB:{:.1}|TS:{:.1}|TL:{:.1}|SRV:{}\n",
        speed_cms,
        pressure_kpa / KPA_PER_PSI,
        boiler_c,
        super_c,
        logic_c,
        servo_duty
    )
}

/// Errors from the inbound command grammar.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("not a CV command")]
    NotCv,
    #[error("missing '='")]
    MissingEquals,
    #[error("invalid CV number")]
    BadNumber,
    #[error("empty value")]
    EmptyValue,
}

/// Parses one `CV<n>=<value>` line into its number and raw value text.
///
/// The prefix is case-insensitive; the value is validated against the
/// bounds table later by the CV layer, not here.
pub fn parse_command(line: &str) -> Result<(u8, &str), CommandError> {
    let line = line.trim();
    let (key, value) = line.split_once('=').ok_or(CommandError::MissingEquals)?;
    let key = key.trim();
    let prefix_ok = key
        .get(..2)
        .map(|p| p.eq_ignore_ascii_case("cv"))
        .unwrap_or(false);
    if key.len() < 3 || !prefix_ok {
        return Err(CommandError::NotCv);
    }
    let number: u8 = key[2..].parse().map_err(|_| CommandError::BadNumber)?;
    let value = value.trim();
    if value.is_empty() {
        return Err(CommandError::EmptyValue);
    }
    Ok((number, value))
}

/// Inbound byte accumulator and command queue.
///
/// Transport code pushes raw received bytes; the control loop drains at
/// most one queued command per tick. Malformed, over-long and non-UTF-8
/// lines are dropped silently, and several commands may arrive in one
/// packet split by newlines.
#[derive(Debug)]
pub struct CommandQueue {
    line: heapless::Vec<u8, RX_LINE_MAX>,
    queue: heapless::Deque<heapless::String<COMMAND_MAX>, RX_QUEUE_DEPTH>,
    /// Set when the line buffer overflowed; bytes are discarded until the
    /// next terminator so a runaway sender cannot wedge the parser.
    overflowed: bool,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            line: heapless::Vec::new(),
            queue: heapless::Deque::new(),
            overflowed: false,
        }
    }

    /// Feeds received bytes into the accumulator.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if byte == b'\n' {
                if !self.overflowed {
                    self.finish_line();
                }
                self.line.clear();
                self.overflowed = false;
                continue;
            }
            if self.overflowed {
                continue;
            }
            if self.line.push(byte).is_err() {
                self.line.clear();
                self.overflowed = true;
            }
        }
    }

    fn finish_line(&mut self) {
        let Ok(text) = core::str::from_utf8(&self.line) else {
            return; // non-UTF-8, drop
        };
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let mut command = heapless::String::<COMMAND_MAX>::new();
        if command.push_str(text).is_err() {
            return; // over-long command, drop
        }
        // When the queue is full the newest command loses.
        let _ = self.queue.push_back(command);
    }

    /// Takes the oldest pending command, if any.
    pub fn pop(&mut self) -> Option<heapless::String<COMMAND_MAX>> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_format_matches_contract() {
        let frame = format_frame(35.21, 55.3 * KPA_PER_PSI, 95.04, 210.0, 45.96, 450);
        assert_eq!(frame, "SPD:35.2|PSI:55.3|TB:95.0|TS:210.0|TL:46.0|SRV:450\n");
    }

    #[test]
    fn parses_simple_command() {
        assert_eq!(parse_command("CV32=20.0"), Ok((32, "20.0")));
        assert_eq!(parse_command("cv44 = 10"), Ok((44, "10")));
    }

    #[test]
    fn rejects_malformed_commands() {
        assert_eq!(parse_command("SPEED=10"), Err(CommandError::NotCv));
        assert_eq!(parse_command("CV32"), Err(CommandError::MissingEquals));
        assert_eq!(parse_command("CVx=1"), Err(CommandError::BadNumber));
        assert_eq!(parse_command("CV300=1"), Err(CommandError::BadNumber));
        assert_eq!(parse_command("CV32="), Err(CommandError::EmptyValue));
    }

    #[test]
    fn queue_splits_multiple_commands_per_packet() {
        let mut queue = CommandQueue::new();
        queue.push_bytes(b"CV32=20.0\nCV44=10\n");
        assert_eq!(queue.pop().unwrap().as_str(), "CV32=20.0");
        assert_eq!(queue.pop().unwrap().as_str(), "CV44=10");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn queue_reassembles_split_packets() {
        let mut queue = CommandQueue::new();
        queue.push_bytes(b"CV3");
        queue.push_bytes(b"2=20.0\n");
        assert_eq!(queue.pop().unwrap().as_str(), "CV32=20.0");
    }

    #[test]
    fn queue_drops_non_utf8() {
        let mut queue = CommandQueue::new();
        queue.push_bytes(&[0xFF, 0xFE, b'\n']);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn queue_discards_overlong_line_to_next_terminator() {
        let mut queue = CommandQueue::new();
        queue.push_bytes(&[b'x'; 200]);
        queue.push_bytes(b"\nCV32=20.0\n");
        assert_eq!(queue.pop().unwrap().as_str(), "CV32=20.0");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn queue_caps_depth() {
        let mut queue = CommandQueue::new();
        for _ in 0..20 {
            queue.push_bytes(b"CV32=20.0\n");
        }
        assert_eq!(queue.len(), RX_QUEUE_DEPTH);
    }
}
