#![cfg_attr(not(feature = "std"), no_std)]

//! # Locomotive HAL
//!
//! Capability traits decoupling the controller core from the MCU
//! peripherals it drives. The firmware crates only ever talk to these
//! traits; board support code implements them on top of the real ADC, PWM
//! and radio drivers, and the test/simulation side implements them with
//! [`mock`] peripherals.
//!
//! ## Traits
//!
//! - [`Clock`]: monotonic milliseconds/microseconds since boot plus a
//!   cooperative sleep.
//! - [`AdcChannel`]: a single analogue input returning raw 12-bit codes.
//! - [`PwmChannel`]: a single PWM output with a platform duty range.
//! - [`TelemetrySink`]: the outbound half of the line-oriented telemetry
//!   link. Transport details (advertising, UUIDs) live in board code.

pub mod adapter;
#[cfg(feature = "mock")]
pub mod mock;

/// Full-scale value of the 12-bit ADCs used on this board.
pub const ADC_MAX: u16 = 4095;

/// Errors an analogue read can surface.
///
/// A disconnected or shorted sensor usually manifests as a rail value
/// rather than an error; `Failed` covers genuine bus/peripheral faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcError {
    /// The conversion could not be performed.
    Failed,
}

/// Monotonic time source for the control loop and shapers.
pub trait Clock {
    /// Milliseconds since boot.
    fn now_ms(&self) -> u64;

    /// Microseconds since boot, for edge-timing paths.
    fn now_us(&self) -> u64;

    /// Sleep the foreground task. ISRs keep running.
    fn sleep_ms(&mut self, ms: u64);
}

/// A single analogue input channel.
pub trait AdcChannel {
    /// One raw conversion, `0..=`[`ADC_MAX`].
    fn read(&mut self) -> Result<u16, AdcError>;
}

/// A single PWM output channel.
///
/// Heater channels run with a 0..=1023 duty range at ~1 kHz; the servo
/// channel runs at 50 Hz with the CV-configured duty window. Setting a duty
/// is infallible by contract: implementations clamp to [`max_duty`].
///
/// [`max_duty`]: PwmChannel::max_duty
pub trait PwmChannel {
    /// Write a new duty cycle, clamped to the channel's range.
    fn set_duty(&mut self, duty: u16);

    /// The last duty written.
    fn duty(&self) -> u16;

    /// Upper bound of the duty range.
    fn max_duty(&self) -> u16;
}

/// Outbound half of the telemetry link.
///
/// Frames are dropped silently when no peer is connected; the link must
/// never block the control loop.
pub trait TelemetrySink {
    /// Whether a peer is currently connected.
    fn is_connected(&self) -> bool;

    /// Queue one line for transmission. Implementations drop the line when
    /// disconnected or when the transport buffer is full.
    fn send_line(&mut self, line: &str);
}

/// Wall-clock [`Clock`] for host-side use.
#[cfg(feature = "std")]
pub struct SystemClock {
    start: std::time::Instant,
}

#[cfg(feature = "std")]
impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    fn sleep_ms(&mut self, ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }
}
