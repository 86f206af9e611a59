//! Mock peripherals for host-side tests and the simulation harness.
//!
//! All mocks hand out cloneable handles so a test can keep poking at a
//! peripheral after ownership has moved into the component under test.

use crate::{AdcChannel, AdcError, Clock, PwmChannel, TelemetrySink, ADC_MAX};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A virtual clock advanced by the test (or by `sleep_ms` itself, which
/// lets a whole control-loop run execute in zero wall time).
#[derive(Clone)]
pub struct MockClock {
    micros: Arc<AtomicU64>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            micros: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.micros.fetch_add(ms * 1000, Ordering::Relaxed);
    }

    pub fn advance_us(&self, us: u64) {
        self.micros.fetch_add(us, Ordering::Relaxed);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.micros.load(Ordering::Relaxed) / 1000
    }

    fn now_us(&self) -> u64 {
        self.micros.load(Ordering::Relaxed)
    }

    fn sleep_ms(&mut self, ms: u64) {
        // Virtual time: sleeping just advances the clock.
        self.advance_ms(ms);
    }
}

/// An ADC channel whose level is set from outside.
///
/// `set_raw(0)` or `set_raw(ADC_MAX)` simulates an open/shorted sensor;
/// `fail()` simulates a bus fault.
#[derive(Clone)]
pub struct MockAdc {
    raw: Arc<AtomicU16>,
    failing: Arc<AtomicBool>,
}

impl MockAdc {
    pub fn new(raw: u16) -> Self {
        Self {
            raw: Arc::new(AtomicU16::new(raw)),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_raw(&self, raw: u16) {
        self.raw.store(raw.min(ADC_MAX), Ordering::Relaxed);
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }
}

impl AdcChannel for MockAdc {
    fn read(&mut self) -> Result<u16, AdcError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(AdcError::Failed);
        }
        Ok(self.raw.load(Ordering::Relaxed))
    }
}

/// A PWM channel that records every duty written to it.
#[derive(Clone)]
pub struct MockPwm {
    state: Arc<Mutex<PwmState>>,
    max_duty: u16,
}

struct PwmState {
    duty: u16,
    history: Vec<u16>,
}

impl MockPwm {
    pub fn new(max_duty: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(PwmState {
                duty: 0,
                history: Vec::new(),
            })),
            max_duty,
        }
    }

    /// Every duty ever written, oldest first.
    pub fn history(&self) -> Vec<u16> {
        self.state.lock().unwrap().history.clone()
    }
}

impl PwmChannel for MockPwm {
    fn set_duty(&mut self, duty: u16) {
        let mut state = self.state.lock().unwrap();
        state.duty = duty.min(self.max_duty);
        let written = state.duty;
        state.history.push(written);
    }

    fn duty(&self) -> u16 {
        self.state.lock().unwrap().duty
    }

    fn max_duty(&self) -> u16 {
        self.max_duty
    }
}

/// A telemetry sink that captures sent lines.
#[derive(Clone)]
pub struct MockTelemetry {
    connected: Arc<AtomicBool>,
    lines: Arc<Mutex<Vec<String>>>,
}

impl MockTelemetry {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(connected)),
            lines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl TelemetrySink for MockTelemetry {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn send_line(&mut self, line: &str) {
        if self.is_connected() {
            self.lines.lock().unwrap().push(line.to_string());
        }
    }
}
