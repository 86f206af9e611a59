//! Optical wheel-encoder tracking.
//!
//! The ISR half is a wrap-safe atomic pulse counter; the foreground half
//! derives velocity once per second from the pulse delta. An encoder
//! stall is not a fault: it reads as zero velocity, which is the safe
//! default.

use motion::PhysicsEngine;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Interval between velocity estimates.
pub const VELOCITY_WINDOW_MS: u64 = 1000;

/// The ISR-side pulse counter. The edge handler does nothing but one
/// relaxed increment: no allocation, no floating point.
#[derive(Debug, Default)]
pub struct EncoderCounter(AtomicU32);

impl EncoderCounter {
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// ISR entry point: one rising edge.
    pub fn on_edge(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Foreground velocity estimator over the shared counter.
pub struct EncoderTracker {
    counter: Arc<EncoderCounter>,
    last_count: u32,
    last_estimate_ms: u64,
    velocity_cms: f32,
}

impl EncoderTracker {
    pub fn new(counter: Arc<EncoderCounter>) -> Self {
        Self {
            counter,
            last_count: 0,
            last_estimate_ms: 0,
            velocity_cms: 0.0,
        }
    }

    /// Runs each control cycle; recomputes velocity once per
    /// [`VELOCITY_WINDOW_MS`].
    pub fn tick(&mut self, now_ms: u64, physics: &PhysicsEngine) {
        let elapsed = now_ms.saturating_sub(self.last_estimate_ms);
        if elapsed < VELOCITY_WINDOW_MS {
            return;
        }
        let count = self.counter.count();
        let delta = count.wrapping_sub(self.last_count);
        self.velocity_cms = physics.calc_velocity(delta as i32, elapsed as u32);
        self.last_count = count;
        self.last_estimate_ms = now_ms;
    }

    /// Latest velocity estimate, cm/s. Returns instantly.
    pub fn velocity_cms(&self) -> f32 {
        self.velocity_cms
    }

    /// Total pulses since boot. Returns instantly.
    pub fn count(&self) -> u32 {
        self.counter.count()
    }
}
