//! Regulator servo shaping.
//!
//! Direct servo commands cause jerky motion that stresses the regulator
//! linkage. The shaper turns a throttle request into a velocity-limited
//! ramp, breaks static friction with a one-shot kick when starting from
//! rest, powers the servo down after it has been idle ("jitter sleep"),
//! and bypasses all of it during an emergency.

use crate::errors::MotionError;
use loco_hal::PwmChannel;

/// Idle time after which the servo drive is cut to stop hunting.
pub const JITTER_SLEEP_MS: u64 = 2000;
/// Fraction of the travel range applied as the stiction breakout kick.
pub const STICTION_KICK_FRACTION: f32 = 0.3;
/// How long the kick duty is held.
pub const STICTION_KICK_MS: u64 = 50;
/// Lower bound on the configured travel time when deriving slew velocity.
pub const SLEW_FLOOR_MS: u32 = 100;

/// Servo geometry and rate limits, derived from the CV table each tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoConfig {
    /// Fully-closed (neutral) PWM duty (CV46).
    pub neutral: f32,
    /// Fully-open PWM duty (CV47).
    pub max: f32,
    /// Whistle dead-band in degrees (CV48): the bottom of the 90° valve
    /// travel reserved for sounding the whistle without locomotion.
    pub whistle_deg: f32,
    /// Full-travel time in milliseconds (CV49).
    pub travel_time_ms: u32,
}

/// The regulator servo state machine.
///
/// Owns its PWM channel exclusively; nothing else may write it.
#[derive(Debug)]
pub struct ServoShaper<P: PwmChannel> {
    pwm: P,
    current: f32,
    target: f32,
    last_update_ms: u64,
    stopped_at_ms: u64,
    kick_until_ms: u64,
    is_sleeping: bool,
    was_stopped: bool,
    stiction_applied: bool,
    emergency_mode: bool,
}

impl<P: PwmChannel> ServoShaper<P> {
    /// Creates the shaper parked at neutral and drives the servo there, so
    /// a locomotive last parked at throttle cannot lurch on boot.
    pub fn new(mut pwm: P, config: &ServoConfig, now_ms: u64) -> Self {
        pwm.set_duty(config.neutral as u16);
        Self {
            pwm,
            current: config.neutral,
            target: config.neutral,
            last_update_ms: now_ms,
            stopped_at_ms: now_ms,
            kick_until_ms: 0,
            is_sleeping: false,
            was_stopped: true,
            stiction_applied: false,
            emergency_mode: false,
        }
    }

    /// Computes the target duty from a throttle request.
    ///
    /// Speed mapping uses `(CV48 + 1)..90` degrees so the whistle
    /// dead-band never admits steam to the cylinders; a bare whistle
    /// request cracks the valve to exactly CV48 degrees; zero throttle
    /// closes it fully.
    ///
    /// An out-of-range `percent` is a caller bug and is rejected.
    pub fn set_goal(
        &mut self,
        percent: f32,
        whistle: bool,
        config: &ServoConfig,
    ) -> Result<(), MotionError> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(MotionError::ThrottleOutOfRange(percent));
        }

        let pwm_per_deg = (config.max - config.neutral) / 90.0;
        let deg = if percent > 0.0 {
            let min_drive = config.whistle_deg + 1.0;
            min_drive + (percent / 100.0) * (90.0 - min_drive)
        } else if whistle {
            config.whistle_deg
        } else {
            0.0
        };
        self.target = config.neutral + deg * pwm_per_deg;
        Ok(())
    }

    /// Advances the state machine by one control tick.
    pub fn update(&mut self, now_ms: u64, config: &ServoConfig) {
        let dt = now_ms.saturating_sub(self.last_update_ms) as f32 / 1000.0;
        self.last_update_ms = now_ms;

        // Exact comparison is intended: the slew branch snaps `current`
        // onto `target` when it arrives.
        if self.current == self.target {
            if !self.is_sleeping && now_ms.saturating_sub(self.stopped_at_ms) > JITTER_SLEEP_MS {
                // Jitter sleep: cut drive to silence the servo.
                self.pwm.set_duty(0);
                self.is_sleeping = true;
            }
            self.was_stopped = true;
            self.stiction_applied = false;
            return;
        }

        // Movement pending: keep the idle timer from expiring.
        self.stopped_at_ms = now_ms;

        if self.emergency_mode {
            self.current = self.target;
            self.write_current();
            return;
        }

        if now_ms < self.kick_until_ms {
            // Stiction kick still being applied.
            return;
        }

        if self.was_stopped && !self.stiction_applied && self.target > config.neutral {
            let kick = config.neutral + (config.max - config.neutral) * STICTION_KICK_FRACTION;
            self.pwm.set_duty(kick as u16);
            self.kick_until_ms = now_ms + STICTION_KICK_MS;
            self.stiction_applied = true;
            self.is_sleeping = false;
            return;
        }

        // Slew-rate limited approach.
        let travel_s = config.travel_time_ms.max(SLEW_FLOOR_MS) as f32 / 1000.0;
        let max_velocity = (config.max - config.neutral).abs() / travel_s;
        let step = max_velocity * dt;
        let diff = self.target - self.current;
        if diff.abs() <= step {
            self.current = self.target;
        } else {
            self.current += if diff > 0.0 { step } else { -step };
        }
        self.write_current();
        self.is_sleeping = false;
        self.was_stopped = false;
    }

    fn write_current(&mut self) {
        self.pwm.set_duty(self.current.round() as u16);
    }

    /// Engages the emergency bypass: every subsequent update snaps straight
    /// to the target with no slew limiting.
    pub fn set_emergency(&mut self) {
        self.emergency_mode = true;
    }

    pub fn emergency_mode(&self) -> bool {
        self.emergency_mode
    }

    /// Cuts servo drive immediately (power shedding, final shutdown stage).
    pub fn force_idle(&mut self) {
        self.pwm.set_duty(0);
        self.is_sleeping = true;
    }

    pub fn current_duty(&self) -> f32 {
        self.current
    }

    pub fn target_duty(&self) -> f32 {
        self.target
    }

    /// Whether the servo is still slewing toward its target.
    pub fn is_moving(&self) -> bool {
        (self.current - self.target).abs() > 1.0
    }

    pub fn is_sleeping(&self) -> bool {
        self.is_sleeping
    }
}
