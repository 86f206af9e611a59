//! A PID controller with a hard integral clamp.

use num_traits::Float;

/// A PID controller for regulating a system.
///
/// Unlike textbook anti-windup schemes derived from the output range, the
/// integral accumulator here is clamped to an explicit `integral_limit`:
/// the pressure loop must keep its accumulator within ±100 regardless of
/// gain tuning, so the bound is part of the controller's contract.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pid<F: Float> {
    /// Proportional gain.
    pub kp: F,
    /// Integral gain.
    pub ki: F,
    /// Derivative gain.
    pub kd: F,

    /// The target value for the system.
    pub setpoint: F,

    /// The lower bound of the controller's output.
    pub output_min: F,
    /// The upper bound of the controller's output.
    pub output_max: F,
    /// Absolute bound on the integral accumulator.
    pub integral_limit: F,

    // Internal state
    integral: F,
    previous_error: F,
}

impl<F: Float> Pid<F> {
    /// Creates a new PID controller.
    pub fn new(
        kp: F,
        ki: F,
        kd: F,
        setpoint: F,
        output_min: F,
        output_max: F,
        integral_limit: F,
    ) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint,
            output_min,
            output_max,
            integral_limit,
            integral: F::zero(),
            previous_error: F::zero(),
        }
    }

    /// Updates the PID controller with a new measurement.
    ///
    /// # Arguments
    /// * `current_value` - The current measured value of the system.
    /// * `dt` - The time delta since the last update, in seconds. Must be
    ///   positive; non-positive deltas leave the state untouched and return
    ///   the clamped proportional term only.
    ///
    /// # Returns
    /// The calculated output, clamped to `[output_min, output_max]`.
    pub fn update(&mut self, current_value: F, dt: F) -> F {
        let error = self.setpoint - current_value;

        if dt <= F::zero() {
            return (self.kp * error).max(self.output_min).min(self.output_max);
        }

        self.integral = self.integral + error * dt;
        self.integral = self
            .integral
            .max(-self.integral_limit)
            .min(self.integral_limit);

        let derivative = (error - self.previous_error) / dt;
        self.previous_error = error;

        let output = self.kp * error + self.ki * self.integral + self.kd * derivative;
        output.max(self.output_min).min(self.output_max)
    }

    /// Current value of the integral accumulator.
    pub fn integral(&self) -> F {
        self.integral
    }

    /// Resets the internal state of the PID controller.
    pub fn reset(&mut self) {
        self.integral = F::zero();
        self.previous_error = F::zero();
    }
}
