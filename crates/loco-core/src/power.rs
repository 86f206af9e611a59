//! Power-budget estimation and load shedding.
//!
//! The supply cannot feed both heaters, the servo and the logic rail at
//! full draw. Current is estimated from the commanded duties and shed in
//! a fixed order, one step per evaluation, until the total fits the CV51
//! budget; an exhausted shed ladder escalates to emergency shutdown.

use crate::cv::CvTable;
use crate::pressure::{PressureManager, HEATER_DUTY_MAX};
use crate::watchdog::ShutdownCause;
use loco_hal::PwmChannel;
use motion::ServoShaper;
use tracing::warn;

/// Boiler heater draw at full duty.
pub const BOILER_AMPS: f32 = 5.0;
/// Superheater draw at full duty.
pub const SUPERHEATER_AMPS: f32 = 3.0;
/// Servo draw while slewing.
pub const SERVO_MOVING_AMPS: f32 = 0.5;
/// Servo draw while holding position.
pub const SERVO_IDLE_AMPS: f32 = 0.05;
/// Logic rail baseline (MCU, radio, sensors).
pub const LOGIC_AMPS: f32 = 0.1;

/// Shed ladder position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShedStep {
    SuperheaterOff,
    BoilerHalved,
    ServoIdle,
    Exhausted,
}

/// The power-budget supervisor.
pub struct PowerBudget {
    step: ShedStep,
}

impl PowerBudget {
    pub fn new() -> Self {
        Self {
            step: ShedStep::SuperheaterOff,
        }
    }

    /// Estimated total draw in amps from commanded actuator state.
    pub fn estimate_amps(boiler_duty: u16, superheater_duty: u16, servo_moving: bool) -> f32 {
        let boiler = BOILER_AMPS * boiler_duty as f32 / HEATER_DUTY_MAX as f32;
        let superheater = SUPERHEATER_AMPS * superheater_duty as f32 / HEATER_DUTY_MAX as f32;
        let servo = if servo_moving {
            SERVO_MOVING_AMPS
        } else {
            SERVO_IDLE_AMPS
        };
        boiler + superheater + servo + LOGIC_AMPS
    }

    /// Evaluates the budget and sheds at most one load.
    ///
    /// Re-estimates after the shed; when the total still exceeds the
    /// budget the ladder advances so the next evaluation takes the next
    /// step. A total back within budget resets the ladder. Returns the
    /// shutdown cause when every shed step is spent.
    pub fn enforce<P: PwmChannel, Q: PwmChannel>(
        &mut self,
        pressure: &mut PressureManager<P>,
        servo: &mut ServoShaper<Q>,
        cv: &CvTable,
    ) -> Option<ShutdownCause> {
        let budget = cv.get_f32(51);
        let amps = Self::estimate_amps(
            pressure.boiler_duty(),
            pressure.superheater_duty(),
            servo.is_moving(),
        );
        if amps <= budget {
            self.step = ShedStep::SuperheaterOff;
            return None;
        }

        match self.step {
            ShedStep::SuperheaterOff => {
                warn!("over budget ({amps:.2} A > {budget:.2} A): shedding superheater");
                pressure.shed_superheater();
            }
            ShedStep::BoilerHalved => {
                warn!("still over budget ({amps:.2} A): halving boiler duty");
                pressure.halve_boiler();
            }
            ShedStep::ServoIdle => {
                warn!("still over budget ({amps:.2} A): idling servo");
                servo.force_idle();
            }
            ShedStep::Exhausted => {
                warn!("load shedding exhausted at {amps:.2} A");
                return Some(ShutdownCause::PowerBudgetExceeded);
            }
        }

        let after = Self::estimate_amps(
            pressure.boiler_duty(),
            pressure.superheater_duty(),
            servo.is_moving(),
        );
        if after > budget {
            self.step = match self.step {
                ShedStep::SuperheaterOff => ShedStep::BoilerHalved,
                ShedStep::BoilerHalved => ShedStep::ServoIdle,
                _ => ShedStep::Exhausted,
            };
        }
        None
    }
}

impl Default for PowerBudget {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn estimate_matches_model() {
        // Full boiler, half superheater, servo moving:
        // 5.0 + 1.5 + 0.5 + 0.1
        let amps = PowerBudget::estimate_amps(HEATER_DUTY_MAX, HEATER_DUTY_MAX / 2, true);
        assert!(approx_eq!(f32, amps, 7.1, epsilon = 0.01));
    }

    #[test]
    fn idle_servo_draws_trickle() {
        let amps = PowerBudget::estimate_amps(0, 0, false);
        assert!(approx_eq!(f32, amps, SERVO_IDLE_AMPS + LOGIC_AMPS, epsilon = 1e-6));
    }
}
