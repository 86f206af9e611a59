//! Staged boiler/superheater pressure management.
//!
//! A PID regulates boiler pressure toward the CV32 target (clamped to
//! at least [`PRESSURE_MARGIN_KPA`] below the CV35 maximum), while the
//! superheater is staged on the pressure/target ratio so it never starves
//! the boiler of power during pressure-raising. Opening the regulator
//! fires a one-second full-power blow-down spike to dry the sudden steam
//! draw. When the pressure sensor is degraded the PID is abandoned for a
//! temperature-only fallback.

use crate::cv::{CvTable, PRESSURE_MARGIN_KPA};
use crate::sensors::{Readings, SensorChannel, SensorHealth};
use loco_hal::PwmChannel;
use thermal::Pid;
use tracing::warn;

/// Heater PWM full scale.
pub const HEATER_DUTY_MAX: u16 = 1023;
/// Update interval for the pressure loop.
pub const PRESSURE_INTERVAL_MS: u64 = 500;
/// Duration of the blow-down spike.
pub const SPIKE_DURATION_S: f32 = 1.0;
/// Hard bound on the PID integral accumulator.
pub const PID_INTEGRAL_LIMIT: f32 = 100.0;

/// Duty for a fraction of heater full scale.
fn duty_fraction(fraction: f32) -> u16 {
    (fraction * HEATER_DUTY_MAX as f32) as u16
}

/// The pressure controller. Owns both heater PWM channels exclusively.
pub struct PressureManager<P: PwmChannel> {
    boiler: P,
    superheater: P,
    pid: Pid<f32>,
    last_update_ms: Option<u64>,
    spike_remaining_s: f32,
    regulator_open: bool,
    boiler_duty: u16,
    superheater_duty: u16,
    pressure_sensor_available: bool,
}

impl<P: PwmChannel> PressureManager<P> {
    /// Heaters start off: nothing heats before the first sensor read.
    pub fn new(mut boiler: P, mut superheater: P, cv: &CvTable) -> Self {
        boiler.set_duty(0);
        superheater.set_duty(0);
        Self {
            boiler,
            superheater,
            pid: Pid::new(
                20.0,
                0.5,
                5.0,
                Self::target_kpa(cv),
                0.0,
                100.0,
                PID_INTEGRAL_LIMIT,
            ),
            last_update_ms: None,
            spike_remaining_s: 0.0,
            regulator_open: false,
            boiler_duty: 0,
            superheater_duty: 0,
            pressure_sensor_available: true,
        }
    }

    /// The effective target: CV32 clamped to the safety margin below CV35.
    pub fn target_kpa(cv: &CvTable) -> f32 {
        let max = cv.get_f32(35);
        cv.get_f32(32).min(max - PRESSURE_MARGIN_KPA)
    }

    /// Regulator state notification from the control loop. A closed → open
    /// transition arms the blow-down spike and applies it immediately
    /// rather than waiting for the next 2 Hz update.
    pub fn note_regulator(&mut self, open: bool) {
        if open && !self.regulator_open {
            self.spike_remaining_s = SPIKE_DURATION_S;
            if self.pressure_sensor_available {
                self.superheater_duty = HEATER_DUTY_MAX;
                self.superheater.set_duty(HEATER_DUTY_MAX);
            }
        }
        self.regulator_open = open;
    }

    /// Runs the staged PID at [`PRESSURE_INTERVAL_MS`] cadence. Called
    /// every tick; returns without touching the heaters when the interval
    /// has not elapsed.
    pub fn process(&mut self, now_ms: u64, readings: &Readings, dcc_moving: bool, cv: &CvTable) {
        let last = match self.last_update_ms {
            None => {
                self.last_update_ms = Some(now_ms);
                return;
            }
            Some(last) => last,
        };
        let elapsed_ms = now_ms.saturating_sub(last);
        if elapsed_ms < PRESSURE_INTERVAL_MS {
            return;
        }
        let dt = elapsed_ms as f32 / 1000.0;
        self.last_update_ms = Some(now_ms);

        self.pressure_sensor_available =
            readings.health_of(SensorChannel::Pressure) == SensorHealth::Nominal;
        if !self.pressure_sensor_available {
            self.degraded_update(readings, cv);
            return;
        }

        let target = Self::target_kpa(cv);
        let max = cv.get_f32(35);
        self.pid.setpoint = target;

        let pressure = readings.pressure_kpa;
        let pid_out = self.pid.update(pressure, dt);
        let pid_duty = duty_fraction(pid_out / 100.0);

        let ratio = pressure / target.max(1.0);
        let (mut boiler_duty, mut superheater_duty) = if ratio < 0.5 {
            // Pressure raising: everything into the boiler.
            (HEATER_DUTY_MAX, 0)
        } else if ratio < 0.75 {
            (pid_duty, duty_fraction(0.25))
        } else if ratio < 0.9 {
            (pid_duty, duty_fraction(0.5))
        } else if dcc_moving {
            (pid_duty, duty_fraction(0.9))
        } else {
            (pid_duty, duty_fraction(0.5))
        };

        // Hard ceiling wins over staging.
        if pressure >= max {
            boiler_duty = 0;
        }

        if self.spike_remaining_s > 0.0 {
            superheater_duty = HEATER_DUTY_MAX;
            self.spike_remaining_s = (self.spike_remaining_s - dt).max(0.0);
        }

        self.apply(boiler_duty, superheater_duty);
    }

    /// Temperature-only fallback while the pressure sensor is degraded.
    fn degraded_update(&mut self, readings: &Readings, cv: &CvTable) {
        warn!("pressure sensor degraded, temperature-only heater control");
        self.pid.reset();

        let boiler_duty = if readings.boiler_c < cv.get_f32(42) - 5.0 {
            duty_fraction(0.3)
        } else {
            0
        };
        let superheater_duty = if readings.superheater_c < cv.get_f32(43) {
            duty_fraction(0.25)
        } else {
            0
        };
        self.apply(boiler_duty, superheater_duty);
    }

    fn apply(&mut self, boiler_duty: u16, superheater_duty: u16) {
        self.boiler_duty = boiler_duty.min(HEATER_DUTY_MAX);
        self.superheater_duty = superheater_duty.min(HEATER_DUTY_MAX);
        self.boiler.set_duty(self.boiler_duty);
        self.superheater.set_duty(self.superheater_duty);
    }

    /// Kills both heaters immediately. Called from the emergency path and
    /// must complete well inside one control tick.
    pub fn shutdown(&mut self) {
        self.spike_remaining_s = 0.0;
        self.apply(0, 0);
    }

    /// Power-budget shed step 1: superheater off.
    pub fn shed_superheater(&mut self) {
        self.superheater_duty = 0;
        self.superheater.set_duty(0);
    }

    /// Power-budget shed step 2: boiler to half its current duty.
    pub fn halve_boiler(&mut self) {
        self.boiler_duty /= 2;
        self.boiler.set_duty(self.boiler_duty);
    }

    pub fn boiler_duty(&self) -> u16 {
        self.boiler_duty
    }

    pub fn superheater_duty(&self) -> u16 {
        self.superheater_duty
    }

    pub fn integral(&self) -> f32 {
        self.pid.integral()
    }

    pub fn pressure_sensor_available(&self) -> bool {
        self.pressure_sensor_available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorHealth;
    use loco_hal::mock::MockPwm;

    fn readings(pressure_kpa: f32) -> Readings {
        Readings {
            boiler_c: 95.0,
            superheater_c: 180.0,
            logic_c: 45.0,
            pressure_kpa,
            track_mv: 14000.0,
            health: [SensorHealth::Nominal; 4],
            at_ms: 0,
        }
    }

    struct Rig {
        manager: PressureManager<MockPwm>,
        boiler: MockPwm,
        superheater: MockPwm,
        cv: CvTable,
        now_ms: u64,
    }

    impl Rig {
        fn new() -> Self {
            let boiler = MockPwm::new(HEATER_DUTY_MAX);
            let superheater = MockPwm::new(HEATER_DUTY_MAX);
            let cv = CvTable::defaults();
            let mut manager =
                PressureManager::new(boiler.clone(), superheater.clone(), &cv);
            // Prime the interval gate.
            manager.process(0, &readings(0.0), false, &cv);
            Self {
                manager,
                boiler,
                superheater,
                cv,
                now_ms: 0,
            }
        }

        fn step(&mut self, r: &Readings, moving: bool) {
            self.now_ms += PRESSURE_INTERVAL_MS;
            self.manager.process(self.now_ms, r, moving, &self.cv);
        }
    }

    #[test]
    fn target_respects_margin_below_max() {
        let mut cv = CvTable::defaults();
        cv.validate_and_update(32, "205").unwrap();
        // CV35 = 207: target is pulled down to 192.
        assert!((PressureManager::<MockPwm>::target_kpa(&cv) - 192.0).abs() < 1e-3);
    }

    #[test]
    fn cold_boiler_gets_full_power_superheater_off() {
        let mut rig = Rig::new();
        rig.step(&readings(10.0), false);
        assert_eq!(rig.boiler.duty(), HEATER_DUTY_MAX);
        assert_eq!(rig.superheater.duty(), 0);
    }

    #[test]
    fn staging_tracks_pressure_bands() {
        let target = PressureManager::<MockPwm>::target_kpa(&CvTable::defaults());

        let mut rig = Rig::new();
        rig.step(&readings(target * 0.6), false);
        assert_eq!(rig.superheater.duty(), duty_fraction(0.25));

        rig.step(&readings(target * 0.8), false);
        assert_eq!(rig.superheater.duty(), duty_fraction(0.5));

        rig.step(&readings(target * 0.95), true);
        assert_eq!(rig.superheater.duty(), duty_fraction(0.9));

        rig.step(&readings(target * 0.95), false);
        assert_eq!(rig.superheater.duty(), duty_fraction(0.5));
    }

    #[test]
    fn heater_off_at_max_pressure() {
        let mut rig = Rig::new();
        rig.step(&readings(210.0), false);
        assert_eq!(rig.boiler.duty(), 0);
    }

    #[test]
    fn blow_down_spike_runs_one_second_then_restages() {
        let target = PressureManager::<MockPwm>::target_kpa(&CvTable::defaults());
        let mut rig = Rig::new();
        let r = readings(target * 0.95);
        rig.step(&r, false);
        assert_eq!(rig.superheater.duty(), duty_fraction(0.5));

        rig.manager.note_regulator(true);
        // Spike applies immediately, without waiting for the 2 Hz update.
        assert_eq!(rig.superheater.duty(), HEATER_DUTY_MAX);

        // Two 500 ms updates consume the spike window.
        rig.step(&r, true);
        assert_eq!(rig.superheater.duty(), HEATER_DUTY_MAX);
        rig.step(&r, true);
        // Spike exhausted: back to the staged value for the band.
        rig.step(&r, true);
        assert_eq!(rig.superheater.duty(), duty_fraction(0.9));
    }

    #[test]
    fn spike_only_on_closed_to_open_transition() {
        let mut rig = Rig::new();
        let r = readings(100.0);
        rig.step(&r, false);
        rig.manager.note_regulator(true);
        let spiked = rig.superheater.duty();
        rig.step(&r, true);
        rig.step(&r, true);
        rig.step(&r, true);
        // Still open: no second spike.
        rig.manager.note_regulator(true);
        assert!(rig.superheater.duty() < spiked);
    }

    #[test]
    fn integral_stays_bounded() {
        let mut rig = Rig::new();
        for _ in 0..500 {
            rig.step(&readings(10.0), false);
        }
        assert!(rig.manager.integral().abs() <= PID_INTEGRAL_LIMIT);
    }

    #[test]
    fn degraded_pressure_sensor_uses_temperatures() {
        let mut rig = Rig::new();
        let mut r = readings(50.0);
        r.health[3] = SensorHealth::Degraded;
        r.boiler_c = 80.0; // below CV42 - 5
        r.superheater_c = 200.0; // below CV43
        rig.step(&r, false);
        assert_eq!(rig.boiler.duty(), duty_fraction(0.3));
        assert_eq!(rig.superheater.duty(), duty_fraction(0.25));

        r.boiler_c = 107.0; // above CV42 - 5 = 105
        r.superheater_c = 255.0; // above CV43 = 250
        rig.step(&r, false);
        assert_eq!(rig.boiler.duty(), 0);
        assert_eq!(rig.superheater.duty(), 0);
    }

    #[test]
    fn shutdown_zeroes_both_heaters() {
        let mut rig = Rig::new();
        rig.step(&readings(10.0), false);
        assert!(rig.boiler.duty() > 0);
        rig.manager.shutdown();
        assert_eq!(rig.boiler.duty(), 0);
        assert_eq!(rig.superheater.duty(), 0);
        assert_eq!(rig.manager.boiler_duty(), 0);
    }

    #[test]
    fn duties_always_in_range() {
        let mut rig = Rig::new();
        for pressure in [0.0, 30.0, 60.0, 109.0, 150.0, 206.9, 220.0] {
            rig.step(&readings(pressure), true);
            assert!(rig.manager.boiler_duty() <= HEATER_DUTY_MAX);
            assert!(rig.manager.superheater_duty() <= HEATER_DUTY_MAX);
        }
    }
}
