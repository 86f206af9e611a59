//! Multi-vector safety watchdog.
//!
//! Five vectors are evaluated every tick: the three thermal limits
//! (immediate), track voltage and DCC presence (debounced). Sensor
//! failures drive a NOMINAL → DEGRADED → CRITICAL state machine: one
//! failed channel enters graceful deceleration, while two failed channels
//! or a degraded-mode timeout escalate straight to shutdown. Exactly one
//! shutdown is delivered per boot.

use crate::cv::CvTable;
use crate::sensors::{Readings, SensorChannel, SensorHealth};
use std::fmt;
use tracing::warn;

/// Track voltage below this (millivolts) counts as power loss.
pub const TRACK_VOLTAGE_MIN_MV: f32 = 1500.0;

/// Watchdog operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogMode {
    Nominal,
    Degraded,
    Critical,
}

/// Shutdown cause tags, persisted verbatim to the black box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    LogicHot,
    DryBoil,
    SuperHot,
    PwrLoss,
    DccLost,
    UserEstop,
    MultipleSensorsFailed,
    SensorDegradedTimeout,
    PowerBudgetExceeded,
}

impl ShutdownCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownCause::LogicHot => "LOGIC_HOT",
            ShutdownCause::DryBoil => "DRY_BOIL",
            ShutdownCause::SuperHot => "SUPER_HOT",
            ShutdownCause::PwrLoss => "PWR_LOSS",
            ShutdownCause::DccLost => "DCC_LOST",
            ShutdownCause::UserEstop => "USER_ESTOP",
            ShutdownCause::MultipleSensorsFailed => "MULTIPLE_SENSORS_FAILED",
            ShutdownCause::SensorDegradedTimeout => "SENSOR_DEGRADED_TIMEOUT",
            ShutdownCause::PowerBudgetExceeded => "POWER_BUDGET_EXCEEDED",
        }
    }
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controlled deceleration state for DEGRADED mode.
///
/// On entry the commanded regulator percent and measured velocity are
/// captured; the cap then shrinks with the CV87 rate so the train slows
/// smoothly instead of stopping dead under a loaded consist.
#[derive(Debug, Clone, Copy)]
struct DegradedDecel {
    entry_percent: f32,
    entry_velocity_cms: f32,
    started_ms: u64,
}

impl DegradedDecel {
    fn percent_cap(&self, now_ms: u64, decel_cms2: f32) -> f32 {
        if self.entry_velocity_cms <= 0.1 {
            // Effectively stationary: close the regulator outright.
            return 0.0;
        }
        let elapsed_s = now_ms.saturating_sub(self.started_ms) as f32 / 1000.0;
        let remaining = (self.entry_velocity_cms - decel_cms2 * elapsed_s).max(0.0);
        self.entry_percent * remaining / self.entry_velocity_cms
    }
}

/// The watchdog proper.
pub struct Watchdog {
    mode: WatchdogMode,
    degraded_entered_ms: Option<u64>,
    decel: Option<DegradedDecel>,
    power_low_since: Option<u64>,
    dcc_silent_since: Option<u64>,
    /// Monotonic once set; guards against cascading faults delivering
    /// multiple shutdowns.
    shutdown_latched: bool,
    /// Cause queued by the health state machine for the next check.
    pending_critical: Option<ShutdownCause>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self {
            mode: WatchdogMode::Nominal,
            degraded_entered_ms: None,
            decel: None,
            power_low_since: None,
            dcc_silent_since: None,
            shutdown_latched: false,
            pending_critical: None,
        }
    }

    pub fn mode(&self) -> WatchdogMode {
        self.mode
    }

    pub fn shutdown_latched(&self) -> bool {
        self.shutdown_latched
    }

    /// Drives the NOMINAL/DEGRADED/CRITICAL state machine from the sensor
    /// health summary.
    ///
    /// `commanded_percent` and `velocity_cms` seed the deceleration
    /// controller when DEGRADED is entered. With graceful degradation
    /// disabled (CV84 = 0) any failure escalates immediately.
    pub fn update_sensor_health(
        &mut self,
        failed_count: u8,
        now_ms: u64,
        commanded_percent: f32,
        velocity_cms: f32,
        cv: &CvTable,
    ) {
        if self.shutdown_latched || self.mode == WatchdogMode::Critical {
            return;
        }

        let graceful = cv.get_u8(84) != 0;

        match failed_count {
            0 => {
                if self.mode == WatchdogMode::Degraded {
                    warn!("sensor recovered, leaving degraded mode");
                }
                self.mode = WatchdogMode::Nominal;
                self.degraded_entered_ms = None;
                self.decel = None;
            }
            1 if graceful => match self.mode {
                WatchdogMode::Nominal => {
                    warn!("single sensor failure, entering degraded mode");
                    self.mode = WatchdogMode::Degraded;
                    self.degraded_entered_ms = Some(now_ms);
                    self.decel = Some(DegradedDecel {
                        entry_percent: commanded_percent,
                        entry_velocity_cms: velocity_cms,
                        started_ms: now_ms,
                    });
                }
                WatchdogMode::Degraded => {
                    let timeout_ms = cv.get_u64(88) * 1000;
                    let entered = self.degraded_entered_ms.unwrap_or(now_ms);
                    if now_ms.saturating_sub(entered) > timeout_ms {
                        self.mode = WatchdogMode::Critical;
                        self.pending_critical = Some(ShutdownCause::SensorDegradedTimeout);
                    }
                }
                WatchdogMode::Critical => {}
            },
            _ => {
                self.mode = WatchdogMode::Critical;
                self.pending_critical = Some(ShutdownCause::MultipleSensorsFailed);
            }
        }
    }

    /// The degraded-mode cap on commanded regulator percent, when active.
    pub fn speed_cap_percent(&self, now_ms: u64, cv: &CvTable) -> Option<f32> {
        if self.mode != WatchdogMode::Degraded {
            return None;
        }
        self.decel
            .map(|d| d.percent_cap(now_ms, cv.get_f32(87)))
    }

    /// Evaluates all five vectors. Returns a cause at most once per boot;
    /// the caller must invoke the shutdown path when it does.
    pub fn check(
        &mut self,
        readings: &Readings,
        dcc_active: bool,
        now_ms: u64,
        cv: &CvTable,
    ) -> Option<ShutdownCause> {
        if self.shutdown_latched {
            return None;
        }

        if self.mode == WatchdogMode::Critical {
            let cause = self
                .pending_critical
                .take()
                .unwrap_or(ShutdownCause::MultipleSensorsFailed);
            return self.trip(cause);
        }

        // Thermal vectors fire immediately, but a channel whose reading is
        // a stale last-valid substitute proves nothing and is skipped.
        if readings.health_of(SensorChannel::LogicTemp) == SensorHealth::Nominal
            && readings.logic_c > cv.get_f32(41)
        {
            return self.trip(ShutdownCause::LogicHot);
        }
        if readings.health_of(SensorChannel::BoilerTemp) == SensorHealth::Nominal
            && readings.boiler_c > cv.get_f32(42)
        {
            return self.trip(ShutdownCause::DryBoil);
        }
        if readings.health_of(SensorChannel::SuperheaterTemp) == SensorHealth::Nominal
            && readings.superheater_c > cv.get_f32(43)
        {
            return self.trip(ShutdownCause::SuperHot);
        }

        // Track voltage, debounced over CV45 x 100 ms. The timer resets on
        // recovery so momentary track dirt cannot accumulate.
        if readings.track_mv < TRACK_VOLTAGE_MIN_MV {
            let since = *self.power_low_since.get_or_insert(now_ms);
            if now_ms.saturating_sub(since) > cv.get_u64(45) * 100 {
                return self.trip(ShutdownCause::PwrLoss);
            }
        } else {
            self.power_low_since = None;
        }

        // DCC presence, debounced over CV44 x 100 ms.
        if !dcc_active {
            let since = *self.dcc_silent_since.get_or_insert(now_ms);
            if now_ms.saturating_sub(since) > cv.get_u64(44) * 100 {
                return self.trip(ShutdownCause::DccLost);
            }
        } else {
            self.dcc_silent_since = None;
        }

        None
    }

    fn trip(&mut self, cause: ShutdownCause) -> Option<ShutdownCause> {
        self.shutdown_latched = true;
        Some(cause)
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nominal_readings() -> Readings {
        Readings {
            boiler_c: 95.0,
            superheater_c: 200.0,
            logic_c: 45.0,
            pressure_kpa: 120.0,
            track_mv: 14000.0,
            health: [SensorHealth::Nominal; 4],
            at_ms: 0,
        }
    }

    fn cv() -> CvTable {
        CvTable::defaults()
    }

    #[test]
    fn nominal_conditions_pass() {
        let mut wdt = Watchdog::new();
        assert_eq!(wdt.check(&nominal_readings(), true, 100, &cv()), None);
        assert_eq!(wdt.mode(), WatchdogMode::Nominal);
    }

    #[test]
    fn thermal_limits_fire_immediately() {
        fn logic_hot(r: &mut Readings) {
            r.logic_c = 80.0;
        }
        fn dry_boil(r: &mut Readings) {
            r.boiler_c = 115.0;
        }
        fn super_hot(r: &mut Readings) {
            r.superheater_c = 260.0;
        }
        let cases: [(fn(&mut Readings), ShutdownCause); 3] = [
            (logic_hot, ShutdownCause::LogicHot),
            (dry_boil, ShutdownCause::DryBoil),
            (super_hot, ShutdownCause::SuperHot),
        ];
        for (set, cause) in cases {
            let mut wdt = Watchdog::new();
            let mut readings = nominal_readings();
            set(&mut readings);
            assert_eq!(wdt.check(&readings, true, 100, &cv()), Some(cause));
            assert!(wdt.shutdown_latched());
        }
    }

    #[test]
    fn degraded_channel_thermal_check_is_skipped() {
        let mut wdt = Watchdog::new();
        let mut readings = nominal_readings();
        // Stale cached value above the limit must not trip the vector.
        readings.boiler_c = 115.0;
        readings.health[0] = SensorHealth::Degraded;
        assert_eq!(wdt.check(&readings, true, 100, &cv()), None);
    }

    #[test]
    fn dcc_loss_fires_after_debounce() {
        // CV44 = 5 -> 500 ms
        let mut wdt = Watchdog::new();
        let readings = nominal_readings();
        assert_eq!(wdt.check(&readings, false, 0, &cv()), None);
        assert_eq!(wdt.check(&readings, false, 400, &cv()), None);
        assert_eq!(
            wdt.check(&readings, false, 501, &cv()),
            Some(ShutdownCause::DccLost)
        );
    }

    #[test]
    fn dcc_recovery_resets_the_timer() {
        let mut wdt = Watchdog::new();
        let readings = nominal_readings();
        assert_eq!(wdt.check(&readings, false, 0, &cv()), None);
        assert_eq!(wdt.check(&readings, true, 400, &cv()), None);
        // Dropout restarts counting from here.
        assert_eq!(wdt.check(&readings, false, 500, &cv()), None);
        assert_eq!(wdt.check(&readings, false, 900, &cv()), None);
        assert_eq!(
            wdt.check(&readings, false, 1001, &cv()),
            Some(ShutdownCause::DccLost)
        );
    }

    #[test]
    fn power_loss_fires_after_debounce() {
        // CV45 = 8 -> 800 ms
        let mut wdt = Watchdog::new();
        let mut readings = nominal_readings();
        readings.track_mv = 900.0;
        assert_eq!(wdt.check(&readings, true, 0, &cv()), None);
        assert_eq!(wdt.check(&readings, true, 700, &cv()), None);
        assert_eq!(
            wdt.check(&readings, true, 801, &cv()),
            Some(ShutdownCause::PwrLoss)
        );
    }

    #[test]
    fn single_failure_enters_degraded_and_caps_speed() {
        let mut wdt = Watchdog::new();
        let table = cv();
        wdt.update_sensor_health(1, 1000, 60.0, 40.0, &table);
        assert_eq!(wdt.mode(), WatchdogMode::Degraded);

        // CV87 = 10 cm/s^2 from 40 cm/s: gone in 4 s.
        let cap_start = wdt.speed_cap_percent(1000, &table).unwrap();
        assert!((cap_start - 60.0).abs() < 1e-3);
        let cap_mid = wdt.speed_cap_percent(3000, &table).unwrap();
        assert!((cap_mid - 30.0).abs() < 1e-3);
        let cap_end = wdt.speed_cap_percent(6000, &table).unwrap();
        assert_eq!(cap_end, 0.0);
    }

    #[test]
    fn degraded_timeout_escalates() {
        // CV88 = 20 s
        let mut wdt = Watchdog::new();
        let table = cv();
        wdt.update_sensor_health(1, 0, 50.0, 30.0, &table);
        wdt.update_sensor_health(1, 19_000, 50.0, 30.0, &table);
        assert_eq!(wdt.mode(), WatchdogMode::Degraded);
        wdt.update_sensor_health(1, 21_000, 50.0, 30.0, &table);
        assert_eq!(wdt.mode(), WatchdogMode::Critical);
        assert_eq!(
            wdt.check(&nominal_readings(), true, 21_000, &table),
            Some(ShutdownCause::SensorDegradedTimeout)
        );
    }

    #[test]
    fn recovery_returns_to_nominal() {
        let mut wdt = Watchdog::new();
        let table = cv();
        wdt.update_sensor_health(1, 0, 50.0, 30.0, &table);
        assert_eq!(wdt.mode(), WatchdogMode::Degraded);
        wdt.update_sensor_health(0, 5000, 50.0, 30.0, &table);
        assert_eq!(wdt.mode(), WatchdogMode::Nominal);
        assert!(wdt.speed_cap_percent(5000, &table).is_none());
    }

    #[test]
    fn two_failures_escalate_immediately() {
        let mut wdt = Watchdog::new();
        let table = cv();
        wdt.update_sensor_health(2, 0, 50.0, 30.0, &table);
        assert_eq!(
            wdt.check(&nominal_readings(), true, 0, &table),
            Some(ShutdownCause::MultipleSensorsFailed)
        );
    }

    #[test]
    fn graceful_degradation_can_be_disabled() {
        let mut wdt = Watchdog::new();
        let mut table = cv();
        table.validate_and_update(84, "0").unwrap();
        wdt.update_sensor_health(1, 0, 50.0, 30.0, &table);
        assert_eq!(wdt.mode(), WatchdogMode::Critical);
    }

    #[test]
    fn shutdown_fires_at_most_once() {
        let mut wdt = Watchdog::new();
        let mut readings = nominal_readings();
        readings.boiler_c = 115.0;
        assert!(wdt.check(&readings, true, 100, &cv()).is_some());
        assert_eq!(wdt.check(&readings, true, 120, &cv()), None);
        readings.logic_c = 90.0;
        assert_eq!(wdt.check(&readings, true, 140, &cv()), None);
    }
}
