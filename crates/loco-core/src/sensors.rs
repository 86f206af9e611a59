//! Analogue sensor suite with health tracking and last-valid caching.
//!
//! Each channel is over-sampled through a moving-average filter, converted
//! to engineering units, and checked against a per-channel plausibility
//! window. An implausible or failed read never overwrites the last-valid
//! cache; it marks the channel DEGRADED and the cached value is served
//! instead. The watchdog escalates on the count of concurrently degraded
//! channels.

use crate::telemetry::KPA_PER_PSI;
use loco_hal::{AdcChannel, ADC_MAX};
use serde::Serialize;
use thermal::filter::{Filter, MovingAverageFilter};
use thermal::thermistor::SteinhartHart;

/// Samples averaged per ADC read.
pub const ADC_SAMPLES: usize = 10;

/// Track voltage divider ratio: rectified DCC through a 5x divider.
const TRACK_DIVIDER: f32 = 5.0;
/// ADC reference, millivolts.
const ADC_REF_MV: f32 = 3300.0;
/// Pressure transducer full scale: 0..100 PSI over 0..3.3 V, carried in
/// kPa inside the core.
const PRESSURE_FULL_SCALE_KPA: f32 = 100.0 * KPA_PER_PSI;

/// Health of one analogue channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SensorHealth {
    Nominal,
    Degraded,
}

/// The monitored channels, in health-map order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorChannel {
    BoilerTemp,
    SuperheaterTemp,
    LogicTemp,
    Pressure,
}

impl SensorChannel {
    pub const ALL: [SensorChannel; 4] = [
        SensorChannel::BoilerTemp,
        SensorChannel::SuperheaterTemp,
        SensorChannel::LogicTemp,
        SensorChannel::Pressure,
    ];

    /// Plausibility window for the channel's engineering value.
    ///
    /// The pressure window is kPa and extends past the CV35 upper bound so
    /// legal operating pressure is never misread as a sensor fault, while
    /// rail readings (0 or full scale, ~689 kPa) still are.
    pub fn plausible_range(&self) -> (f32, f32) {
        match self {
            SensorChannel::BoilerTemp => (0.0, 150.0),
            SensorChannel::SuperheaterTemp => (0.0, 280.0),
            SensorChannel::LogicTemp => (0.0, 100.0),
            SensorChannel::Pressure => (-7.0, 240.0),
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// One converted snapshot of every analogue channel.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Readings {
    pub boiler_c: f32,
    pub superheater_c: f32,
    pub logic_c: f32,
    pub pressure_kpa: f32,
    pub track_mv: f32,
    /// Per-channel health, indexed per [`SensorChannel::ALL`].
    pub health: [SensorHealth; 4],
    /// Milliseconds-since-boot timestamp of the read.
    pub at_ms: u64,
}

impl Readings {
    pub fn health_of(&self, channel: SensorChannel) -> SensorHealth {
        self.health[channel.index()]
    }

    pub fn failed_count(&self) -> u8 {
        self.health
            .iter()
            .filter(|h| **h == SensorHealth::Degraded)
            .count() as u8
    }

    /// Safe boot-time defaults: ambient temperatures, no pressure, no
    /// track power.
    pub fn safe_defaults() -> Self {
        Self {
            boiler_c: 25.0,
            superheater_c: 25.0,
            logic_c: 25.0,
            pressure_kpa: 0.0,
            track_mv: 0.0,
            health: [SensorHealth::Nominal; 4],
            at_ms: 0,
        }
    }
}

/// The five analogue inputs and their conversion state.
pub struct SensorSuite<A: AdcChannel> {
    adc_boiler: A,
    adc_superheater: A,
    adc_logic: A,
    adc_pressure: A,
    adc_track: A,
    thermistor: SteinhartHart<f32>,
    last_valid: [f32; 4],
    health: [SensorHealth; 4],
}

impl<A: AdcChannel> SensorSuite<A> {
    pub fn new(adc_boiler: A, adc_superheater: A, adc_logic: A, adc_pressure: A, adc_track: A) -> Self {
        Self {
            adc_boiler,
            adc_superheater,
            adc_logic,
            adc_pressure,
            adc_track,
            thermistor: SteinhartHart::ntc_10k(ADC_MAX as f32),
            last_valid: [25.0, 25.0, 25.0, 0.0],
            health: [SensorHealth::Nominal; 4],
        }
    }

    /// Reads every channel with over-sampling and updates health.
    pub fn read_all(&mut self, now_ms: u64) -> Readings {
        let raw_boiler = Self::read_adc(&mut self.adc_boiler);
        let boiler_c = self.convert_temp(raw_boiler, SensorChannel::BoilerTemp);

        let raw_super = Self::read_adc(&mut self.adc_superheater);
        let superheater_c = self.convert_temp(raw_super, SensorChannel::SuperheaterTemp);

        let raw_logic = Self::read_adc(&mut self.adc_logic);
        let logic_c = self.convert_temp(raw_logic, SensorChannel::LogicTemp);

        let raw_pressure = Self::read_adc(&mut self.adc_pressure);
        let pressure_kpa = self.convert_pressure(raw_pressure);

        let raw_track = Self::read_adc(&mut self.adc_track);
        let track_mv = raw_track.unwrap_or(0.0) / ADC_MAX as f32 * ADC_REF_MV * TRACK_DIVIDER;

        Readings {
            boiler_c,
            superheater_c,
            logic_c,
            pressure_kpa,
            track_mv,
            health: self.health,
            at_ms: now_ms,
        }
    }

    /// Per-channel health map.
    pub fn health(&self) -> [(SensorChannel, SensorHealth); 4] {
        [
            (SensorChannel::BoilerTemp, self.health[0]),
            (SensorChannel::SuperheaterTemp, self.health[1]),
            (SensorChannel::LogicTemp, self.health[2]),
            (SensorChannel::Pressure, self.health[3]),
        ]
    }

    /// Number of concurrently degraded channels.
    pub fn failed_count(&self) -> u8 {
        self.health
            .iter()
            .filter(|h| **h == SensorHealth::Degraded)
            .count() as u8
    }

    /// Over-samples one channel; `None` on a bus fault.
    fn read_adc(adc: &mut A) -> Option<f32> {
        let mut filter = MovingAverageFilter::<f32, ADC_SAMPLES>::new();
        for _ in 0..ADC_SAMPLES {
            filter.add_sample(adc.read().ok()? as f32);
        }
        Some(filter.output())
    }

    fn convert_temp(&mut self, raw: Option<f32>, channel: SensorChannel) -> f32 {
        let converted = raw.and_then(|raw| self.thermistor.adc_to_celsius(raw));
        self.accept(converted, channel)
    }

    fn convert_pressure(&mut self, raw: Option<f32>) -> f32 {
        // A rail reading means an open or shorted transducer, not a
        // pressure.
        let converted = raw.and_then(|raw| {
            if raw <= 0.0 || raw >= ADC_MAX as f32 {
                None
            } else {
                Some(raw / ADC_MAX as f32 * PRESSURE_FULL_SCALE_KPA)
            }
        });
        self.accept(converted, SensorChannel::Pressure)
    }

    /// Applies the plausibility window and the last-valid cache policy.
    fn accept(&mut self, converted: Option<f32>, channel: SensorChannel) -> f32 {
        let i = channel.index();
        let (min, max) = channel.plausible_range();
        match converted {
            Some(value) if value >= min && value <= max => {
                self.last_valid[i] = value;
                self.health[i] = SensorHealth::Nominal;
                value
            }
            _ => {
                self.health[i] = SensorHealth::Degraded;
                self.last_valid[i]
            }
        }
    }
}

/// Cache refresh threshold.
pub const CACHE_REFRESH_MS: u64 = 100;
/// Hard ceiling on cache age; a refresh is forced before this is reached.
pub const CACHE_MAX_AGE_MS: u64 = 200;

/// Cached front-end for the suite, for use inside the tight loop.
///
/// `readings()` returns instantly; [`refresh`] re-reads the underlying
/// suite only when the cache is older than [`CACHE_REFRESH_MS`]. With the
/// loop calling `refresh` every 20 ms tick, the cache can never age past
/// [`CACHE_MAX_AGE_MS`].
///
/// [`refresh`]: CachedSensorReader::refresh
pub struct CachedSensorReader<A: AdcChannel> {
    suite: SensorSuite<A>,
    cached: Readings,
    last_refresh_ms: u64,
    primed: bool,
}

impl<A: AdcChannel> CachedSensorReader<A> {
    pub fn new(suite: SensorSuite<A>) -> Self {
        Self {
            suite,
            cached: Readings::safe_defaults(),
            last_refresh_ms: 0,
            primed: false,
        }
    }

    /// Re-reads the suite iff the cache is stale.
    pub fn refresh(&mut self, now_ms: u64) {
        if self.primed && now_ms.saturating_sub(self.last_refresh_ms) < CACHE_REFRESH_MS {
            return;
        }
        self.cached = self.suite.read_all(now_ms);
        self.last_refresh_ms = now_ms;
        self.primed = true;
    }

    pub fn readings(&self) -> &Readings {
        &self.cached
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_refresh_ms)
    }

    pub fn failed_count(&self) -> u8 {
        self.cached.failed_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loco_hal::mock::MockAdc;

    fn suite_with(
        boiler: u16,
        superheater: u16,
        logic: u16,
        pressure: u16,
        track: u16,
    ) -> (SensorSuite<MockAdc>, [MockAdc; 5]) {
        let adcs = [
            MockAdc::new(boiler),
            MockAdc::new(superheater),
            MockAdc::new(logic),
            MockAdc::new(pressure),
            MockAdc::new(track),
        ];
        let suite = SensorSuite::new(
            adcs[0].clone(),
            adcs[1].clone(),
            adcs[2].clone(),
            adcs[3].clone(),
            adcs[4].clone(),
        );
        (suite, adcs)
    }

    #[test]
    fn mid_scale_reads_are_nominal() {
        let (mut suite, _adcs) = suite_with(2048, 2048, 2048, 1000, 700);
        let readings = suite.read_all(50);
        assert_eq!(readings.failed_count(), 0);
        assert!((readings.boiler_c - 25.0).abs() < 1.0);
        // 1000/4095 of 100 PSI full scale
        assert!((readings.pressure_kpa - 1000.0 / 4095.0 * 100.0 * KPA_PER_PSI).abs() < 1.0);
        // 700/4095 * 3300 mV * 5
        assert!((readings.track_mv - 700.0 / 4095.0 * 3300.0 * 5.0).abs() < 5.0);
    }

    #[test]
    fn open_thermistor_serves_last_valid_and_degrades() {
        let (mut suite, adcs) = suite_with(2048, 2048, 2048, 1000, 700);
        let first = suite.read_all(50);
        let good = first.boiler_c;

        adcs[0].set_raw(0); // open circuit
        let second = suite.read_all(150);
        assert_eq!(second.health_of(SensorChannel::BoilerTemp), SensorHealth::Degraded);
        assert_eq!(second.boiler_c, good);
        assert_eq!(second.failed_count(), 1);

        // Recovery restores nominal health on the next read.
        adcs[0].set_raw(2048);
        let third = suite.read_all(250);
        assert_eq!(third.health_of(SensorChannel::BoilerTemp), SensorHealth::Nominal);
        assert_eq!(third.failed_count(), 0);
    }

    #[test]
    fn bus_fault_degrades_channel() {
        let (mut suite, adcs) = suite_with(2048, 2048, 2048, 1000, 700);
        suite.read_all(50);
        adcs[3].fail(true);
        let readings = suite.read_all(150);
        assert_eq!(readings.health_of(SensorChannel::Pressure), SensorHealth::Degraded);
    }

    #[test]
    fn two_failures_reported() {
        let (mut suite, adcs) = suite_with(2048, 2048, 2048, 1000, 700);
        suite.read_all(50);
        adcs[0].set_raw(0);
        adcs[1].set_raw(4095);
        let readings = suite.read_all(150);
        assert_eq!(readings.failed_count(), 2);
    }

    #[test]
    fn readings_never_leave_plausibility_window() {
        let (mut suite, adcs) = suite_with(2048, 2048, 2048, 1000, 700);
        suite.read_all(50);
        for raw in [0u16, 1, 4094, 4095] {
            adcs[0].set_raw(raw);
            adcs[3].set_raw(raw);
            let readings = suite.read_all(100);
            let (bmin, bmax) = SensorChannel::BoilerTemp.plausible_range();
            let (pmin, pmax) = SensorChannel::Pressure.plausible_range();
            assert!(readings.boiler_c >= bmin && readings.boiler_c <= bmax);
            assert!(readings.pressure_kpa >= pmin && readings.pressure_kpa <= pmax);
        }
    }

    #[test]
    fn cache_refreshes_only_when_stale() {
        let (suite, adcs) = suite_with(2048, 2048, 2048, 1000, 700);
        let mut reader = CachedSensorReader::new(suite);

        reader.refresh(0);
        let first_pressure = reader.readings().pressure_kpa;

        // Change the input; within the refresh window the cache holds.
        adcs[3].set_raw(1200);
        reader.refresh(50);
        assert_eq!(reader.readings().pressure_kpa, first_pressure);

        reader.refresh(120);
        assert!(reader.readings().pressure_kpa > first_pressure);
        assert!(reader.age_ms(130) <= CACHE_MAX_AGE_MS);
    }
}
