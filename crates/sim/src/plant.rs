//! A first-order thermal/pressure model of the miniature boiler.
//!
//! Deliberately crude: good enough to close the control loop and to make
//! fault scenarios reach their thresholds in seconds of virtual time, not
//! calibrated against any real boiler.

use loco_hal::ADC_MAX;
use thermal::SteinhartHart;

const AMBIENT_C: f32 = 20.0;
/// Boiler heating rate at full duty, °C/s. Sized so the boiler still
/// boils with the power budget holding it at half duty.
const BOILER_HEAT_RATE: f32 = 4.0;
/// Superheater element heating rate at full duty, °C/s.
const SUPER_HEAT_RATE: f32 = 4.0;
/// Fractional heat loss toward ambient, 1/s.
const HEAT_LOSS: f32 = 0.02;
/// Pressure build per °C above boiling, kPa/s.
const PRESSURE_RATE: f32 = 8.0;
/// Pressure vented at full regulator opening, kPa/s.
const VENT_RATE: f32 = 20.0;

/// Plant state in engineering units.
#[derive(Debug, Clone, Copy)]
pub struct BoilerPlant {
    pub boiler_c: f32,
    pub superheater_c: f32,
    pub logic_c: f32,
    pub pressure_kpa: f32,
    pub track_mv: f32,
}

impl BoilerPlant {
    pub fn cold() -> Self {
        Self {
            boiler_c: AMBIENT_C,
            superheater_c: AMBIENT_C,
            logic_c: AMBIENT_C + 5.0,
            pressure_kpa: 0.0,
            track_mv: 14_000.0,
        }
    }

    /// Advances the plant by `dt` seconds under the given actuator state.
    pub fn step(&mut self, dt: f32, boiler_duty: u16, superheater_duty: u16, regulator_percent: f32) {
        let boiler_power = boiler_duty as f32 / 1023.0;
        let super_power = superheater_duty as f32 / 1023.0;

        self.boiler_c += (boiler_power * BOILER_HEAT_RATE
            - (self.boiler_c - AMBIENT_C) * HEAT_LOSS)
            * dt;

        // The superheater rides on boiler steam plus its own element.
        let coupling = (self.boiler_c - self.superheater_c) * 0.05;
        self.superheater_c += (super_power * SUPER_HEAT_RATE + coupling
            - (self.superheater_c - AMBIENT_C) * HEAT_LOSS)
            * dt;

        // The logic bay warms gently with total electrical load.
        let load = boiler_power + super_power;
        self.logic_c +=
            (load * 0.2 - (self.logic_c - AMBIENT_C - 5.0) * HEAT_LOSS) * dt;

        let boiling_margin = (self.boiler_c - 100.0).max(0.0);
        self.pressure_kpa += (boiling_margin * PRESSURE_RATE
            - regulator_percent / 100.0 * VENT_RATE)
            * dt;
        self.pressure_kpa = self.pressure_kpa.max(0.0);
    }
}

/// Inverts the NTC divider: the raw ADC code that reads as `celsius`.
pub fn raw_for_celsius(celsius: f32) -> u16 {
    let model = SteinhartHart::<f32>::ntc_10k(ADC_MAX as f32);
    // NTC: temperature decreases with raw code; binary search the 12-bit
    // range.
    let (mut lo, mut hi) = (1u16, ADC_MAX - 1);
    while lo < hi {
        let mid = (lo + hi) / 2;
        match model.adc_to_celsius(mid as f32) {
            Some(t) if t > celsius => lo = mid + 1,
            _ => hi = mid,
        }
    }
    lo
}

/// Raw ADC code for a pressure in kPa (0..100 PSI transducer).
pub fn raw_for_pressure_kpa(kpa: f32) -> u16 {
    let full_scale = 100.0 * loco_core::telemetry::KPA_PER_PSI;
    ((kpa / full_scale) * ADC_MAX as f32).clamp(1.0, (ADC_MAX - 1) as f32) as u16
}

/// Raw ADC code for a track voltage in millivolts (5x divider).
pub fn raw_for_track_mv(mv: f32) -> u16 {
    ((mv / 5.0 / 3300.0) * ADC_MAX as f32).clamp(0.0, ADC_MAX as f32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heating_raises_temperature_and_pressure() {
        let mut plant = BoilerPlant::cold();
        for _ in 0..120 {
            plant.step(1.0, 1023, 0, 0.0);
        }
        assert!(plant.boiler_c > 90.0);
        assert!(plant.pressure_kpa > 0.0);
    }

    #[test]
    fn raw_conversion_round_trips() {
        for celsius in [25.0_f32, 60.0, 110.0, 200.0] {
            let raw = raw_for_celsius(celsius);
            let model = SteinhartHart::<f32>::ntc_10k(ADC_MAX as f32);
            let back = model.adc_to_celsius(raw as f32).unwrap();
            assert!(
                (back - celsius).abs() < 1.0,
                "celsius {celsius} -> raw {raw} -> {back}"
            );
        }
    }

    #[test]
    fn track_voltage_conversion() {
        let raw = raw_for_track_mv(14_000.0);
        let back = raw as f32 / ADC_MAX as f32 * 3300.0 * 5.0;
        assert!((back - 14_000.0).abs() < 20.0);
    }
}
