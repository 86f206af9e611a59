//! Steinhart-Hart conversion for an NTC thermistor in a voltage divider.

use num_traits::Float;

/// A thermistor model using the Steinhart-Hart equation.
///
/// The thermistor sits on the low side of a divider against the supply,
/// so its resistance follows `R = R_series * ADC / (ADC_max - ADC)`.
/// Temperature in Kelvin is `1 / (a + b*ln(R) + c*ln(R)^3)`.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SteinhartHart<F: Float> {
    /// The fixed resistor of the voltage divider.
    pub series_resistance: F,
    /// The maximum ADC value (e.g., 4095 for a 12-bit ADC).
    pub adc_max: F,
    /// Steinhart-Hart coefficient A.
    pub a: F,
    /// Steinhart-Hart coefficient B.
    pub b: F,
    /// Steinhart-Hart coefficient C.
    pub c: F,
}

impl<F: Float> SteinhartHart<F> {
    /// Creates a new `SteinhartHart` model.
    pub fn new(series_resistance: F, adc_max: F, a: F, b: F, c: F) -> Self {
        Self {
            series_resistance,
            adc_max,
            a,
            b,
            c,
        }
    }

    /// The 10 kΩ NTC fitted to the boiler, superheater and logic bay,
    /// read through a 12-bit ADC.
    pub fn ntc_10k(adc_max: F) -> Self {
        Self::new(
            F::from(10_000.0).unwrap(),
            adc_max,
            F::from(1.129148e-3).unwrap(),
            F::from(2.34125e-4).unwrap(),
            F::from(8.76741e-8).unwrap(),
        )
    }

    /// Calculates the thermistor's resistance from an ADC reading.
    ///
    /// Returns `None` for rail readings (0 or >= full scale), which mean
    /// an open or shorted sensor rather than a temperature.
    pub fn adc_to_resistance(&self, adc_value: F) -> Option<F> {
        if adc_value <= F::zero() || adc_value >= self.adc_max {
            return None;
        }
        // R = R_series * ADC / (ADC_max - ADC)
        Some(self.series_resistance * adc_value / (self.adc_max - adc_value))
    }

    /// Converts an ADC reading to temperature in degrees Celsius.
    ///
    /// `None` indicates an open/short circuit; the caller decides how to
    /// degrade.
    pub fn adc_to_celsius(&self, adc_value: F) -> Option<F> {
        let resistance = self.adc_to_resistance(adc_value)?;
        let ln_r = resistance.ln();
        let temp_inv = self.a + self.b * ln_r + self.c * ln_r.powi(3);
        if temp_inv <= F::zero() {
            return None;
        }
        Some(F::one() / temp_inv - F::from(273.15).unwrap())
    }
}
