//! Configuration Variable (CV) table.
//!
//! CVs follow the NMRA convention of small-integer keys with numeric
//! values. Every documented CV carries a bounds triple; mutation goes
//! through [`CvTable::validate_and_update`], which rejects out-of-range
//! writes atomically, leaving the prior value intact. The table is loaded
//! from the config store at boot and mutated only by the telemetry command
//! handler between ticks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Minimum margin between target and max boiler pressure, in kPa.
/// Not user-configurable.
pub const PRESSURE_MARGIN_KPA: f32 = 15.0;

/// A CV value: integer-valued CVs stay integers, calibration CVs may be
/// decimal. JSON round-trips preserve the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CvValue {
    Int(i64),
    Float(f64),
}

impl CvValue {
    pub fn as_f32(&self) -> f32 {
        match self {
            CvValue::Int(v) => *v as f32,
            CvValue::Float(v) => *v as f32,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            CvValue::Int(v) => *v as f64,
            CvValue::Float(v) => *v,
        }
    }
}

impl fmt::Display for CvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CvValue::Int(v) => write!(f, "{v}"),
            CvValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Safety bounds and documentation for one CV.
#[derive(Debug, Clone, Copy)]
pub struct CvBounds {
    pub min: f64,
    pub max: f64,
    pub unit: &'static str,
    pub description: &'static str,
}

macro_rules! bounds {
    ($min:expr, $max:expr, $unit:expr, $desc:expr) => {
        CvBounds {
            min: $min,
            max: $max,
            unit: $unit,
            description: $desc,
        }
    };
}

/// CV validation bounds, sorted by CV number.
///
/// The thermal limit ranges are disjoint and ordered so the invariant
/// logic-limit < boiler-limit < superheater-limit holds for every legal
/// table.
pub const CV_BOUNDS: &[(u8, CvBounds)] = &[
    (1, bounds!(1.0, 127.0, "addr", "DCC address")),
    (17, bounds!(192.0, 231.0, "addr", "Extended address high byte")),
    (18, bounds!(0.0, 255.0, "addr", "Extended address low byte")),
    (29, bounds!(0.0, 255.0, "flags", "Configuration flags")),
    (32, bounds!(70.0, 207.0, "kPa", "Target boiler pressure")),
    (35, bounds!(100.0, 220.0, "kPa", "Max boiler pressure")),
    (37, bounds!(1000.0, 2000.0, "mm*100", "Wheel radius")),
    (38, bounds!(8.0, 16.0, "segments", "Encoder segments")),
    (41, bounds!(60.0, 85.0, "degC", "Logic temp limit")),
    (42, bounds!(100.0, 120.0, "degC", "Boiler temp limit")),
    (43, bounds!(240.0, 270.0, "degC", "Superheater temp limit")),
    (44, bounds!(5.0, 100.0, "x100ms", "DCC timeout")),
    (45, bounds!(2.0, 50.0, "x100ms", "Power timeout")),
    (46, bounds!(40.0, 120.0, "pwm", "Servo neutral duty")),
    (47, bounds!(80.0, 160.0, "pwm", "Servo max duty")),
    (48, bounds!(0.0, 20.0, "deg", "Whistle offset")),
    (49, bounds!(500.0, 3000.0, "ms", "Servo travel time")),
    (51, bounds!(1.0, 8.0, "A", "Power budget")),
    (84, bounds!(0.0, 1.0, "bool", "Graceful degradation enable")),
    (87, bounds!(5.0, 20.0, "cm/s2", "Sensor failure decel rate")),
    (88, bounds!(10.0, 60.0, "s", "Degraded mode timeout")),
];

/// Factory defaults.
pub const CV_DEFAULTS: &[(u8, CvValue)] = &[
    (1, CvValue::Int(3)),
    (17, CvValue::Int(192)),
    (18, CvValue::Int(3)),
    (29, CvValue::Int(6)),
    (32, CvValue::Float(124.0)),
    (35, CvValue::Float(207.0)),
    (37, CvValue::Int(1325)),
    (38, CvValue::Int(12)),
    (41, CvValue::Int(75)),
    (42, CvValue::Int(110)),
    (43, CvValue::Int(250)),
    (44, CvValue::Int(5)),
    (45, CvValue::Int(8)),
    (46, CvValue::Int(77)),
    (47, CvValue::Int(128)),
    (48, CvValue::Int(5)),
    (49, CvValue::Int(1000)),
    (51, CvValue::Float(4.5)),
    (84, CvValue::Int(1)),
    (87, CvValue::Float(10.0)),
    (88, CvValue::Int(20)),
];

/// Looks up the bounds entry for a CV number.
pub fn bounds_for(cv: u8) -> Option<&'static CvBounds> {
    CV_BOUNDS
        .binary_search_by_key(&cv, |(n, _)| *n)
        .ok()
        .map(|i| &CV_BOUNDS[i].1)
}

fn default_for(cv: u8) -> Option<CvValue> {
    CV_DEFAULTS
        .binary_search_by_key(&cv, |(n, _)| *n)
        .ok()
        .map(|i| CV_DEFAULTS[i].1)
}

/// The in-memory CV table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CvTable {
    values: BTreeMap<u8, CvValue>,
}

impl CvTable {
    /// A table populated with the factory defaults.
    pub fn defaults() -> Self {
        Self {
            values: CV_DEFAULTS.iter().copied().collect(),
        }
    }

    /// Builds a table from loaded values, filling gaps from the defaults.
    pub fn from_values(values: BTreeMap<u8, CvValue>) -> Self {
        let mut table = Self::defaults();
        table.values.extend(values);
        table
    }

    /// Reads a CV, falling back to its factory default.
    pub fn get(&self, cv: u8) -> CvValue {
        self.values
            .get(&cv)
            .copied()
            .or_else(|| default_for(cv))
            .unwrap_or(CvValue::Int(0))
    }

    pub fn get_f32(&self, cv: u8) -> f32 {
        self.get(cv).as_f32()
    }

    pub fn get_u8(&self, cv: u8) -> u8 {
        self.get(cv).as_f64() as u8
    }

    pub fn get_u32(&self, cv: u8) -> u32 {
        self.get(cv).as_f64() as u32
    }

    pub fn get_u64(&self, cv: u8) -> u64 {
        self.get(cv).as_f64() as u64
    }

    /// Validates and applies one CV write.
    ///
    /// Unknown CVs, non-numeric values and out-of-range values are
    /// rejected with a descriptive message and the previous value is kept.
    /// On success the parsed value is stored (as an integer when it has no
    /// fractional part) and a confirmation message returned.
    pub fn validate_and_update(&mut self, cv: u8, new_value: &str) -> Result<String, String> {
        let bounds = bounds_for(cv).ok_or_else(|| format!("CV{cv} unknown (not in validation table)"))?;

        let parsed: f64 = new_value
            .trim()
            .parse()
            .map_err(|_| format!("CV{cv} invalid value '{new_value}' (not a number)"))?;
        if !parsed.is_finite() {
            return Err(format!("CV{cv} invalid value '{new_value}' (not a number)"));
        }

        if parsed < bounds.min || parsed > bounds.max {
            return Err(format!(
                "CV{cv} out of range {}-{} {}",
                bounds.min, bounds.max, bounds.unit
            ));
        }

        let value = if parsed.fract() == 0.0 {
            CvValue::Int(parsed as i64)
        } else {
            CvValue::Float(parsed)
        };

        let old = self.get(cv);
        self.values.insert(cv, value);
        Ok(format!(
            "Updated CV{cv} ({}) from {old} to {value} {}",
            bounds.description, bounds.unit
        ))
    }

    /// Iterates the stored values, for persistence.
    pub fn iter(&self) -> impl Iterator<Item = (&u8, &CvValue)> {
        self.values.iter()
    }
}

impl Default for CvTable {
    fn default() -> Self {
        Self::defaults()
    }
}
