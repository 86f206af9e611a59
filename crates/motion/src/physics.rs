//! Scale physics: speed-step mapping and encoder odometry.

/// Converts DCC speed steps to regulator percentages and encoder pulse
/// counts to velocity.
///
/// All scale factors are precomputed at construction so nothing in the
/// 50 Hz path divides by configuration values.
#[derive(Debug, Clone, Copy)]
pub struct PhysicsEngine {
    cm_per_count: f32,
}

impl PhysicsEngine {
    /// Creates an engine from the wheel geometry CVs.
    ///
    /// # Arguments
    /// * `wheel_radius_hundredth_mm` - wheel radius in mm × 100 (CV37).
    /// * `encoder_segments` - optical slots per wheel revolution (CV38).
    pub fn new(wheel_radius_hundredth_mm: u32, encoder_segments: u32) -> Self {
        let radius_cm = wheel_radius_hundredth_mm as f32 / 1000.0;
        let circumference_cm = 2.0 * core::f32::consts::PI * radius_cm;
        Self {
            cm_per_count: circumference_cm / encoder_segments.max(1) as f32,
        }
    }

    /// Distance travelled per encoder pulse, in centimetres.
    pub fn cm_per_count(&self) -> f32 {
        self.cm_per_count
    }

    /// Maps a DCC speed step (0..=127) to a regulator opening percentage.
    ///
    /// Step 0 maps to exactly 0.0 so the valve closes completely; step 127
    /// maps to 100.0. The mapping is linear and monotonic, and inputs
    /// above 127 are clamped.
    pub fn speed_to_regulator(&self, step: u8) -> f32 {
        if step == 0 {
            return 0.0;
        }
        let step = step.min(127);
        (step as f32 / 127.0) * 100.0
    }

    /// Velocity in cm/s from an encoder pulse delta over `delta_ms`.
    ///
    /// Non-positive time deltas and negative pulse deltas (which a
    /// forward-only optical encoder cannot produce) yield 0.0; the result
    /// is never negative.
    pub fn calc_velocity(&self, delta_counts: i32, delta_ms: u32) -> f32 {
        if delta_ms == 0 || delta_counts < 0 {
            return 0.0;
        }
        let distance_cm = delta_counts as f32 * self.cm_per_count;
        let seconds = delta_ms as f32 / 1000.0;
        (distance_cm / seconds).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PhysicsEngine {
        // CV37 = 1325 (13.25 mm radius), CV38 = 12 segments
        PhysicsEngine::new(1325, 12)
    }

    #[test]
    fn speed_endpoints() {
        let engine = engine();
        assert_eq!(engine.speed_to_regulator(0), 0.0);
        assert_eq!(engine.speed_to_regulator(127), 100.0);
    }

    #[test]
    fn speed_monotonic() {
        let engine = engine();
        let mut previous = 0.0;
        for step in 0..=127 {
            let percent = engine.speed_to_regulator(step);
            assert!(percent >= previous);
            previous = percent;
        }
    }

    #[test]
    fn speed_clamped_above_127() {
        let engine = engine();
        assert_eq!(engine.speed_to_regulator(200), 100.0);
    }

    #[test]
    fn velocity_for_one_revolution_per_second() {
        let engine = engine();
        // 12 pulses in one second is one wheel revolution: 2π × 1.325 cm.
        let v = engine.calc_velocity(12, 1000);
        let expected = 2.0 * core::f32::consts::PI * 1.325;
        assert!((v - expected).abs() < 1e-3, "velocity was {v}");
    }

    #[test]
    fn velocity_degenerate_inputs() {
        let engine = engine();
        assert_eq!(engine.calc_velocity(0, 1000), 0.0);
        assert_eq!(engine.calc_velocity(10, 0), 0.0);
        assert_eq!(engine.calc_velocity(-3, 1000), 0.0);
    }
}
