//! Error types for the motion crate.

/// Represents errors that can occur while shaping regulator motion.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum MotionError {
    /// The requested throttle percentage is outside 0.0..=100.0. This is a
    /// programming error in the caller, not an operating condition.
    ThrottleOutOfRange(f32),
}

#[cfg(feature = "std")]
impl core::fmt::Display for MotionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MotionError::ThrottleOutOfRange(percent) => {
                write!(f, "throttle percent {percent} out of range 0.0-100.0")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for MotionError {}
