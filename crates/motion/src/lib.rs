#![cfg_attr(not(feature = "std"), no_std)]

//! # Motion Crate
//!
//! Deterministic regulator motion primitives, usable on both host and MCU:
//!
//! - [`PhysicsEngine`]: DCC speed step to regulator percentage, and
//!   encoder pulses to cm/s.
//! - [`ServoShaper`]: slew-rate limiting, stiction breakout, idle
//!   power-down and the emergency bypass for the regulator servo.

pub mod errors;
pub mod physics;
pub mod servo;

pub use errors::MotionError;
pub use physics::PhysicsEngine;
pub use servo::{ServoConfig, ServoShaper};
