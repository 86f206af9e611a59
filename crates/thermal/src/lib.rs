#![cfg_attr(not(feature = "std"), no_std)]

//! # Thermal Building Blocks
//!
//! `thermal` provides the numeric pieces the boiler controller is built
//! from, usable both on the MCU and on host systems for simulation and
//! testing.
//!
//! ## Features
//!
//! - **Thermistor model**: Steinhart-Hart conversion from raw ADC codes to
//!   temperature for an NTC in a voltage divider, with open/short
//!   detection.
//! - **Signal filtering**: a moving-average filter used to over-sample
//!   noisy ADC channels.
//! - **PID controller**: a PID with a hard clamp on the integral
//!   accumulator, as the boiler pressure loop requires.
//! - **`no_std` support**: usable in bare-metal environments.
//! - **Optional `serde` support**: for snapshotting controller state.

pub mod filter;
pub mod pid;
pub mod thermistor;

pub use filter::{Filter, MovingAverageFilter};
pub use pid::Pid;
pub use thermistor::SteinhartHart;
