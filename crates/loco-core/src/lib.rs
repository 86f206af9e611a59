//! # Live Steam Locomotive Controller Core
//!
//! The hard-real-time control plane of a DCC-controlled live-steam model
//! locomotive: a single cooperative 50 Hz loop plus two pin-edge ISRs
//! (DCC and wheel encoder), driving a regulator servo and two heater PWM
//! channels from five analogue sensors.
//!
//! ## Components
//!
//! - [`cv`]: the bounds-checked Configuration Variable table.
//! - [`store`]: CV persistence and the black-box log boundary.
//! - [`sensors`]: over-sampled, health-tracked analogue reads with a
//!   last-valid cache.
//! - [`encoder`]: ISR pulse counting and 1 Hz velocity estimation.
//! - [`watchdog`]: the five-vector safety monitor with graceful
//!   degradation.
//! - [`pressure`]: staged PID boiler/superheater management.
//! - [`power`]: current estimation and load shedding.
//! - [`telemetry`]: the line-oriented telemetry codec.
//! - [`queues`]: bounded background work queues.
//! - [`control`]: the scheduler tying everything together, including the
//!   emergency-shutdown state machine.
//!
//! Hardware access goes exclusively through the `loco-hal` capability
//! traits, so the entire core runs host-side under test.

pub mod control;
pub mod cv;
pub mod encoder;
pub mod events;
pub mod power;
pub mod pressure;
pub mod queues;
pub mod sensors;
pub mod store;
pub mod telemetry;
pub mod watchdog;

pub use control::{ControlLoop, IsrHandles, Peripherals};
pub use cv::{CvTable, CvValue};
pub use store::{ConfigStore, FsConfigStore};
pub use watchdog::{ShutdownCause, WatchdogMode};
