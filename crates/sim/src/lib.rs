//! Simulation Harness
//!
//! Wires the controller core to mock peripherals, a boiler plant model
//! and scripted fault scenarios, and captures a per-second trace for
//! analysis and CI validation. Everything runs in virtual time: the mock
//! clock advances when the loop sleeps, so minutes of boiler behaviour
//! simulate in milliseconds.

pub mod plant;

use anyhow::Result;
use loco_core::control::{ControlLoop, IsrHandles, Peripherals, TICK_MS};
use loco_core::store::FsConfigStore;
use loco_core::ShutdownCause;
use loco_hal::mock::{MockAdc, MockClock, MockPwm, MockTelemetry};
use loco_hal::Clock;
use crate::plant::{raw_for_celsius, raw_for_pressure_kpa, raw_for_track_mv, BoilerPlant};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Nominal DCC half-bit durations for injected edges.
const ONE_US: u64 = 58;
const ZERO_US: u64 = 100;

/// Scripted fault scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Cold boot, throttle up, run cleanly.
    Startup,
    /// DCC base station goes silent after 5 s.
    DccLoss,
    /// Boiler thermistor reports an over-limit temperature at 10 s.
    DryBoil,
    /// Operator programs an impossible 1 A power budget at 1 s.
    OverBudget,
}

/// One trace sample per simulated second.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub t_ms: u64,
    pub boiler_c: f32,
    pub superheater_c: f32,
    pub pressure_kpa: f32,
    pub servo_duty: f32,
    pub boiler_duty: u16,
    pub superheater_duty: u16,
    pub velocity_cms: f32,
}

/// Final state of a simulation run.
#[derive(Debug)]
pub struct SimOutcome {
    pub shutdown: Option<ShutdownCause>,
    pub simulated_ms: u64,
    pub telemetry_lines: Vec<String>,
}

/// The assembled rig: controller, mocks, plant and script.
pub struct SimHarness {
    control: ControlLoop<MockAdc, MockPwm, MockClock, MockTelemetry, FsConfigStore>,
    isr: IsrHandles,
    clock: MockClock,
    plant: BoilerPlant,
    scenario: Scenario,
    adc_boiler: MockAdc,
    adc_superheater: MockAdc,
    adc_logic: MockAdc,
    adc_pressure: MockAdc,
    adc_track: MockAdc,
    telemetry: MockTelemetry,
    trace: Vec<TraceEntry>,
    last_trace_ms: u64,
    /// Plant override installed by the DryBoil script.
    boiler_fault: bool,
}

impl SimHarness {
    /// Builds the rig with its config store rooted at `data_dir`.
    pub fn new(scenario: Scenario, data_dir: &Path) -> Result<Self> {
        let store = FsConfigStore::new(data_dir);
        store.ensure_environment()?;

        let clock = MockClock::new();
        let plant = BoilerPlant::cold();
        let adc_boiler = MockAdc::new(raw_for_celsius(plant.boiler_c));
        let adc_superheater = MockAdc::new(raw_for_celsius(plant.superheater_c));
        let adc_logic = MockAdc::new(raw_for_celsius(plant.logic_c));
        let adc_pressure = MockAdc::new(raw_for_pressure_kpa(plant.pressure_kpa));
        let adc_track = MockAdc::new(raw_for_track_mv(plant.track_mv));
        let telemetry = MockTelemetry::new(true);

        let peripherals = Peripherals {
            adc_boiler: adc_boiler.clone(),
            adc_superheater: adc_superheater.clone(),
            adc_logic: adc_logic.clone(),
            adc_pressure: adc_pressure.clone(),
            adc_track: adc_track.clone(),
            servo_pwm: MockPwm::new(1023),
            boiler_pwm: MockPwm::new(1023),
            superheater_pwm: MockPwm::new(1023),
        };

        let (control, isr) =
            ControlLoop::new(peripherals, clock.clone(), store, telemetry.clone())?;

        Ok(Self {
            control,
            isr,
            clock,
            plant,
            scenario,
            adc_boiler,
            adc_superheater,
            adc_logic,
            adc_pressure,
            adc_track,
            telemetry,
            trace: Vec::new(),
            last_trace_ms: 0,
            boiler_fault: false,
        })
    }

    /// Runs the scenario for up to `seconds` of virtual time.
    pub fn run(&mut self, seconds: u64) -> SimOutcome {
        let ticks = seconds * 1000 / TICK_MS;
        let mut shutdown = None;

        for i in 0..ticks {
            let now_ms = self.clock.now_ms();
            self.apply_script(now_ms, i);
            self.step_plant();
            self.sample_trace(now_ms);

            if let Some(cause) = self.control.run_for(1) {
                shutdown = Some(cause);
                break;
            }
        }

        SimOutcome {
            shutdown,
            simulated_ms: self.clock.now_ms(),
            telemetry_lines: self.telemetry.lines(),
        }
    }

    /// The captured per-second trace.
    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    /// Dumps the trace to a JSON file.
    pub fn dump_trace(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "dumping trace file");
        std::fs::write(path, serde_json::to_string_pretty(&self.trace)?)?;
        Ok(())
    }

    fn apply_script(&mut self, now_ms: u64, tick: u64) {
        // Refresh the DCC command every 10 ticks (200 ms), unless the
        // scenario has silenced the base station.
        let dcc_alive = self.scenario != Scenario::DccLoss || now_ms < 5_000;
        if dcc_alive && tick % 10 == 0 {
            // Half throttle once the boiler has had a moment.
            let step = if now_ms > 2_000 { 16 } else { 0 };
            self.feed_speed(step);
        }

        match self.scenario {
            Scenario::DryBoil if now_ms >= 10_000 => self.boiler_fault = true,
            Scenario::OverBudget if now_ms >= 1_000 && now_ms < 1_020 => {
                self.control.rx_bytes(b"CV51=1.0\n");
            }
            _ => {}
        }
    }

    fn step_plant(&mut self) {
        self.plant.step(
            TICK_MS as f32 / 1000.0,
            self.control.boiler_duty(),
            self.control.superheater_duty(),
            self.control.servo_duty().max(0.0),
        );

        let boiler_c = if self.boiler_fault {
            // Thermistor reports a dry boiler: hot but plausible.
            118.0
        } else {
            self.plant.boiler_c
        };
        self.adc_boiler.set_raw(raw_for_celsius(boiler_c));
        self.adc_superheater
            .set_raw(raw_for_celsius(self.plant.superheater_c));
        self.adc_logic.set_raw(raw_for_celsius(self.plant.logic_c));
        self.adc_pressure
            .set_raw(raw_for_pressure_kpa(self.plant.pressure_kpa));
        self.adc_track.set_raw(raw_for_track_mv(self.plant.track_mv));
    }

    fn sample_trace(&mut self, now_ms: u64) {
        if now_ms > 0 && now_ms.saturating_sub(self.last_trace_ms) < 1000 {
            return;
        }
        self.last_trace_ms = now_ms;
        self.trace.push(TraceEntry {
            t_ms: now_ms,
            boiler_c: self.plant.boiler_c,
            superheater_c: self.plant.superheater_c,
            pressure_kpa: self.plant.pressure_kpa,
            servo_duty: self.control.servo_duty(),
            boiler_duty: self.control.boiler_duty(),
            superheater_duty: self.control.superheater_duty(),
            velocity_cms: self.control.velocity_cms(),
        });
    }

    /// Injects one forward speed packet for the default address through
    /// the edge ISR, half-bit by half-bit.
    fn feed_speed(&mut self, step: u8) {
        let bytes = [3u8, 0x40 | 0x20 | (step & 0x1F)];
        let xor = bytes[0] ^ bytes[1];
        let all = [bytes[0], bytes[1], xor];

        let mut cursor = self.clock.now_us();
        self.isr.dcc.on_edge(cursor);
        for (n, byte) in all.iter().enumerate() {
            for i in (0..8).rev() {
                cursor += if (byte >> i) & 1 == 1 { ONE_US } else { ZERO_US };
                self.isr.dcc.on_edge(cursor);
            }
            cursor += if n == all.len() - 1 { ONE_US } else { ZERO_US };
            self.isr.dcc.on_edge(cursor);
        }

        // The wheels turn roughly with the regulator: a handful of
        // encoder pulses per commanded step keeps odometry alive.
        if step > 0 {
            for _ in 0..(step / 4).max(1) {
                self.isr.encoder.on_edge();
            }
        }
    }
}
