//! The 50 Hz control loop and the emergency-shutdown state machine.
//!
//! One cooperative foreground task fuses the cached sensors, the encoder
//! and the DCC snapshot into actuator outputs, with the watchdog
//! evaluated between sensing and actuation so a safety decision always
//! wins over a DCC command within the same tick. Background work drains
//! from bounded queues at the end of each tick.

use crate::cv::CvTable;
use crate::encoder::{EncoderCounter, EncoderTracker};
use crate::events::EventBuffer;
use crate::power::PowerBudget;
use crate::pressure::{PressureManager, PRESSURE_INTERVAL_MS};
use crate::queues::{FileWriteQueue, Housekeeper, SerialPrintQueue};
use crate::sensors::{CachedSensorReader, Readings, SensorSuite};
use crate::store::{BlackBoxRecord, ConfigStore};
use crate::telemetry::{self, CommandQueue};
use crate::watchdog::{ShutdownCause, Watchdog, WatchdogMode};
use anyhow::Result;
use dcc_proto::decoder::{DccShared, EdgeDecoder};
use dcc_proto::parser::DccAddress;
use loco_hal::{AdcChannel, Clock, PwmChannel, TelemetrySink};
use motion::{PhysicsEngine, ServoConfig, ServoShaper};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Control loop period.
pub const TICK_MS: u64 = 20;
/// Outbound telemetry cadence.
pub const TELEMETRY_INTERVAL_MS: u64 = 1000;
/// Human-readable status line every this many telemetry frames.
pub const STATUS_EVERY_FRAMES: u32 = 50;
/// Whistle vent duration during full emergency shutdown.
pub const VENT_MS: u64 = 5000;
/// Servo settling time before drive is cut.
pub const SETTLE_MS: u64 = 500;

/// The analogue and PWM peripherals the loop owns.
pub struct Peripherals<A: AdcChannel, P: PwmChannel> {
    pub adc_boiler: A,
    pub adc_superheater: A,
    pub adc_logic: A,
    pub adc_pressure: A,
    pub adc_track: A,
    pub servo_pwm: P,
    pub boiler_pwm: P,
    pub superheater_pwm: P,
}

/// Handles the platform hooks into its two pin-edge interrupts.
pub struct IsrHandles {
    /// DCC pin edge handler state.
    pub dcc: EdgeDecoder,
    /// Encoder pin edge counter.
    pub encoder: Arc<EncoderCounter>,
}

/// Emergency-shutdown sequencer.
///
/// The two long waits of the full shutdown (5 s whistle vent, 0.5 s servo
/// settle) are wait-until states driven from the tick, not sleeps, so
/// ISRs stay serviced and the black-box write queue keeps draining while
/// the boiler vents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sequencer {
    Idle,
    Venting { until_ms: u64 },
    Settling { until_ms: u64 },
    Halted,
}

/// The master orchestrator: owns every component and runs the fixed-rate
/// schedule.
pub struct ControlLoop<A, P, C, T, S>
where
    A: AdcChannel,
    P: PwmChannel,
    C: Clock,
    T: TelemetrySink,
    S: ConfigStore,
{
    cv: CvTable,
    clock: C,
    store: S,
    telemetry: T,

    dcc: Arc<DccShared>,
    sensors: CachedSensorReader<A>,
    encoder: EncoderTracker,
    physics: PhysicsEngine,
    servo: ServoShaper<P>,
    pressure: PressureManager<P>,
    watchdog: Watchdog,
    power: PowerBudget,

    commands: CommandQueue,
    events: EventBuffer,
    serial_queue: SerialPrintQueue,
    file_queue: FileWriteQueue,
    housekeeper: Housekeeper,

    sequencer: Sequencer,
    shutdown_cause: Option<ShutdownCause>,
    prev_percent: f32,
    last_power_ms: u64,
    last_telemetry_ms: u64,
    frame_count: u32,
}

fn servo_config(cv: &CvTable) -> ServoConfig {
    ServoConfig {
        neutral: cv.get_f32(46),
        max: cv.get_f32(47),
        whistle_deg: cv.get_f32(48),
        travel_time_ms: cv.get_u32(49),
    }
}

impl<A, P, C, T, S> ControlLoop<A, P, C, T, S>
where
    A: AdcChannel,
    P: PwmChannel,
    C: Clock,
    T: TelemetrySink,
    S: ConfigStore,
{
    /// Builds the loop from its peripherals and boundary collaborators.
    ///
    /// Loads the CV table, parks every actuator in its safe state and
    /// returns the ISR handles for the platform to attach to its pin
    /// interrupts.
    pub fn new(
        peripherals: Peripherals<A, P>,
        clock: C,
        store: S,
        telemetry: T,
    ) -> Result<(Self, IsrHandles)> {
        let cv = store.load()?;
        let now = clock.now_ms();

        let address = DccAddress::from_cvs(
            cv.get_u8(1),
            cv.get_u8(17),
            cv.get_u8(18),
            cv.get_u8(29),
        );
        let dcc = Arc::new(DccShared::new());
        let edge_decoder = EdgeDecoder::new(address, dcc.clone());

        let counter = Arc::new(EncoderCounter::new());
        let encoder = EncoderTracker::new(counter.clone());

        let physics = PhysicsEngine::new(cv.get_u32(37), cv.get_u32(38));
        let config = servo_config(&cv);
        let servo = ServoShaper::new(peripherals.servo_pwm, &config, now);
        let pressure = PressureManager::new(
            peripherals.boiler_pwm,
            peripherals.superheater_pwm,
            &cv,
        );
        let suite = SensorSuite::new(
            peripherals.adc_boiler,
            peripherals.adc_superheater,
            peripherals.adc_logic,
            peripherals.adc_pressure,
            peripherals.adc_track,
        );

        let mut events = EventBuffer::new();
        events.log(now, "BOOT", format!("addr={address:?}"));
        info!("controller ready, address {address:?}");

        let control = Self {
            cv,
            clock,
            store,
            telemetry,
            dcc,
            sensors: CachedSensorReader::new(suite),
            encoder,
            physics,
            servo,
            pressure,
            watchdog: Watchdog::new(),
            power: PowerBudget::new(),
            commands: CommandQueue::new(),
            events,
            serial_queue: SerialPrintQueue::new(10),
            file_queue: FileWriteQueue::new(5),
            housekeeper: Housekeeper::new(),
            sequencer: Sequencer::Idle,
            shutdown_cause: None,
            prev_percent: 0.0,
            last_power_ms: 0,
            last_telemetry_ms: 0,
            frame_count: 0,
        };

        Ok((
            control,
            IsrHandles {
                dcc: edge_decoder,
                encoder: counter,
            },
        ))
    }

    /// One 20 ms control cycle.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();

        if self.sequencer != Sequencer::Idle {
            self.drive_shutdown(now);
            return;
        }

        // 1. Refresh cached sensors (blocking only when stale).
        self.sensors.refresh(now);
        let readings = *self.sensors.readings();

        // 2. Encoder velocity.
        self.encoder.tick(now, &self.physics);
        let velocity = self.encoder.velocity_cms();

        // 3. Operator e-stop wins over everything but keeps the loop
        // alive: the operator retains control.
        let snapshot = self.dcc.snapshot();
        if snapshot.e_stop {
            self.die(ShutdownCause::UserEstop, true, now);
            self.dcc.clear_e_stop();
            return;
        }

        // 4. At most one telemetry command per tick.
        self.process_command(now);

        // 5. Watchdog: health state machine, then the five vectors.
        self.watchdog.update_sensor_health(
            readings.failed_count(),
            now,
            self.prev_percent,
            velocity,
            &self.cv,
        );
        let dcc_active = self.dcc.is_active(now, self.cv.get_u64(44) * 100);
        if let Some(cause) = self.watchdog.check(&readings, dcc_active, now, &self.cv) {
            self.die(cause, false, now);
            return;
        }

        // 6. DCC state through physics to the servo.
        let step = if snapshot.forward { snapshot.speed } else { 0 };
        let mut percent = self.physics.speed_to_regulator(step);
        if let Some(cap) = self.watchdog.speed_cap_percent(now, &self.cv) {
            percent = percent.min(cap);
        }
        let config = servo_config(&self.cv);
        if let Err(e) = self.servo.set_goal(percent, snapshot.whistle(), &config) {
            error!("servo goal rejected: {e}");
        }
        self.pressure.note_regulator(percent > 0.0);
        self.prev_percent = percent;
        self.servo.update(now, &config);

        // 7. Pressure control (self-gated to 2 Hz), then the power budget
        // at the same cadence.
        self.pressure
            .process(now, &readings, snapshot.speed > 0, &self.cv);
        if now.saturating_sub(self.last_power_ms) >= PRESSURE_INTERVAL_MS {
            self.last_power_ms = now;
            if let Some(cause) =
                self.power
                    .enforce(&mut self.pressure, &mut self.servo, &self.cv)
            {
                self.die(cause, false, now);
                return;
            }
        }

        // 8. Telemetry frame at 1 Hz, status line every 50th frame.
        if now.saturating_sub(self.last_telemetry_ms) >= TELEMETRY_INTERVAL_MS {
            self.last_telemetry_ms = now;
            let frame = telemetry::format_frame(
                velocity,
                readings.pressure_kpa,
                readings.boiler_c,
                readings.superheater_c,
                readings.logic_c,
                self.servo.current_duty() as u16,
            );
            self.telemetry.send_line(&frame);

            if self.frame_count % STATUS_EVERY_FRAMES == 0 {
                self.serial_queue.enqueue(format!(
                    "SPD:{velocity:.1} PSI:{:.1} T:{:.0}/{:.0}/{:.0} SRV:{}",
                    readings.pressure_kpa / telemetry::KPA_PER_PSI,
                    readings.boiler_c,
                    readings.superheater_c,
                    readings.logic_c,
                    self.servo.current_duty() as u16,
                ));
            }
            self.frame_count += 1;
        }

        // 9. Bounded background work.
        self.serial_queue.process(now);
        self.file_queue.process(now);
        self.housekeeper
            .process(now, &mut self.serial_queue, &mut self.file_queue);
    }

    /// Runs until shutdown, sleeping out the remainder of each tick.
    pub fn run(&mut self) -> Option<ShutdownCause> {
        loop {
            if let Some(cause) = self.run_once() {
                return Some(cause);
            }
        }
    }

    /// Runs at most `ticks` cycles; returns early on shutdown.
    pub fn run_for(&mut self, ticks: u32) -> Option<ShutdownCause> {
        for _ in 0..ticks {
            if let Some(cause) = self.run_once() {
                return Some(cause);
            }
        }
        None
    }

    fn run_once(&mut self) -> Option<ShutdownCause> {
        let start = self.clock.now_ms();
        self.tick();
        if self.is_halted() {
            // Whatever the vent window did not flush goes out now, before
            // the platform enters deep sleep.
            self.file_queue.flush();
            error!("controller halted: {:?}", self.shutdown_cause);
            return self.shutdown_cause;
        }
        let elapsed = self.clock.now_ms().saturating_sub(start);
        // Always yield at least 1 ms so ISRs stay serviced.
        self.clock.sleep_ms(TICK_MS.saturating_sub(elapsed).max(1));
        None
    }

    /// Drains one pending `CV<n>=<value>` command: validate, apply,
    /// persist, acknowledge.
    fn process_command(&mut self, now: u64) {
        let Some(command) = self.commands.pop() else {
            return;
        };
        match telemetry::parse_command(&command) {
            Ok((cv, value)) => match self.cv.validate_and_update(cv, value) {
                Ok(message) => {
                    self.store.queue_save(&self.cv, &mut self.file_queue);
                    self.events.log(now, "CV_UPDATE", format!("CV{cv}={value}"));
                    info!("{message}");
                    self.telemetry.send_line(&format!("OK: {message}\n"));
                }
                Err(message) => {
                    self.events.log(now, "CV_REJECTED", message.clone());
                    warn!("{message}");
                    self.telemetry.send_line(&format!("ERR: {message}\n"));
                }
            },
            Err(e) => {
                let command = command.as_str();
                self.events.log(now, "CMD_ERROR", format!("{command}: {e}"));
                warn!("bad command '{command}': {e}");
            }
        }
    }

    /// Emergency shutdown.
    ///
    /// Full shutdown: heaters off, black box queued with priority, servo
    /// snapped to the whistle position, then the sequencer walks vent →
    /// settle → halt. Force-close-only (operator e-stop): heaters off and
    /// regulator closed instantly; no log, no halt, control retained.
    fn die(&mut self, cause: ShutdownCause, force_close_only: bool, now: u64) {
        error!("EMERGENCY SHUTDOWN: {cause}");
        self.events.log(now, "SHUTDOWN", cause.as_str());

        // Stage 1, always: heater cutoff inside this tick.
        self.pressure.shutdown();
        self.servo.set_emergency();
        let config = servo_config(&self.cv);

        if force_close_only {
            let _ = self.servo.set_goal(0.0, false, &config);
            self.servo.update(now, &config);
            return;
        }

        self.shutdown_cause = Some(cause);
        let record = BlackBoxRecord {
            t: now,
            err: cause.as_str().to_string(),
            events: self.events.to_vec(),
        };
        self.store.queue_black_box(&record, &mut self.file_queue);

        // Whistle position: vents residual pressure and sounds the alarm.
        let _ = self.servo.set_goal(0.0, true, &config);
        self.servo.update(now, &config);
        self.sequencer = Sequencer::Venting {
            until_ms: now + VENT_MS,
        };
    }

    /// Advances the vent → settle → halt sequence; the black-box queue
    /// keeps draining underneath it.
    fn drive_shutdown(&mut self, now: u64) {
        self.file_queue.process(now);
        match self.sequencer {
            Sequencer::Venting { until_ms } if now >= until_ms => {
                let config = servo_config(&self.cv);
                let _ = self.servo.set_goal(0.0, false, &config);
                self.servo.update(now, &config);
                self.sequencer = Sequencer::Settling {
                    until_ms: now + SETTLE_MS,
                };
            }
            Sequencer::Settling { until_ms } if now >= until_ms => {
                self.servo.force_idle();
                self.sequencer = Sequencer::Halted;
            }
            _ => {}
        }
    }

    /// Feeds received telemetry bytes into the command queue. Called by
    /// the transport boundary.
    pub fn rx_bytes(&mut self, bytes: &[u8]) {
        self.commands.push_bytes(bytes);
    }

    pub fn is_halted(&self) -> bool {
        self.sequencer == Sequencer::Halted
    }

    pub fn shutdown_cause(&self) -> Option<ShutdownCause> {
        self.shutdown_cause
    }

    pub fn watchdog_mode(&self) -> WatchdogMode {
        self.watchdog.mode()
    }

    pub fn cv(&self) -> &CvTable {
        &self.cv
    }

    pub fn readings(&self) -> &Readings {
        self.sensors.readings()
    }

    pub fn velocity_cms(&self) -> f32 {
        self.encoder.velocity_cms()
    }

    pub fn servo_duty(&self) -> f32 {
        self.servo.current_duty()
    }

    pub fn servo_target(&self) -> f32 {
        self.servo.target_duty()
    }

    pub fn boiler_duty(&self) -> u16 {
        self.pressure.boiler_duty()
    }

    pub fn superheater_duty(&self) -> u16 {
        self.pressure.superheater_duty()
    }

    pub fn events(&self) -> &EventBuffer {
        &self.events
    }
}
