//! Edge-ISR bit assembly and the shared decoder snapshot.

use crate::parser::{parse_packet, DccAddress, Instruction};
use crate::{classify_half_bit, HalfBit};
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

/// Function group 1 mask for F0, the whistle.
pub const FN_WHISTLE: u8 = 0x10;

/// Capacity of the half-bit assembly buffer. A long-address packet with
/// two instruction bytes occupies 45 positions; the rest is slack for
/// preamble tails.
const BIT_CAPACITY: usize = 96;

/// Minimum buffer length before a packet boundary is considered.
const MIN_PACKET_BITS: usize = 24;

/// The decoder state shared between the edge ISR and the control loop.
///
/// Every field is a word-sized scalar written with relaxed ordering: only
/// tick-to-tick consistency matters, and readers always take a snapshot.
#[derive(Debug)]
pub struct DccShared {
    speed: AtomicU8,
    forward: AtomicBool,
    functions: AtomicU8,
    e_stop: AtomicBool,
    last_valid_ms: AtomicU64,
}

/// A point-in-time copy of the shared decoder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DccSnapshot {
    /// Commanded speed step.
    pub speed: u8,
    /// Direction bit; live steam only drives forward, the loop maps
    /// reverse to a closed regulator.
    pub forward: bool,
    /// Function group 1 bits (F0..F4).
    pub functions: u8,
    /// Latched emergency-stop order.
    pub e_stop: bool,
    /// Timestamp of the last packet addressed to us.
    pub last_valid_ms: u64,
}

impl DccSnapshot {
    /// F0, the whistle function.
    pub fn whistle(&self) -> bool {
        self.functions & FN_WHISTLE != 0
    }
}

impl DccShared {
    pub fn new() -> Self {
        Self {
            speed: AtomicU8::new(0),
            forward: AtomicBool::new(true),
            functions: AtomicU8::new(0),
            e_stop: AtomicBool::new(false),
            last_valid_ms: AtomicU64::new(0),
        }
    }

    /// Takes a snapshot of the current command state.
    pub fn snapshot(&self) -> DccSnapshot {
        DccSnapshot {
            speed: self.speed.load(Ordering::Relaxed),
            forward: self.forward.load(Ordering::Relaxed),
            functions: self.functions.load(Ordering::Relaxed),
            e_stop: self.e_stop.load(Ordering::Relaxed),
            last_valid_ms: self.last_valid_ms.load(Ordering::Relaxed),
        }
    }

    /// True iff a valid addressed packet arrived within `timeout_ms`.
    ///
    /// This is the sole DCC-presence signal the watchdog uses.
    pub fn is_active(&self, now_ms: u64, timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_valid_ms.load(Ordering::Relaxed)) < timeout_ms
    }

    /// Clears the e-stop latch after the loop has acted on it.
    pub fn clear_e_stop(&self) {
        self.e_stop.store(false, Ordering::Relaxed);
    }

    fn apply(&self, instruction: Instruction, now_ms: u64) {
        self.last_valid_ms.store(now_ms, Ordering::Relaxed);
        match instruction {
            Instruction::Speed {
                forward,
                step,
                e_stop,
            } => {
                self.forward.store(forward, Ordering::Relaxed);
                self.speed.store(step, Ordering::Relaxed);
                if e_stop {
                    self.e_stop.store(true, Ordering::Relaxed);
                }
            }
            Instruction::FunctionGroup1 { bits } => {
                self.functions.store(bits, Ordering::Relaxed);
            }
        }
    }
}

impl Default for DccShared {
    fn default() -> Self {
        Self::new()
    }
}

/// The edge-ISR half of the decoder.
///
/// Owned exclusively by the pin-change interrupt context: the bit buffer
/// never crosses into the foreground. Each edge is timed against the
/// previous one, classified, and appended; once at least
/// [`MIN_PACKET_BITS`] have accumulated and the most recent bit is a one
/// (a candidate packet boundary), the parser runs and the buffer resets.
///
/// The handler does no allocation and no floating-point work.
#[cfg(feature = "std")]
pub struct EdgeDecoder {
    address: DccAddress,
    shared: std::sync::Arc<DccShared>,
    bits: heapless::Vec<u8, BIT_CAPACITY>,
    last_edge_us: u64,
}

#[cfg(feature = "std")]
impl EdgeDecoder {
    pub fn new(address: DccAddress, shared: std::sync::Arc<DccShared>) -> Self {
        Self {
            address,
            shared,
            bits: heapless::Vec::new(),
            last_edge_us: 0,
        }
    }

    /// ISR entry point: one track edge at `now_us` microseconds.
    pub fn on_edge(&mut self, now_us: u64) {
        let delta = now_us.saturating_sub(self.last_edge_us);
        self.last_edge_us = now_us;

        let bit = match classify_half_bit(delta.min(u32::MAX as u64) as u32) {
            HalfBit::One => 1,
            HalfBit::Zero => 0,
            HalfBit::Invalid => {
                self.bits.clear();
                return;
            }
        };

        if self.bits.push(bit).is_err() {
            // Buffer overrun without a packet boundary: garbage, resync.
            self.bits.clear();
            return;
        }

        // A candidate packet boundary: enough bits for three 9-bit frames,
        // aligned to a frame edge, and the trailing bit is a packet stop.
        if self.bits.len() >= MIN_PACKET_BITS
            && self.bits.len() % 9 == 0
            && *self.bits.last().unwrap() == 1
        {
            if let Ok(instruction) = parse_packet(&self.bits, &self.address) {
                self.shared.apply(instruction, now_us / 1000);
            }
            self.bits.clear();
        }
    }
}
