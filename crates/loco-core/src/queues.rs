//! Background work queues.
//!
//! The 50 Hz loop must never wait on serial output, flash writes or
//! memory housekeeping. Everything slow is queued here and drained one
//! item per tick, rate-limited, from the loop's background-processing
//! step. Only the foreground enqueues, so the queues need no locking.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// Minimum spacing between serial prints.
pub const PRINT_INTERVAL_MS: u64 = 50;
/// Minimum spacing between file writes.
pub const WRITE_INTERVAL_MS: u64 = 100;
/// Minimum spacing between housekeeping passes.
pub const HOUSEKEEPING_INTERVAL_MS: u64 = 1000;

/// Non-blocking queue for human-readable serial output.
///
/// Oldest messages are dropped when full; status text is not
/// safety-critical.
#[derive(Debug)]
pub struct SerialPrintQueue {
    queue: VecDeque<String>,
    max_size: usize,
    last_print_ms: u64,
}

impl SerialPrintQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            max_size,
            last_print_ms: 0,
        }
    }

    pub fn enqueue(&mut self, message: impl Into<String>) {
        if self.queue.len() == self.max_size {
            self.queue.pop_front();
        }
        self.queue.push_back(message.into());
    }

    /// Emits at most one message, at most every [`PRINT_INTERVAL_MS`].
    pub fn process(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.last_print_ms) < PRINT_INTERVAL_MS {
            return;
        }
        if let Some(message) = self.queue.pop_front() {
            info!(target: "serial", "{message}");
            self.last_print_ms = now_ms;
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn compact(&mut self) {
        self.queue.shrink_to_fit();
    }
}

#[derive(Debug, Clone)]
struct FileWrite {
    path: PathBuf,
    content: String,
    priority: bool,
}

/// Non-blocking queue for whole-file writes.
///
/// Priority entries (the black box) jump the queue and displace routine
/// entries when full; a failed write is logged and dropped.
#[derive(Debug)]
pub struct FileWriteQueue {
    queue: VecDeque<FileWrite>,
    max_size: usize,
    last_write_ms: u64,
}

impl FileWriteQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            max_size,
            last_write_ms: 0,
        }
    }

    pub fn enqueue_write(&mut self, path: PathBuf, content: String, priority: bool) {
        if self.queue.len() >= self.max_size {
            if !priority {
                return; // full, drop the routine write
            }
            // Displace the oldest routine entry to make room.
            if let Some(pos) = self.queue.iter().position(|w| !w.priority) {
                self.queue.remove(pos);
            } else {
                self.queue.pop_back();
            }
        }

        let entry = FileWrite {
            path,
            content,
            priority,
        };
        if entry.priority {
            self.queue.push_front(entry);
        } else {
            self.queue.push_back(entry);
        }
    }

    /// Performs at most one write, at most every [`WRITE_INTERVAL_MS`].
    pub fn process(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.last_write_ms) < WRITE_INTERVAL_MS {
            return;
        }
        if let Some(write) = self.queue.pop_front() {
            if let Err(e) = fs::write(&write.path, &write.content) {
                warn!("file write to {:?} failed: {e}", write.path);
            }
            self.last_write_ms = now_ms;
        }
    }

    /// Drains the queue ignoring the rate limit. Used once, after the
    /// shutdown sequencer has halted the loop, so the black box is on
    /// flash before deep sleep.
    pub fn flush(&mut self) {
        while let Some(write) = self.queue.pop_front() {
            if let Err(e) = fs::write(&write.path, &write.content) {
                warn!("file write to {:?} failed: {e}", write.path);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn compact(&mut self) {
        self.queue.shrink_to_fit();
    }
}

/// Rate-limited memory housekeeping.
///
/// Returns queue slack to the allocator so heap high-water marks stay
/// bounded on long runs. Never more than once per second.
#[derive(Debug)]
pub struct Housekeeper {
    last_run_ms: u64,
}

impl Housekeeper {
    pub fn new() -> Self {
        Self { last_run_ms: 0 }
    }

    pub fn process(
        &mut self,
        now_ms: u64,
        serial: &mut SerialPrintQueue,
        files: &mut FileWriteQueue,
    ) {
        if now_ms.saturating_sub(self.last_run_ms) < HOUSEKEEPING_INTERVAL_MS {
            return;
        }
        serial.compact();
        files.compact();
        self.last_run_ms = now_ms;
    }
}

impl Default for Housekeeper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_queue_rate_limits() {
        let mut queue = SerialPrintQueue::new(10);
        queue.enqueue("one");
        queue.enqueue("two");
        queue.process(100);
        assert_eq!(queue.len(), 1);
        // Too soon: nothing drained.
        queue.process(120);
        assert_eq!(queue.len(), 1);
        queue.process(160);
        assert!(queue.is_empty());
    }

    #[test]
    fn serial_queue_drops_oldest_when_full() {
        let mut queue = SerialPrintQueue::new(2);
        queue.enqueue("one");
        queue.enqueue("two");
        queue.enqueue("three");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn priority_write_jumps_queue() {
        let dir = tempfile::tempdir().unwrap();
        let routine = dir.path().join("routine.txt");
        let urgent = dir.path().join("urgent.txt");

        let mut queue = FileWriteQueue::new(5);
        queue.enqueue_write(routine.clone(), "routine".into(), false);
        queue.enqueue_write(urgent.clone(), "urgent".into(), true);

        queue.process(1000);
        assert!(urgent.exists());
        assert!(!routine.exists());
    }

    #[test]
    fn full_queue_drops_routine_for_priority() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = FileWriteQueue::new(2);
        queue.enqueue_write(dir.path().join("a"), "a".into(), false);
        queue.enqueue_write(dir.path().join("b"), "b".into(), false);
        queue.enqueue_write(dir.path().join("c"), "c".into(), true);
        assert_eq!(queue.len(), 2);

        // Routine writes are refused outright when full.
        queue.enqueue_write(dir.path().join("d"), "d".into(), false);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn failed_write_is_dropped() {
        let mut queue = FileWriteQueue::new(5);
        queue.enqueue_write(PathBuf::from("/nonexistent/dir/file"), "x".into(), false);
        queue.process(1000);
        assert!(queue.is_empty());
    }
}
