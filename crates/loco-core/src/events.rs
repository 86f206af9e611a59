//! Bounded black-box event ring.

use serde::{Deserialize, Serialize};

/// Capacity of the event ring.
pub const EVENT_BUFFER_SIZE: usize = 20;

/// One black-box entry: timestamp, kind tag, free-form payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Milliseconds since boot.
    pub t: u64,
    /// Event category ("BOOT", "SHUTDOWN", "CV_UPDATE", ...).
    pub kind: String,
    pub payload: String,
}

/// A circular log of the last [`EVENT_BUFFER_SIZE`] significant events,
/// written to flash on emergency shutdown for post-incident analysis.
/// Oldest-out when full.
#[derive(Debug, Default)]
pub struct EventBuffer {
    entries: std::collections::VecDeque<Event>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self {
            entries: std::collections::VecDeque::with_capacity(EVENT_BUFFER_SIZE),
        }
    }

    pub fn log(&mut self, t: u64, kind: &str, payload: impl Into<String>) {
        if self.entries.len() == EVENT_BUFFER_SIZE {
            self.entries.pop_front();
        }
        self.entries.push_back(Event {
            t,
            kind: kind.to_string(),
            payload: payload.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.entries.iter()
    }

    /// Snapshot for the black-box record.
    pub fn to_vec(&self) -> Vec<Event> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_when_full() {
        let mut buffer = EventBuffer::new();
        for i in 0..(EVENT_BUFFER_SIZE as u64 + 5) {
            buffer.log(i, "TICK", i.to_string());
        }
        assert_eq!(buffer.len(), EVENT_BUFFER_SIZE);
        assert_eq!(buffer.iter().next().unwrap().t, 5);
        assert_eq!(buffer.to_vec().last().unwrap().t, EVENT_BUFFER_SIZE as u64 + 4);
    }
}
