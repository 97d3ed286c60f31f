//! Bounded diagnostic buffer for connection attempts.
//!
//! Transports push stderr lines and transport-level errors here during an
//! attempt; the supervisor resets it at the start of each attempt and drains
//! it into the failure report when the attempt dies.

use std::collections::VecDeque;

use parking_lot::Mutex;

const DEFAULT_CAPACITY: usize = 100;

/// Ring of the most recent diagnostic lines for one backend.
#[derive(Debug)]
pub struct DiagnosticBuffer {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl Default for DiagnosticBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl DiagnosticBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a line, evicting the oldest when full.
    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Take everything, leaving the buffer empty.
    pub fn drain(&self) -> Vec<String> {
        self.lines.lock().drain(..).collect()
    }

    /// Copy without clearing.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}
