//! Link quality register - reception ratios of neighbouring nodes
//!
//! Neighbours broadcast Hellos on a fixed cadence with their own counter.
//! Counting received versus skipped counters gives the reception ratio of
//! each incoming link. Ratios of past windows are blended in with halving
//! weights so a single bad window does not drop a link.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::wire::{Message, MessageType, COUNTER_LIMIT};

/// Configuration of the link quality estimator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkQualityConfig {
    /// Number of past windows kept per neighbour
    pub history_limit: usize,
}

impl Default for LinkQualityConfig {
    fn default() -> Self {
        Self { history_limit: 8 }
    }
}

#[derive(Debug, Clone)]
struct LinkEntry {
    expected: u8,
    received: u32,
    missed: u32,
    /// Ratios of closed windows, newest first
    history: VecDeque<f64>,
}

impl LinkEntry {
    fn seeded(counter: u8) -> Self {
        Self {
            expected: counter,
            received: 0,
            missed: 0,
            history: VecDeque::new(),
        }
    }

    fn current(&self) -> f64 {
        let total = self.received + self.missed;
        if total == 0 {
            0.0
        } else {
            self.received as f64 / total as f64
        }
    }

    fn estimate(&self) -> f64 {
        let mut result = self.current();
        let mut weight = 0.5;
        for historical in &self.history {
            result = (1.0 - weight) * result + weight * historical;
            weight /= 2.0;
        }
        result
    }

    fn close_window(&mut self, limit: usize) {
        let current = self.current();
        self.history.push_front(current);
        self.history.truncate(limit);
        self.received = 0;
        self.missed = 0;
    }
}

/// Per-neighbour reception statistics
#[derive(Debug, Clone, Default)]
pub struct LinkQualityRegister {
    config: LinkQualityConfig,
    entries: HashMap<u8, LinkEntry>,
}

impl LinkQualityRegister {
    pub fn new(config: LinkQualityConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
        }
    }

    /// Account for a received message; anything but a Hello is ignored
    pub fn observe(&mut self, message: &Message) {
        if !message.is(MessageType::Hello) {
            return;
        }
        let counter = message.header.counter();
        let entry = self
            .entries
            .entry(message.header.node_address())
            .or_insert_with(|| LinkEntry::seeded(counter));

        let skipped = (counter + COUNTER_LIMIT - entry.expected) % COUNTER_LIMIT;
        entry.received += 1;
        entry.missed += skipped as u32;
        entry.expected = (counter + 1) % COUNTER_LIMIT;
    }

    /// True once a Hello from this neighbour has been observed
    pub fn knows(&self, neighbor: u8) -> bool {
        self.entries.contains_key(&neighbor)
    }

    pub fn neighbors(&self) -> impl Iterator<Item = u8> + '_ {
        self.entries.keys().copied()
    }

    /// Blended reception estimate, 0.0 for unknown neighbours
    pub fn estimate(&self, neighbor: u8) -> f64 {
        self.entries.get(&neighbor).map_or(0.0, LinkEntry::estimate)
    }

    /// Estimate, then close the current window into the history
    pub fn breakpoint(&mut self, neighbor: u8) -> f64 {
        let limit = self.config.history_limit;
        match self.entries.get_mut(&neighbor) {
            Some(entry) => {
                let estimate = entry.estimate();
                entry.close_window(limit);
                estimate
            }
            None => 0.0,
        }
    }

    /// Estimates of every neighbour at or above `threshold`
    pub fn estimate_all(&self, threshold: f64) -> BTreeMap<u8, f64> {
        self.entries
            .iter()
            .map(|(&neighbor, entry)| (neighbor, entry.estimate()))
            .filter(|&(_, estimate)| estimate >= threshold)
            .collect()
    }

    /// Close every window and return the estimates at or above `threshold`
    pub fn breakpoint_all(&mut self, threshold: f64) -> BTreeMap<u8, f64> {
        let limit = self.config.history_limit;
        self.entries
            .iter_mut()
            .map(|(&neighbor, entry)| {
                let estimate = entry.estimate();
                entry.close_window(limit);
                (neighbor, estimate)
            })
            .filter(|&(_, estimate)| estimate >= threshold)
            .collect()
    }
}
