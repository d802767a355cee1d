//! Correspondence register - per-link sequence counters and loss detection
//!
//! A correspondence is one direction of traffic between a node and the
//! controller. The sender stamps a 5-bit counter on every message, the
//! receiver tracks which counters it expected but never saw.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::wire::{Header, Message, MessageType, COUNTER_LIMIT, DOWNWARDS_KEY};

/// What a register reports when a previously missing counter arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossPolicy {
    /// Report nothing for that message, even if other gaps are still open
    #[default]
    SuppressOnFill,
    /// Report the gaps that remain open
    ReportOutstanding,
}

/// Sending and receiving state of one correspondence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrespondenceRegister {
    /// Address byte stamped on outgoing headers, direction bit included
    address: u8,
    sending: u8,
    next_receiving: u8,
    missing: BTreeSet<u8>,
    policy: LossPolicy,
}

/// Register shared between a node and its controller client
pub type SharedCorrespondence = Arc<Mutex<CorrespondenceRegister>>;

/// Lock a shared register, recovering the state if a holder panicked
pub fn lock_register(register: &SharedCorrespondence) -> MutexGuard<'_, CorrespondenceRegister> {
    register.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CorrespondenceRegister {
    /// Upward correspondence: messages sent by `node` towards the controller
    pub fn from(node: u8) -> Self {
        Self::with_address(node)
    }

    /// Downward correspondence: messages sent by the controller towards `node`
    pub fn to(node: u8) -> Self {
        Self::with_address(node | DOWNWARDS_KEY)
    }

    fn with_address(address: u8) -> Self {
        Self {
            address,
            sending: 0,
            next_receiving: 0,
            missing: BTreeSet::new(),
            policy: LossPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: LossPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn shared(self) -> SharedCorrespondence {
        Arc::new(Mutex::new(self))
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn policy(&self) -> LossPolicy {
        self.policy
    }

    /// Counter the next packed message will carry
    pub fn sending_counter(&self) -> u8 {
        self.sending
    }

    pub fn missing(&self) -> impl Iterator<Item = u8> + '_ {
        self.missing.iter().copied()
    }

    /// Stamp a message with the current counter without consuming it
    pub fn pack(&self, kind: MessageType, payload: impl Into<Vec<u8>>) -> Message {
        Message::new(Header::encode(kind, self.address, self.sending), payload)
    }

    /// Stamp a message and advance the counter
    pub fn pack_and_increment(&mut self, kind: MessageType, payload: impl Into<Vec<u8>>) -> Message {
        let message = self.pack(kind, payload);
        self.sending = (self.sending + 1) % COUNTER_LIMIT;
        message
    }

    /// Record a received header and list the counters currently missing
    ///
    /// An in-order counter returns the gaps still open. A counter that fills a
    /// gap returns nothing under [`LossPolicy::SuppressOnFill`]. Any other
    /// counter marks every value between the expected one and itself as
    /// missing, modulo the counter width.
    pub fn register_and_list_losses(&mut self, header: Header) -> Vec<u8> {
        let counter = header.counter();

        if counter == self.next_receiving {
            self.next_receiving = (counter + 1) % COUNTER_LIMIT;
        } else if self.missing.remove(&counter) {
            if self.policy == LossPolicy::SuppressOnFill {
                return Vec::new();
            }
        } else {
            let mut skipped = self.next_receiving;
            while skipped != counter {
                self.missing.insert(skipped);
                skipped = (skipped + 1) % COUNTER_LIMIT;
            }
            self.next_receiving = (counter + 1) % COUNTER_LIMIT;
        }

        self.missing.iter().copied().collect()
    }
}
