//! Forwarding cache - a fixed ring of recently sent messages
//!
//! Every message a node forwards is kept here so it can be resent when a
//! trace reports it lost. Entries are only ever overwritten in rotation order;
//! storing a header that is already cached invalidates the older copy first.

use std::collections::HashMap;

use crate::wire::{Header, Message, COUNTER_MASK, DOWNWARDS_BIT, NODE_ADDRESS_MASK};

/// Default number of cached messages
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

const DIRECTED_TRACE_MASK: u16 = NODE_ADDRESS_MASK | DOWNWARDS_BIT | COUNTER_MASK;
const TRACE_MASK: u16 = NODE_ADDRESS_MASK | COUNTER_MASK;

/// Bounded FIFO of messages, indexed by exact header
#[derive(Debug, Clone)]
pub struct ForwardingCache {
    slots: Vec<Option<Message>>,
    /// Exact header to slot
    index: HashMap<Header, usize>,
    /// Next slot to write
    pointer: usize,
}

impl ForwardingCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            index: HashMap::with_capacity(capacity),
            pointer: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Store a message at the insertion pointer
    pub fn store(&mut self, message: Message) {
        if let Some(previous) = self.index.remove(&message.header) {
            self.slots[previous] = None;
        }
        if let Some(evicted) = self.slots[self.pointer].take() {
            if self.index.get(&evicted.header) == Some(&self.pointer) {
                self.index.remove(&evicted.header);
            }
        }

        self.index.insert(message.header, self.pointer);
        self.slots[self.pointer] = Some(message);
        self.pointer = (self.pointer + 1) % self.slots.len();
    }

    /// Exact full-header match
    pub fn contains(&self, message: &Message) -> bool {
        self.contains_header(message.header)
    }

    pub fn contains_header(&self, header: Header) -> bool {
        self.index.contains_key(&header)
    }

    /// Same header and same payload, i.e. a rebroadcast copy
    ///
    /// Headers repeat once a counter wraps, so duplicate suppression compares
    /// payloads too.
    pub fn holds(&self, message: &Message) -> bool {
        self.index
            .get(&message.header)
            .and_then(|&slot| self.slots[slot].as_ref())
            .is_some_and(|cached| cached.payload == message.payload)
    }

    /// Look up a lost message by its tracing header
    ///
    /// Only the address and counter bits are compared. An entry travelling in
    /// the same direction as `tracing` wins over one that merely shares the
    /// node address; newer entries win over older ones. The returned copy has
    /// the resend bit set.
    pub fn restore(&self, tracing: Header) -> Option<Message> {
        self.newest_first(|header| header.bits() & DIRECTED_TRACE_MASK == tracing.bits() & DIRECTED_TRACE_MASK)
            .or_else(|| self.newest_first(|header| header.bits() & TRACE_MASK == tracing.bits() & TRACE_MASK))
            .map(Message::resend)
    }

    fn newest_first(&self, accept: impl Fn(Header) -> bool) -> Option<&Message> {
        let capacity = self.slots.len();
        (1..=capacity)
            .map(|age| (self.pointer + capacity - age) % capacity)
            .filter_map(|slot| self.slots[slot].as_ref())
            .find(|message| accept(message.header))
    }
}

impl Default for ForwardingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
