use std::collections::VecDeque;

use crate::socket::envelope::Envelope;

/// Outbound messages waiting for the registration acknowledgment
#[derive(Debug, Default)]
pub struct PendingQueue {
    messages: VecDeque<Envelope>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, envelope: Envelope) {
        self.messages.push_back(envelope);
    }

    /// Take every queued message in FIFO order, leaving the queue empty
    pub fn drain(&mut self) -> impl Iterator<Item = Envelope> + '_ {
        self.messages.drain(..)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
