//! In-order admission of sequenced envelopes.
//!
//! The first sequence seen becomes the baseline. Later envelopes are either
//! delivered (next expected), parked in a bounded buffer (ahead of expected),
//! or ignored (at or behind the last delivered). Each delivery drains every
//! buffered envelope that has become contiguous.

use bridge_wire::Envelope;
use std::collections::VecDeque;

/// Result of admitting one envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Envelopes now deliverable, in sequence order
    Deliver(Vec<Envelope>),
    /// Parked for later; `evicted` is the sequence pushed out to make room
    Buffered {
        /// Oldest buffered sequence dropped on overflow
        evicted: Option<u64>,
    },
    /// Already delivered or already buffered
    Duplicate,
    /// Ahead of expected while buffering is disabled
    Rejected,
}

/// Sequence tracker with a bounded reorder buffer
#[derive(Debug, Clone)]
pub struct Sequencer {
    enforce: bool,
    allow_out_of_order: bool,
    max_buffer_size: usize,
    last_delivered: Option<u64>,
    buffer: VecDeque<Envelope>,
}

impl Sequencer {
    /// Create a tracker
    pub fn new(enforce: bool, allow_out_of_order: bool, max_buffer_size: usize) -> Self {
        Self {
            enforce,
            allow_out_of_order,
            max_buffer_size,
            last_delivered: None,
            buffer: VecDeque::with_capacity(max_buffer_size.min(1024)),
        }
    }

    /// Last delivered sequence
    pub fn last_delivered(&self) -> Option<u64> {
        self.last_delivered
    }

    /// Next sequence that will be delivered directly
    pub fn expected(&self) -> Option<u64> {
        self.last_delivered.map(|s| s.saturating_add(1))
    }

    /// Buffered sequences, ascending
    pub fn buffered_sequences(&self) -> Vec<u64> {
        let mut seqs: Vec<u64> = self.buffer.iter().map(|e| e.sequence).collect();
        seqs.sort_unstable();
        seqs
    }

    /// Drop everything buffered; returns how many were dropped
    pub fn clear_buffer(&mut self) -> usize {
        let n = self.buffer.len();
        self.buffer.clear();
        n
    }

    /// Forget the baseline and the buffer
    pub fn reset(&mut self) {
        self.last_delivered = None;
        self.buffer.clear();
    }

    /// Admit one envelope
    pub fn admit(&mut self, envelope: Envelope) -> Admission {
        if !self.enforce {
            self.last_delivered = Some(envelope.sequence);
            return Admission::Deliver(vec![envelope]);
        }

        let sequence = envelope.sequence;
        match self.last_delivered {
            None => Admission::Deliver(self.deliver_from(envelope)),
            Some(last) if sequence <= last => Admission::Duplicate,
            Some(last) if sequence == last.saturating_add(1) => {
                Admission::Deliver(self.deliver_from(envelope))
            }
            Some(_) => {
                if !self.allow_out_of_order || self.max_buffer_size == 0 {
                    return Admission::Rejected;
                }
                if self.buffer.iter().any(|e| e.sequence == sequence) {
                    return Admission::Duplicate;
                }
                let evicted = if self.buffer.len() >= self.max_buffer_size {
                    self.buffer.pop_front().map(|e| e.sequence)
                } else {
                    None
                };
                self.buffer.push_back(envelope);
                Admission::Buffered { evicted }
            }
        }
    }

    fn deliver_from(&mut self, envelope: Envelope) -> Vec<Envelope> {
        let mut last = envelope.sequence;
        let mut out = vec![envelope];
        loop {
            let next = last.saturating_add(1);
            let Some(pos) = self.buffer.iter().position(|e| e.sequence == next) else {
                break;
            };
            match self.buffer.remove(pos) {
                Some(buffered) => {
                    out.push(buffered);
                    last = next;
                }
                None => break,
            }
        }
        self.last_delivered = Some(last);
        out
    }
}
