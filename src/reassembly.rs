//! Handshake message reassembly.
//!
//! Fragments arrive in any order, duplicated, and possibly overlapping.
//! Per `(message_seq)` a buffer accumulates bytes until the message is
//! complete; completed messages are released strictly in `message_seq`
//! order. Bytes buffered ahead of the next expected message count against a
//! cap; when the cap is hit the newest fragments are dropped so the peer
//! retransmits them, instead of evicting earlier messages.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::Error;
use crate::message::{HandshakeHeader, MessageType};

/// Outcome of feeding one fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    /// Fragment absorbed (possibly completing a message).
    Absorbed,
    /// Fragment of a message already consumed: the peer is retransmitting
    /// its previous flight.
    Retransmission,
    /// Dropped because the deferred-fragment cap was reached.
    DroppedOverCap,
}

/// A complete handshake message in receive order.
#[derive(Debug)]
pub struct CompleteMessage {
    pub msg_type: MessageType,
    pub message_seq: u16,
    /// Epoch the fragments arrived under (Finished must be 1).
    pub epoch: u16,
    pub body: Vec<u8>,
}

#[derive(Debug)]
struct PartialMessage {
    msg_type: MessageType,
    total_length: u32,
    epoch: u16,
    data: Vec<u8>,
    /// Sorted, disjoint received ranges.
    received: Vec<Range<u32>>,
    /// True once any fragment arrived (needed for zero-length bodies).
    touched: bool,
}

impl PartialMessage {
    fn new(msg_type: MessageType, total_length: u32, epoch: u16) -> Self {
        PartialMessage {
            msg_type,
            total_length,
            epoch,
            data: vec![0; total_length as usize],
            received: Vec::new(),
            touched: false,
        }
    }

    fn received_bytes(&self) -> usize {
        self.received.iter().map(|r| (r.end - r.start) as usize).sum()
    }

    fn is_complete(&self) -> bool {
        if self.total_length == 0 {
            return self.touched;
        }
        matches!(&self.received[..], [r] if r.start == 0 && r.end == self.total_length)
    }

    /// Merge one fragment, comparing bytes where ranges overlap.
    fn absorb(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Error> {
        self.touched = true;

        if bytes.is_empty() {
            return Ok(());
        }

        let start = offset;
        let end = offset + bytes.len() as u32;

        // Conflicting bytes in any overlap are a fatal decode error; a peer
        // sending two versions of the same message is misbehaving.
        for r in &self.received {
            let ov_start = r.start.max(start);
            let ov_end = r.end.min(end);
            if ov_start < ov_end {
                let existing = &self.data[ov_start as usize..ov_end as usize];
                let incoming = &bytes[(ov_start - start) as usize..(ov_end - start) as usize];
                if existing != incoming {
                    return Err(Error::DecodeError(
                        "conflicting handshake fragment bytes".to_string(),
                    ));
                }
            }
        }

        self.data[start as usize..end as usize].copy_from_slice(bytes);

        // Insert and re-merge the range list.
        self.received.push(start..end);
        self.received.sort_by_key(|r| r.start);
        let mut merged: Vec<Range<u32>> = Vec::with_capacity(self.received.len());
        for r in self.received.drain(..) {
            match merged.last_mut() {
                Some(last) if r.start <= last.end => {
                    last.end = last.end.max(r.end);
                }
                _ => merged.push(r),
            }
        }
        self.received = merged;

        Ok(())
    }
}

#[derive(Debug)]
pub struct Reassembler {
    next_receive_seq: u16,
    pending: BTreeMap<u16, PartialMessage>,
    max_deferred_bytes: usize,
}

impl Reassembler {
    pub fn new(max_deferred_bytes: usize) -> Self {
        Reassembler {
            next_receive_seq: 0,
            pending: BTreeMap::new(),
            max_deferred_bytes,
        }
    }

    /// Drop buffered state. Used around the HelloVerifyRequest exchange,
    /// which is stateless by design.
    pub fn reset(&mut self, next_receive_seq: u16) {
        self.pending.clear();
        self.next_receive_seq = next_receive_seq;
    }

    /// Bytes currently buffered for messages beyond the next expected one.
    fn deferred_bytes(&self) -> usize {
        self.pending
            .iter()
            .filter(|(seq, _)| **seq > self.next_receive_seq)
            .map(|(_, m)| m.received_bytes())
            .sum()
    }

    /// Feed one handshake fragment received under `epoch`.
    pub fn accept(
        &mut self,
        header: &HandshakeHeader,
        fragment: &[u8],
        epoch: u16,
    ) -> Result<Accept, Error> {
        if header.fragment_length as usize != fragment.len() {
            return Err(Error::DecodeError(
                "fragment length disagrees with record".to_string(),
            ));
        }
        if header
            .fragment_offset
            .checked_add(header.fragment_length)
            .map(|end| end > header.length)
            .unwrap_or(true)
        {
            return Err(Error::DecodeError(
                "fragment exceeds message bounds".to_string(),
            ));
        }

        if header.message_seq < self.next_receive_seq {
            return Ok(Accept::Retransmission);
        }

        if header.message_seq > self.next_receive_seq {
            let new_bytes = fragment.len();
            if self.deferred_bytes() + new_bytes > self.max_deferred_bytes {
                debug!(
                    "Deferred-fragment cap hit ({} bytes); dropping seq {} offset {}",
                    self.max_deferred_bytes, header.message_seq, header.fragment_offset
                );
                return Ok(Accept::DroppedOverCap);
            }
        }

        let partial = self
            .pending
            .entry(header.message_seq)
            .or_insert_with(|| PartialMessage::new(header.msg_type, header.length, epoch));

        // All fragments of one message must agree on its header and epoch.
        if partial.msg_type != header.msg_type
            || partial.total_length != header.length
            || partial.epoch != epoch
        {
            return Err(Error::DecodeError(
                "conflicting handshake fragment header".to_string(),
            ));
        }

        partial.absorb(header.fragment_offset, fragment)?;

        Ok(Accept::Absorbed)
    }

    /// Release the next message if it is complete.
    pub fn pop_complete(&mut self) -> Option<CompleteMessage> {
        let seq = self.next_receive_seq;
        let ready = self.pending.get(&seq).map(|m| m.is_complete())?;
        if !ready {
            return None;
        }

        let partial = self.pending.remove(&seq).expect("checked above");
        self.next_receive_seq = self.next_receive_seq.wrapping_add(1);

        Some(CompleteMessage {
            msg_type: partial.msg_type,
            message_seq: seq,
            epoch: partial.epoch,
            body: partial.data,
        })
    }

    /// The type of the message that would be released next, if complete.
    pub fn peek_complete_type(&self) -> Option<MessageType> {
        let m = self.pending.get(&self.next_receive_seq)?;
        m.is_complete().then_some(m.msg_type)
    }
}
