//! Transmission envelopes and sequence bookkeeping
//!
//! A transmission envelope is a `u16` sequence number followed by one or more
//! `[u8 length][frame envelope]` chunks. Sequence numbers count modulo
//! `0xFFFF`, so a packet never starts with `0xFF 0xFF`: those two bytes mark a
//! time-sync message instead.

use super::NetError;
use super::input::CodecError;

/// Leading bytes reserved for time-sync messages
pub const SYNC_MAGIC: u16 = 0xFFFF;

/// Sequence numbers run over `0..SEQUENCE_MODULUS`
pub const SEQUENCE_MODULUS: u32 = SYNC_MAGIC as u32;

#[inline]
pub fn next_sequence(sequence: u16) -> u16 {
    ((sequence as u32 + 1) % SEQUENCE_MODULUS) as u16
}

/// True when `bytes` is a time-sync message rather than an input packet
pub fn is_time_sync(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && u16::from_le_bytes([bytes[0], bytes[1]]) == SYNC_MAGIC
}

/// Outgoing side: numbers and packs frame envelopes
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    next: u16,
    max_frame: usize,
}

impl SequenceCounter {
    pub fn new(max_frame: usize) -> Self {
        Self {
            next: 0,
            max_frame: max_frame.min(u8::MAX as usize),
        }
    }

    /// Sequence number the next `wrap` will use
    pub fn peek(&self) -> u16 {
        self.next
    }

    /// Pack encoded frame envelopes into one transmission envelope
    pub fn wrap(&mut self, frames: &[Vec<u8>]) -> Result<Vec<u8>, NetError> {
        if let Some(frame) = frames.iter().find(|f| f.len() > self.max_frame) {
            return Err(NetError::Oversized {
                size: frame.len(),
                max: self.max_frame,
            });
        }
        let size = 2 + frames.iter().map(|f| f.len() + 1).sum::<usize>();
        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(&self.next.to_le_bytes());
        for frame in frames {
            out.push(frame.len() as u8);
            out.extend_from_slice(frame);
        }
        self.next = next_sequence(self.next);
        Ok(out)
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }
}

/// Split a transmission envelope into its sequence number and frame envelopes
pub fn unwrap(bytes: &[u8]) -> Result<(u16, Vec<&[u8]>), CodecError> {
    if bytes.len() < 2 {
        return Err(CodecError::Truncated {
            needed: 2,
            available: bytes.len(),
        });
    }
    let sequence = u16::from_le_bytes([bytes[0], bytes[1]]);
    let mut rest = &bytes[2..];
    let mut frames = Vec::new();
    while let Some((&len, tail)) = rest.split_first() {
        let len = len as usize;
        if tail.len() < len {
            return Err(CodecError::Truncated {
                needed: len,
                available: tail.len(),
            });
        }
        let (frame, tail) = tail.split_at(len);
        frames.push(frame);
        rest = tail;
    }
    Ok((sequence, frames))
}

/// Verdict on an incoming sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    Fresh,
    /// Repeat of the packet just accepted
    Duplicate,
}

/// Incoming side: the channel must deliver every packet exactly in order
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    expected: u16,
    last: Option<u16>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, sequence: u16) -> Result<Received, NetError> {
        if sequence == self.expected {
            self.last = Some(sequence);
            self.expected = next_sequence(sequence);
            Ok(Received::Fresh)
        } else if self.last == Some(sequence) {
            log::warn!("ignoring duplicate packet {}", sequence);
            Ok(Received::Duplicate)
        } else {
            Err(NetError::SequenceGap {
                expected: self.expected,
                got: sequence,
            })
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Recovers full frame numbers from their low 16 bits
#[derive(Debug, Clone, Default)]
pub struct FrameWidener {
    last: u64,
}

impl FrameWidener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(frame: u64) -> Self {
        Self { last: frame }
    }

    /// The full frame closest to the last one seen with matching low bits
    pub fn widen(&mut self, wire: u16) -> u64 {
        const SPAN: u64 = 1 << 16;
        const HALF: u64 = SPAN / 2;

        let mut frame = (self.last & !(SPAN - 1)) | wire as u64;
        if frame + HALF < self.last {
            frame += SPAN;
        } else if frame > self.last + HALF && frame >= SPAN {
            frame -= SPAN;
        }
        self.last = self.last.max(frame);
        frame
    }

    pub fn reset_to(&mut self, frame: u64) {
        self.last = frame;
    }
}
