//! REQUEST / REPLY / DONE round-trip latency estimation
//!
//! Runs once before play starts, over the same channel as the input stream.
//! Messages are five bytes: the `0xFF 0xFF` magic, a kind byte and a `u16`
//! (probe index, or the agreed latency in milliseconds for DONE).

use std::collections::{BTreeMap, VecDeque};

use thiserror::Error;

use super::codec::SYNC_MAGIC;
use super::input::CodecError;
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeSyncError {
    #[error("no probe reply within {0} ms")]
    Timeout(u64),
    #[error("unknown time-sync kind {0}")]
    UnknownKind(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMessage {
    Request(u16),
    Reply(u16),
    /// Final one-way latency in milliseconds
    Done(u16),
}

impl SyncMessage {
    pub const LEN: usize = 5;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let (kind, value) = match *self {
            SyncMessage::Request(i) => (0u8, i),
            SyncMessage::Reply(i) => (1, i),
            SyncMessage::Done(ms) => (2, ms),
        };
        let [m0, m1] = SYNC_MAGIC.to_le_bytes();
        let [v0, v1] = value.to_le_bytes();
        [m0, m1, kind, v0, v1]
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, super::NetError> {
        if bytes.len() < Self::LEN {
            return Err(CodecError::Truncated {
                needed: Self::LEN,
                available: bytes.len(),
            }
            .into());
        }
        let value = u16::from_le_bytes([bytes[3], bytes[4]]);
        match bytes[2] {
            0 => Ok(SyncMessage::Request(value)),
            1 => Ok(SyncMessage::Reply(value)),
            2 => Ok(SyncMessage::Done(value)),
            kind => Err(TimeSyncError::UnknownKind(kind).into()),
        }
    }
}

/// Trimmed mean of `samples`: drop values more than one standard deviation
/// from the median, then average the rest
pub fn estimate(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) * 0.5
    } else {
        sorted[mid]
    };

    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let deviation = (samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();

    let kept: Vec<f64> = samples
        .iter()
        .copied()
        .filter(|x| (x - median).abs() <= deviation)
        .collect();
    if kept.is_empty() {
        return Some(median);
    }
    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// Latency probe state for one peer
#[derive(Debug, Clone)]
pub struct TimeSync {
    burst: u16,
    min_samples: usize,
    capacity: usize,
    timeout_ms: f64,
    started: Option<f64>,
    next_index: u16,
    /// Send time per outstanding request index
    sent: BTreeMap<u16, f64>,
    samples: VecDeque<f64>,
    latency: Option<f64>,
    outbox: Vec<SyncMessage>,
}

impl TimeSync {
    pub fn new(settings: &Settings) -> Self {
        Self {
            burst: settings.probe_burst,
            min_samples: settings.probe_min_samples.max(1),
            capacity: settings.probe_buffer.max(1),
            timeout_ms: settings.probe_timeout_ms,
            started: None,
            next_index: 0,
            sent: BTreeMap::new(),
            samples: VecDeque::new(),
            latency: None,
            outbox: Vec::new(),
        }
    }

    /// Begin probing: returns the burst of requests to send
    pub fn start(&mut self, now: f64) -> Vec<SyncMessage> {
        self.started = Some(now);
        (0..self.burst)
            .map(|_| {
                let index = self.next_index;
                self.next_index = self.next_index.wrapping_add(1);
                self.sent.insert(index, now);
                SyncMessage::Request(index)
            })
            .collect()
    }

    /// React to a message from the peer; returns the reply to send, if any
    pub fn handle(&mut self, message: SyncMessage, now: f64) -> Option<SyncMessage> {
        match message {
            SyncMessage::Request(index) => Some(SyncMessage::Reply(index)),
            SyncMessage::Reply(index) => {
                match self.sent.remove(&index) {
                    Some(sent_at) => {
                        if self.samples.len() == self.capacity {
                            self.samples.pop_front();
                        }
                        self.samples.push_back((now - sent_at) * 0.5);
                    }
                    None => log::warn!("time sync: unexpected reply {}", index),
                }
                None
            }
            SyncMessage::Done(ms) => {
                if self.latency.is_none() {
                    log::debug!("time sync: adopting peer latency {} ms", ms);
                    self.latency = Some(ms as f64);
                }
                None
            }
        }
    }

    /// Check whether an estimate is ready
    ///
    /// The first time one is, a DONE message is queued in the outbox.
    pub fn poll(&mut self, now: f64) -> Result<Option<f64>, TimeSyncError> {
        if let Some(latency) = self.latency {
            return Ok(Some(latency));
        }
        let Some(started) = self.started else {
            return Ok(None);
        };
        let timed_out = now - started >= self.timeout_ms;
        if self.samples.len() < self.min_samples && !timed_out {
            return Ok(None);
        }

        let samples: Vec<f64> = self.samples.iter().copied().collect();
        let Some(latency) = estimate(&samples) else {
            return Err(TimeSyncError::Timeout(self.timeout_ms as u64));
        };
        log::debug!(
            "time sync: {:.1} ms from {} samples",
            latency,
            samples.len()
        );
        self.latency = Some(latency);
        self.outbox
            .push(SyncMessage::Done(latency.round().clamp(0.0, u16::MAX as f64) as u16));
        Ok(Some(latency))
    }

    pub fn latency(&self) -> Option<f64> {
        self.latency
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Messages queued for sending
    pub fn take_outbox(&mut self) -> Vec<SyncMessage> {
        std::mem::take(&mut self.outbox)
    }
}
