//! Networking: input stream codec, lockstep reconciliation and latency probing
//!
//! Nothing in here owns a socket. Bytes come in through a [`Channel`] and the
//! simulation only ever sees decoded [`Input`]s.

pub mod channel;
pub mod codec;
pub mod input;
pub mod lockstep;
pub mod session;
pub mod timesync;

use thiserror::Error;

pub use channel::{Channel, MemoryChannel};
pub use codec::{FrameWidener, SequenceCounter, SequenceTracker};
pub use input::{CodecError, FrameEnvelope, Input};
pub use lockstep::Lockstep;
pub use session::Session;
pub use timesync::{SyncMessage, TimeSync, TimeSyncError};

#[derive(Debug, Error)]
pub enum NetError {
    /// A transmission envelope was lost or reordered; the stream is unusable
    #[error("sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u16, got: u16 },
    #[error("frame envelope of {size} bytes exceeds {max}")]
    Oversized { size: usize, max: usize },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    TimeSync(#[from] TimeSyncError),
    #[error("channel closed")]
    Disconnected,
}

impl NetError {
    /// Errors after which the connection cannot continue
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NetError::SequenceGap { .. } | NetError::TimeSync(_) | NetError::Disconnected
        )
    }
}
