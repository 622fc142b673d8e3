//! Message channel boundary
//!
//! The real transport (WebRTC data channel, UDP with a reliability layer, ...)
//! lives outside this crate. It only has to deliver whole messages in order.

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};

use super::NetError;

/// An ordered, message-oriented link to the peer
pub trait Channel {
    fn send(&mut self, bytes: Vec<u8>) -> Result<(), NetError>;

    /// Next received message, if one is waiting
    fn recv(&mut self) -> Result<Option<Vec<u8>>, NetError>;
}

/// In-process channel pair, optionally delaying delivery by a number of polls
#[derive(Debug)]
pub struct MemoryChannel {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    delay: usize,
    /// Messages received from the mpsc side but still being held back
    held: VecDeque<(usize, Vec<u8>)>,
    polls: usize,
}

impl MemoryChannel {
    /// Two connected endpoints
    pub fn pair() -> (Self, Self) {
        Self::pair_with_delay(0)
    }

    /// Two connected endpoints; each message becomes visible `delay` calls to
    /// `recv` after it was first seen
    pub fn pair_with_delay(delay: usize) -> (Self, Self) {
        let (a_tx, b_rx) = channel();
        let (b_tx, a_rx) = channel();
        let endpoint = |tx, rx| Self {
            tx,
            rx,
            delay,
            held: VecDeque::new(),
            polls: 0,
        };
        (endpoint(a_tx, a_rx), endpoint(b_tx, b_rx))
    }
}

impl Channel for MemoryChannel {
    fn send(&mut self, bytes: Vec<u8>) -> Result<(), NetError> {
        self.tx.send(bytes).map_err(|_| NetError::Disconnected)
    }

    fn recv(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        self.polls += 1;
        loop {
            match self.rx.try_recv() {
                Ok(bytes) => self.held.push_back((self.polls + self.delay, bytes)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.held.is_empty() {
                        return Err(NetError::Disconnected);
                    }
                    break;
                }
            }
        }
        match self.held.front() {
            Some((ready, _)) if *ready <= self.polls => {
                Ok(self.held.pop_front().map(|(_, bytes)| bytes))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_delivers_in_order() {
        let (mut a, mut b) = MemoryChannel::pair();
        a.send(vec![1]).unwrap();
        a.send(vec![2]).unwrap();
        assert_eq!(b.recv().unwrap(), Some(vec![1]));
        assert_eq!(b.recv().unwrap(), Some(vec![2]));
        assert_eq!(b.recv().unwrap(), None);
    }

    #[test]
    fn test_delay_holds_messages() {
        let (mut a, mut b) = MemoryChannel::pair_with_delay(2);
        a.send(vec![9]).unwrap();
        assert_eq!(b.recv().unwrap(), None);
        assert_eq!(b.recv().unwrap(), None);
        assert_eq!(b.recv().unwrap(), Some(vec![9]));
    }

    #[test]
    fn test_dropped_peer_disconnects() {
        let (mut a, b) = MemoryChannel::pair();
        drop(b);
        assert!(matches!(a.send(vec![0]), Err(NetError::Disconnected)));
        assert!(matches!(a.recv(), Err(NetError::Disconnected)));
    }
}
