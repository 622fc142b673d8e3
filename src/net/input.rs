//! Input records and frame envelopes
//!
//! Record layout (little-endian), one `i8` tag followed by its payload:
//!
//! | tag | input | payload              |
//! |-----|-------|----------------------|
//! | 1   | MOVE  | `u8` player, `f64` dx |
//! | 2   | DIED  | `u8` player, `f64` x  |
//! | 3   | HIT   | `f32` x, `f32` vx     |
//! | 4   | MISS  | `f32` x               |
//! | -1  | PING  | `u16` id              |
//! | -2  | PONG  | `u16` id              |
//!
//! A frame envelope is a `u16` frame number followed by zero or more records.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("truncated: needed {needed} bytes, {available} left")]
    Truncated { needed: usize, available: usize },
    #[error("unknown input tag {0}")]
    UnknownTag(i8),
    #[error("frame of {len} bytes does not fit a length prefix")]
    FrameTooLong { len: usize },
}

/// A player action (or transport probe) stamped onto a frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Input {
    /// Shift a paddle horizontally
    Move { player: u8, dx: f64 },
    /// `player` let the puck through at `x`
    Died { player: u8, x: f64 },
    /// Puck struck at `x`, leaving with horizontal speed `velocity`
    Hit { x: f64, velocity: f64 },
    /// Puck passed a paddle at `x`
    Miss { x: f64 },
    Ping { id: u16 },
    Pong { id: u16 },
}

const MOVE: i8 = 1;
const DIED: i8 = 2;
const HIT: i8 = 3;
const MISS: i8 = 4;
const PING: i8 = -1;
const PONG: i8 = -2;

fn take<const N: usize>(inp: &mut &[u8]) -> Result<[u8; N], CodecError> {
    if inp.len() < N {
        return Err(CodecError::Truncated {
            needed: N,
            available: inp.len(),
        });
    }
    let (head, rest) = inp.split_at(N);
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    *inp = rest;
    Ok(out)
}

impl Input {
    pub fn tag(&self) -> i8 {
        match self {
            Input::Move { .. } => MOVE,
            Input::Died { .. } => DIED,
            Input::Hit { .. } => HIT,
            Input::Miss { .. } => MISS,
            Input::Ping { .. } => PING,
            Input::Pong { .. } => PONG,
        }
    }

    /// True for inputs that change a World (not probes)
    pub fn is_game_input(&self) -> bool {
        !matches!(self, Input::Ping { .. } | Input::Pong { .. })
    }

    /// Round to wire precision so local and remote peers apply identical values
    pub fn quantized(self) -> Self {
        match self {
            Input::Hit { x, velocity } => Input::Hit {
                x: x as f32 as f64,
                velocity: velocity as f32 as f64,
            },
            Input::Miss { x } => Input::Miss { x: x as f32 as f64 },
            other => other,
        }
    }

    /// Bytes this record occupies on the wire, tag included
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Input::Move { .. } | Input::Died { .. } => 9,
            Input::Hit { .. } => 8,
            Input::Miss { .. } => 4,
            Input::Ping { .. } | Input::Pong { .. } => 2,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tag().to_le_bytes());
        match *self {
            Input::Move { player, dx } => {
                out.push(player);
                out.extend_from_slice(&dx.to_le_bytes());
            }
            Input::Died { player, x } => {
                out.push(player);
                out.extend_from_slice(&x.to_le_bytes());
            }
            Input::Hit { x, velocity } => {
                out.extend_from_slice(&(x as f32).to_le_bytes());
                out.extend_from_slice(&(velocity as f32).to_le_bytes());
            }
            Input::Miss { x } => out.extend_from_slice(&(x as f32).to_le_bytes()),
            Input::Ping { id } | Input::Pong { id } => out.extend_from_slice(&id.to_le_bytes()),
        }
    }

    /// Decode one record, advancing `inp` past it
    pub fn decode(inp: &mut &[u8]) -> Result<Self, CodecError> {
        let tag = i8::from_le_bytes(take::<1>(inp)?);
        let input = match tag {
            MOVE => Input::Move {
                player: take::<1>(inp)?[0],
                dx: f64::from_le_bytes(take::<8>(inp)?),
            },
            DIED => Input::Died {
                player: take::<1>(inp)?[0],
                x: f64::from_le_bytes(take::<8>(inp)?),
            },
            HIT => Input::Hit {
                x: f32::from_le_bytes(take::<4>(inp)?) as f64,
                velocity: f32::from_le_bytes(take::<4>(inp)?) as f64,
            },
            MISS => Input::Miss {
                x: f32::from_le_bytes(take::<4>(inp)?) as f64,
            },
            PING => Input::Ping {
                id: u16::from_le_bytes(take::<2>(inp)?),
            },
            PONG => Input::Pong {
                id: u16::from_le_bytes(take::<2>(inp)?),
            },
            other => return Err(CodecError::UnknownTag(other)),
        };
        Ok(input)
    }
}

/// All inputs one peer recorded for one frame
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameEnvelope {
    /// Low 16 bits of the frame number
    pub frame: u16,
    pub inputs: Vec<Input>,
}

impl FrameEnvelope {
    pub fn new(frame: u64) -> Self {
        Self {
            frame: frame as u16,
            inputs: Vec::new(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        2 + self.inputs.iter().map(Input::encoded_len).sum::<usize>()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.frame.to_le_bytes());
        for input in &self.inputs {
            input.encode(&mut out);
        }
        out
    }

    /// Decode a frame envelope
    ///
    /// Records have no length prefix, so a malformed record discards the rest
    /// of the envelope. The records before it are kept.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut inp = bytes;
        let frame = u16::from_le_bytes(take::<2>(&mut inp)?);
        let mut inputs = Vec::new();
        while !inp.is_empty() {
            match Input::decode(&mut inp) {
                Ok(input) => inputs.push(input),
                Err(err) => {
                    log::warn!(
                        "frame {}: {}; dropping {} trailing bytes",
                        frame,
                        err,
                        inp.len()
                    );
                    break;
                }
            }
        }
        Ok(Self { frame, inputs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_record_layout() {
        let mut out = Vec::new();
        Input::Move { player: 1, dx: 2.5 }.encode(&mut out);
        assert_eq!(out.len(), 10);
        assert_eq!(out[0], 1);
        assert_eq!(out[1], 1);
        assert_eq!(f64::from_le_bytes(out[2..10].try_into().unwrap()), 2.5);

        let mut out = Vec::new();
        Input::Pong { id: 0x0102 }.encode(&mut out);
        assert_eq!(out, vec![0xFE, 0x02, 0x01]);
    }

    #[test]
    fn test_encoded_len_matches_encoding() {
        let inputs = [
            Input::Move { player: 0, dx: 1.0 },
            Input::Died { player: 1, x: 3.0 },
            Input::Hit {
                x: 1.0,
                velocity: 2.0,
            },
            Input::Miss { x: 4.0 },
            Input::Ping { id: 9 },
            Input::Pong { id: 9 },
        ];
        for input in inputs {
            let mut out = Vec::new();
            input.encode(&mut out);
            assert_eq!(out.len(), input.encoded_len(), "{:?}", input);
        }
    }

    #[test]
    fn test_hit_and_miss_travel_as_f32() {
        let hit = Input::Hit {
            x: 0.1,
            velocity: -7.3,
        };
        let mut out = Vec::new();
        hit.encode(&mut out);
        let decoded = Input::decode(&mut out.as_slice()).unwrap();
        assert_ne!(decoded, hit);
        assert_eq!(decoded, hit.quantized());
    }

    #[test]
    fn test_unknown_tag_drops_rest_of_envelope() {
        let mut envelope = FrameEnvelope::new(5);
        envelope.inputs.push(Input::Ping { id: 1 });
        let mut bytes = envelope.encode();
        bytes.extend_from_slice(&[0x7F, 1, 2, 3]);
        Input::Pong { id: 2 }.encode(&mut bytes);

        let decoded = FrameEnvelope::decode(&bytes).unwrap();
        assert_eq!(decoded.frame, 5);
        assert_eq!(decoded.inputs, vec![Input::Ping { id: 1 }]);
    }

    #[test]
    fn test_truncated_header() {
        assert_eq!(
            FrameEnvelope::decode(&[1]),
            Err(CodecError::Truncated {
                needed: 2,
                available: 1
            })
        );
    }

    fn input_strategy() -> impl Strategy<Value = Input> {
        prop_oneof![
            (any::<u8>(), -1e6..1e6f64).prop_map(|(player, dx)| Input::Move { player, dx }),
            (any::<u8>(), -1e6..1e6f64).prop_map(|(player, x)| Input::Died { player, x }),
            (-1e4..1e4f64, -1e3..1e3f64).prop_map(|(x, velocity)| Input::Hit { x, velocity }),
            (-1e4..1e4f64).prop_map(|x| Input::Miss { x }),
            any::<u16>().prop_map(|id| Input::Ping { id }),
            any::<u16>().prop_map(|id| Input::Pong { id }),
        ]
    }

    proptest! {
        #[test]
        fn prop_frame_envelope_round_trip(
            frame in any::<u16>(),
            inputs in prop::collection::vec(input_strategy(), 0..20),
        ) {
            let envelope = FrameEnvelope {
                frame,
                inputs: inputs.iter().map(|i| i.quantized()).collect(),
            };
            let bytes = envelope.encode();
            prop_assert_eq!(bytes.len(), envelope.encoded_len());
            prop_assert_eq!(FrameEnvelope::decode(&bytes).unwrap(), envelope);
        }
    }
}
