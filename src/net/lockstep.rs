//! Dual-world lockstep reconciliation
//!
//! Each peer runs two copies of the simulation:
//!
//! - `game` is predictive. Local inputs apply immediately and it steps every
//!   frame, guessing that the remote player did nothing.
//! - `sync` is the reference. It only steps frames whose remote inputs have
//!   arrived, applying both players' inputs in player order.
//!
//! When `sync` learns something `game` could not have known, `game` is rebuilt
//! from `sync` and extrapolated back to the present with the local inputs
//! still in flight. Bodies that jumped get a smoothing offset so the correction
//! is eased in visually.
//!
//! Per frame the caller should: `receive` what arrived, `record_input`,
//! `step_game`, `flush` (send the packet if one is returned), then `update`.

use std::collections::{BTreeMap, VecDeque};

use glam::DVec2;

use super::NetError;
use super::codec::{self, FrameWidener, Received, SequenceCounter, SequenceTracker};
use super::input::{FrameEnvelope, Input};
use crate::sim::{Key, Smoothing, StepMode, World, apply_input, step, step_with};

#[derive(Debug, Clone)]
pub struct Lockstep {
    /// Predictive world, drawn every frame
    pub game: World,
    /// Reference world, advanced only with both players' inputs
    pub sync: World,
    player: u8,
    dt: f64,
    frames_per_packet: usize,
    max_frame: usize,
    interpolation_frames: u32,
    snap_distance: f64,

    /// Local inputs not yet applied to `game`
    immediate: Vec<Input>,
    /// Local inputs by frame, until `sync` consumes them
    local: VecDeque<(u64, Input)>,
    /// Remote inputs by frame, until `sync` consumes them
    remote: VecDeque<(u64, Input)>,

    /// Records for the frame being assembled
    open: FrameEnvelope,
    /// Frame `game` just stepped whose envelope is still open
    stepped: Option<u64>,
    /// Encoded frame envelopes waiting for a packet
    closed: Vec<Vec<u8>>,

    outgoing: SequenceCounter,
    incoming: SequenceTracker,
    widener: FrameWidener,
    /// Latest remote frame fully received
    remote_ack: Option<u64>,
    replay_needed: bool,

    next_ping: u16,
    pings: BTreeMap<u16, u64>,
    rtt_frames: Option<u64>,
    /// Pong replies waiting for room in a frame envelope
    pongs: VecDeque<u16>,
}

impl Lockstep {
    /// Both peers must start from identical worlds
    pub fn new(world: World, player: u8) -> Self {
        let s = &world.settings;
        Self {
            player,
            dt: s.sim_dt,
            frames_per_packet: s.frames_per_packet.max(1),
            max_frame: s.max_frame_envelope.min(u8::MAX as usize),
            interpolation_frames: s.interpolation_frames,
            snap_distance: s.snap_distance,
            immediate: Vec::new(),
            local: VecDeque::new(),
            remote: VecDeque::new(),
            open: FrameEnvelope::default(),
            stepped: None,
            closed: Vec::new(),
            outgoing: SequenceCounter::new(s.max_frame_envelope),
            incoming: SequenceTracker::new(),
            widener: FrameWidener::starting_at(world.frame),
            remote_ack: None,
            replay_needed: false,
            next_ping: 0,
            pings: BTreeMap::new(),
            rtt_frames: None,
            pongs: VecDeque::new(),
            game: world.clone(),
            sync: world,
        }
    }

    pub fn player(&self) -> u8 {
        self.player
    }

    /// Frames `game` is ahead of `sync`
    pub fn ahead(&self) -> u64 {
        self.game.frame.saturating_sub(self.sync.frame)
    }

    pub fn remote_ack(&self) -> Option<u64> {
        self.remote_ack
    }

    /// Last measured in-band round trip, in frames
    pub fn rtt_frames(&self) -> Option<u64> {
        self.rtt_frames
    }

    pub fn pending_local(&self) -> usize {
        self.local.len()
    }

    fn close_frame(&mut self) {
        let Some(frame) = self.stepped.take() else {
            return;
        };
        let mut envelope = std::mem::take(&mut self.open);
        envelope.frame = frame as u16;
        // Control replies ride outside the input budget and spill into later frames
        while let Some(&id) = self.pongs.front() {
            let pong = Input::Pong { id };
            if envelope.encoded_len() + pong.encoded_len() > self.max_frame {
                break;
            }
            envelope.inputs.push(pong);
            self.pongs.pop_front();
        }
        self.closed.push(envelope.encode());
    }

    /// Record a local input for the current frame
    ///
    /// The input is rounded to wire precision first so both peers apply the
    /// same value.
    pub fn record_input(&mut self, input: Input) -> Result<(), NetError> {
        self.close_frame();
        let input = input.quantized();
        let size = self.open.encoded_len() + input.encoded_len();
        if size > self.max_frame {
            return Err(NetError::Oversized {
                size,
                max: self.max_frame,
            });
        }
        self.open.inputs.push(input);
        if input.is_game_input() {
            self.immediate.push(input);
            self.local.push_back((self.game.frame, input));
        }
        Ok(())
    }

    /// Apply pending local inputs and advance the predictive world
    pub fn step_game(&mut self) {
        self.close_frame();
        for input in self.immediate.drain(..) {
            apply_input(&mut self.game, &input);
        }
        self.stepped = Some(self.game.frame);
        step(&mut self.game, self.dt);
    }

    /// Close the frame just stepped; returns a packet every `frames_per_packet`
    pub fn flush(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        self.close_frame();
        if self.closed.len() < self.frames_per_packet {
            return Ok(None);
        }
        let packet = self.outgoing.wrap(&self.closed)?;
        self.closed.clear();
        Ok(Some(packet))
    }

    /// Start an in-band round-trip probe
    pub fn ping(&mut self) -> Result<u16, NetError> {
        let id = self.next_ping;
        self.record_input(Input::Ping { id })?;
        self.next_ping = self.next_ping.wrapping_add(1);
        self.pings.insert(id, self.game.frame);
        Ok(id)
    }

    fn on_pong(&mut self, id: u16) {
        match self.pings.remove(&id) {
            Some(sent) => {
                let rtt = self.game.frame.saturating_sub(sent);
                log::debug!("ping {}: {} frames", id, rtt);
                self.rtt_frames = Some(rtt);
            }
            None => log::warn!("pong {} without a matching ping", id),
        }
    }

    /// Accept one transmission envelope from the peer
    ///
    /// Once the sequence number is accepted nothing in the packet can fail:
    /// malformed frame envelopes are logged and skipped.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<(), NetError> {
        let (sequence, frames) = codec::unwrap(bytes)?;
        if self.incoming.check(sequence)? == Received::Duplicate {
            return Ok(());
        }

        for chunk in frames {
            let envelope = match FrameEnvelope::decode(chunk) {
                Ok(envelope) => envelope,
                Err(err) => {
                    log::warn!("packet {}: {}", sequence, err);
                    continue;
                }
            };
            let frame = self.widener.widen(envelope.frame);
            for input in envelope.inputs {
                match input {
                    Input::Ping { id } => self.pongs.push_back(id),
                    Input::Pong { id } => self.on_pong(id),
                    _ => self.remote.push_back((frame, input)),
                }
            }
            self.remote_ack = Some(self.remote_ack.map_or(frame, |ack| ack.max(frame)));
        }
        Ok(())
    }

    fn take_frame(queue: &mut VecDeque<(u64, Input)>, frame: u64) -> Vec<Input> {
        let mut inputs = Vec::new();
        while let Some(&(at, input)) = queue.front() {
            if at > frame {
                break;
            }
            queue.pop_front();
            if at < frame {
                log::warn!("dropping stale input for frame {} at {}", at, frame);
                continue;
            }
            inputs.push(input);
        }
        inputs
    }

    fn puck_heading(world: &World) -> Option<bool> {
        let key = world.primary_puck()?;
        let puck = world.pucks.get(key).ok()?;
        (puck.velocity.y != 0.0).then_some(puck.velocity.y > 0.0)
    }

    /// Advance `sync` over every frame both players have confirmed
    pub fn forward(&mut self) {
        let Some(ack) = self.remote_ack else {
            return;
        };
        while self.sync.frame <= ack && self.sync.frame < self.game.frame {
            let frame = self.sync.frame;
            let local = Self::take_frame(&mut self.local, frame);
            let remote = Self::take_frame(&mut self.remote, frame);
            if !remote.is_empty() {
                self.replay_needed = true;
            }

            let (first, second) = if self.player == 0 {
                (&local, &remote)
            } else {
                (&remote, &local)
            };
            for input in first.iter().chain(second) {
                apply_input(&mut self.sync, input);
            }

            let before = Self::puck_heading(&self.sync);
            step(&mut self.sync, self.dt);
            self.sync.take_events();
            let after = Self::puck_heading(&self.sync);
            if before.is_some() && after.is_some() && before != after {
                self.replay_needed = true;
            }
        }
    }

    /// Rebuild `game` from `sync` and extrapolate back to the present
    pub fn replay(&mut self) {
        let frame = self.game.frame;
        let ahead = self.ahead();
        let rendered: BTreeMap<Key, DVec2> = self
            .game
            .bodies()
            .map(|(key, body)| (key, body.render_position()))
            .collect();
        let events = self.game.take_events();

        self.game.clone_from(&self.sync);
        self.game.events = events;
        for offset in 0..ahead {
            let at = self.sync.frame + offset;
            for (_, input) in self.local.iter().filter(|(f, _)| *f == at) {
                apply_input(&mut self.game, input);
            }
            step_with(&mut self.game, self.dt, StepMode::Extrapolate);
        }
        debug_assert_eq!(self.game.frame, frame);

        let (frames, snap) = (self.interpolation_frames, self.snap_distance);
        for (key, body) in self.game.bodies_mut() {
            let Some(before) = rendered.get(&key) else {
                continue;
            };
            let offset = *before - body.current;
            let distance = offset.length();
            body.smoothing = (distance > 1e-6 && distance <= snap)
                .then(|| Smoothing::new(offset, frames));
        }
        log::debug!("replayed {} frames from {}", ahead, self.sync.frame);
    }

    /// Forward the reference world and replay if it diverged
    pub fn update(&mut self) {
        self.forward();
        if self.replay_needed {
            self.replay_needed = false;
            self.replay();
        }
    }

    /// Abort path: discard all in-flight state and restart from `world`
    pub fn resync(&mut self, world: World) {
        log::info!("resync at frame {}", world.frame);
        self.widener.reset_to(world.frame);
        self.game = world.clone();
        self.sync = world;
        self.immediate.clear();
        self.local.clear();
        self.remote.clear();
        self.open = FrameEnvelope::default();
        self.stepped = None;
        self.closed.clear();
        self.outgoing.reset();
        self.incoming.reset();
        self.remote_ack = None;
        self.replay_needed = false;
        self.pings.clear();
        self.pongs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::SIM_DT;
    use crate::settings::Settings;

    fn started(seed: u64) -> World {
        let mut world = World::new(seed, Settings::default());
        world.start().unwrap();
        world
    }

    fn script(player: u8, frame: u64) -> Option<Input> {
        if frame >= 240 {
            return None;
        }
        match (frame + player as u64 * 3) % 11 {
            0 => Some(Input::Move { player, dx: 7.0 }),
            5 => Some(Input::Move { player, dx: -4.5 }),
            _ => None,
        }
    }

    /// Run both peers against a reference world that sees every input on time
    fn run(delay: u64, frames: u64) -> ([Lockstep; 2], World) {
        let base = started(77);
        let mut reference = base.clone();
        let mut peers = [Lockstep::new(base.clone(), 0), Lockstep::new(base, 1)];
        let mut wire: [VecDeque<(u64, Vec<u8>)>; 2] = Default::default();

        for frame in 0..frames {
            for player in 0..2 {
                if let Some(input) = script(player, frame) {
                    apply_input(&mut reference, &input.quantized());
                }
            }
            step(&mut reference, SIM_DT);

            for p in 0..2 {
                while wire[p].front().is_some_and(|(at, _)| *at <= frame) {
                    let (_, packet) = wire[p].pop_front().unwrap();
                    peers[p].receive(&packet).unwrap();
                }
                if let Some(input) = script(p as u8, frame) {
                    peers[p].record_input(input).unwrap();
                }
                peers[p].step_game();
                if let Some(packet) = peers[p].flush().unwrap() {
                    wire[1 - p].push_back((frame + delay, packet));
                }
                peers[p].update();
            }
        }
        (peers, reference)
    }

    #[test]
    fn test_replay_converges_to_on_time_inputs() {
        let (peers, reference) = run(6, 420);
        for peer in &peers {
            assert_eq!(peer.game.frame, reference.frame);
            assert_eq!(peer.game.hash(), reference.hash());
            assert!(peer.sync.frame >= reference.frame - 8);
            assert_eq!(peer.pending_local(), 0);
        }
    }

    #[test]
    fn test_without_delay_sync_keeps_up() {
        let (peers, reference) = run(0, 120);
        for peer in &peers {
            assert_eq!(peer.game.hash(), reference.hash());
            assert!(peer.ahead() <= 1);
        }
    }

    #[test]
    fn test_replay_keeps_frame_count_and_smooths() {
        let mut peer = Lockstep::new(started(5), 0);
        for _ in 0..70 {
            peer.step_game();
        }
        // Pretend the remote paddle moved three frames ago
        let mut remote = Lockstep::new(started(5), 1);
        for frame in 0..67 {
            if frame == 66 {
                remote.record_input(Input::Move { player: 1, dx: 40.0 }).unwrap();
            }
            remote.step_game();
            let packet = remote.flush().unwrap().unwrap();
            peer.receive(&packet).unwrap();
        }
        peer.update();

        assert_eq!(peer.game.frame, 70);
        assert_eq!(peer.sync.frame, 67);
        let paddle = peer.game.paddle_of(1).unwrap();
        let body = peer.game.paddles.get(paddle).unwrap();
        let smoothing = body.smoothing.unwrap();
        assert!((smoothing.offset.x + 40.0).abs() < 1e-9);
        assert!((body.render_position().x - (body.current.x - 40.0)).abs() < 1e-9);
    }

    #[test]
    fn test_oversized_input_is_rejected_before_queueing() {
        let settings = Settings {
            max_frame_envelope: 12,
            ..Settings::default()
        };
        let mut world = World::new(1, settings);
        world.start().unwrap();
        let mut peer = Lockstep::new(world, 0);

        peer.record_input(Input::Move { player: 0, dx: 1.0 }).unwrap();
        let err = peer
            .record_input(Input::Move { player: 0, dx: 1.0 })
            .unwrap_err();
        assert!(matches!(err, NetError::Oversized { size: 22, max: 12 }));
        assert_eq!(peer.pending_local(), 1);
    }

    #[test]
    fn test_duplicate_ignored_gap_fatal() {
        let mut a = Lockstep::new(started(2), 0);
        let mut b = Lockstep::new(started(2), 1);
        let mut packets = Vec::new();
        for _ in 0..3 {
            a.step_game();
            packets.push(a.flush().unwrap().unwrap());
        }
        b.receive(&packets[0]).unwrap();
        b.receive(&packets[0]).unwrap();
        assert_eq!(b.remote_ack(), Some(0));
        let err = b.receive(&packets[2]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_ping_round_trip_in_frames() {
        let mut a = Lockstep::new(started(3), 0);
        let mut b = Lockstep::new(started(3), 1);
        a.ping().unwrap();
        let mut to_b: VecDeque<(u64, Vec<u8>)> = VecDeque::new();
        let mut to_a: VecDeque<(u64, Vec<u8>)> = VecDeque::new();
        for frame in 0..20u64 {
            while to_a.front().is_some_and(|(at, _)| *at <= frame) {
                a.receive(&to_a.pop_front().unwrap().1).unwrap();
            }
            while to_b.front().is_some_and(|(at, _)| *at <= frame) {
                b.receive(&to_b.pop_front().unwrap().1).unwrap();
            }
            a.step_game();
            b.step_game();
            if let Some(packet) = a.flush().unwrap() {
                to_b.push_back((frame + 3, packet));
            }
            if let Some(packet) = b.flush().unwrap() {
                to_a.push_back((frame + 3, packet));
            }
        }
        assert_eq!(a.rtt_frames(), Some(6));
    }

    #[test]
    fn test_pong_waits_for_room_without_losing_remote_inputs() {
        let settings = Settings {
            max_frame_envelope: 12,
            frames_per_packet: 2,
            ..Settings::default()
        };
        let mut world = World::new(8, settings);
        world.start().unwrap();
        let mut a = Lockstep::new(world.clone(), 0);
        let mut b = Lockstep::new(world, 1);

        b.ping().unwrap();
        b.step_game();
        assert!(b.flush().unwrap().is_none());
        b.record_input(Input::Move { player: 1, dx: 30.0 }).unwrap();
        b.step_game();
        let packet = b.flush().unwrap().unwrap();

        // Fills A's open envelope to the limit
        a.record_input(Input::Move { player: 0, dx: 1.0 }).unwrap();
        a.receive(&packet).unwrap();
        assert_eq!(a.remote_ack(), Some(1));
        assert_eq!(a.remote.len(), 1);

        a.step_game();
        assert!(a.flush().unwrap().is_none());
        a.step_game();
        let reply = a.flush().unwrap().unwrap();
        a.update();
        assert_eq!(a.sync.frame, 2);

        let x = |world: &World| {
            world
                .paddles
                .get(world.paddle_of(1).unwrap())
                .unwrap()
                .current
                .x
        };
        assert!((x(&a.sync) - x(&b.game)).abs() < 1e-9);
        assert!((x(&a.game) - x(&b.game)).abs() < 1e-9);

        // The pong did not fit in frame 0 and went out with frame 1
        b.receive(&reply).unwrap();
        assert_eq!(b.rtt_frames(), Some(2));
    }

    #[test]
    fn test_malformed_frame_keeps_rest_of_packet() {
        let mut peer = Lockstep::new(started(2), 0);
        let frame = |n: u64, inputs: Vec<Input>| FrameEnvelope {
            frame: n as u16,
            inputs,
        }
        .encode();
        let first = frame(0, vec![Input::Move { player: 1, dx: 3.0 }]);
        let mut broken = frame(1, vec![Input::Move { player: 1, dx: 2.0 }]);
        broken.extend_from_slice(&[0x7F, 0x01]);
        let truncated = vec![0x02];
        let last = frame(2, vec![Input::Move { player: 1, dx: -1.0 }]);

        let mut outgoing = SequenceCounter::new(u8::MAX as usize);
        let packet = outgoing.wrap(&[first, broken, truncated, last]).unwrap();
        peer.receive(&packet).unwrap();

        assert_eq!(peer.remote_ack(), Some(2));
        let frames: Vec<u64> = peer.remote.iter().map(|(f, _)| *f).collect();
        assert_eq!(frames, vec![0, 1, 2]);
    }

    #[test]
    fn test_resync_resets_everything() {
        let mut peer = Lockstep::new(started(4), 0);
        peer.record_input(Input::Move { player: 0, dx: 2.0 }).unwrap();
        peer.step_game();
        peer.flush().unwrap();

        let fresh = started(9);
        let hash = fresh.hash();
        peer.resync(fresh);
        assert_eq!(peer.game.hash(), hash);
        assert_eq!(peer.sync.hash(), hash);
        assert_eq!(peer.pending_local(), 0);
        assert_eq!(peer.remote_ack(), None);
        assert_eq!(peer.ahead(), 0);
    }
}
