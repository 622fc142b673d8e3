//! World state and core simulation types
//!
//! Everything two peers must agree on lives in [`World`]: the entity arenas,
//! the seeded RNG, the frame counter, the lifecycle phase and the pending
//! gameplay actions. A World is a plain value; cloning it yields an
//! independently advanceable copy with identical keys.

use std::collections::BTreeMap;

use glam::DVec2;
use rand::{Rng, RngCore, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::arena::{Arena, ArenaError, Key};
use super::body::{Body, BodyFlags, BodyKind, BounceModel, ExtraKind};
use super::geom::Polygon;
use super::schedule::Actions;
use crate::consts::PLAYERS;
use crate::quantize;
use crate::settings::Settings;

/// Lifecycle of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GamePhase {
    /// Nothing set up yet
    Init,
    /// Attract mode: physics runs, nothing scores
    Preview,
    /// Round set up, waiting for the serve
    Starting,
    /// Active gameplay
    Playing,
    /// Game is paused
    Paused,
    /// A point was scored, next round pending
    NextRound,
    /// A level was won, next level pending
    NextLevel,
    /// Match ended
    GameOver,
}

impl GamePhase {
    /// Only these phases run collision and integration
    pub fn runs_physics(self) -> bool {
        matches!(self, GamePhase::Playing | GamePhase::Preview)
    }

    pub fn can_transition(self, to: GamePhase) -> bool {
        use GamePhase::*;
        matches!(
            (self, to),
            (Init, Preview)
                | (Init, Starting)
                | (Preview, Starting)
                | (Starting, Playing)
                | (Playing, Paused)
                | (Paused, Playing)
                | (Playing, NextRound)
                | (Playing, NextLevel)
                | (Playing, GameOver)
                | (NextRound, Starting)
                | (NextLevel, Starting)
                | (GameOver, Init)
        )
    }

    fn tag(self) -> u64 {
        self as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhaseError {
    #[error("illegal phase transition {from:?} -> {to:?}")]
    Illegal { from: GamePhase, to: GamePhase },
}

/// Gameplay work deferred to a later frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameAction {
    /// Launch the primary puck (Starting -> Playing)
    Serve,
    /// Tear down and set up the next round or level
    BeginRound,
    /// Drop a random extra onto the field
    SpawnExtra,
    /// Remove a timed body
    Expire(Key),
}

impl GameAction {
    fn tag(self) -> u64 {
        match self {
            GameAction::Serve => 1,
            GameAction::BeginRound => 2,
            GameAction::SpawnExtra => 3,
            GameAction::Expire(key) => 4 ^ ((key.0 as u64) << 8),
        }
    }
}

/// Presentation events (sound, effects, HUD); never fed back into physics
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    Bounce { puck: Key, other: Key, kind: BodyKind },
    Goal { loser: u8, x: f64 },
    Collected { kind: ExtraKind, player: Option<u8> },
    Destroyed { key: Key },
    PhaseChanged { from: GamePhase, to: GamePhase },
}

/// Complete simulation state (deterministic, serializable)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct World {
    /// Match seed for reproducibility
    pub seed: u64,
    pub rng: Pcg32,
    /// Completed steps
    pub frame: u64,
    pub phase: GamePhase,
    pub level: u32,
    pub round: u32,
    pub score: [u32; PLAYERS],
    /// Player the next serve heads toward
    pub receiver: u8,
    /// Current round's base puck speed
    pub puck_speed: f64,

    pub pucks: Arena<Body>,
    pub paddles: Arena<Body>,
    pub obstacles: Arena<Body>,
    pub extras: Arena<Body>,
    pub forces: Arena<Body>,
    pub shields: Arena<Body>,

    /// Last paddle to strike each puck
    pub last_hit: BTreeMap<Key, Key>,
    /// Bounce count per puck
    pub bounces: BTreeMap<Key, u32>,
    /// Paddle key per player
    pub players: [Option<Key>; PLAYERS],

    pub actions: Actions<GameAction>,
    pub settings: Settings,

    /// Events since the last `take_events`
    #[serde(skip)]
    pub events: Vec<GameEvent>,
    next_key: u32,
}

impl World {
    pub fn new(seed: u64, settings: Settings) -> Self {
        Self {
            seed,
            rng: Pcg32::seed_from_u64(seed),
            frame: 0,
            phase: GamePhase::Init,
            level: 0,
            round: 0,
            score: [0; PLAYERS],
            receiver: (seed % PLAYERS as u64) as u8,
            puck_speed: settings.puck_start_speed,
            pucks: Arena::new(),
            paddles: Arena::new(),
            obstacles: Arena::new(),
            extras: Arena::new(),
            forces: Arena::new(),
            shields: Arena::new(),
            last_hit: BTreeMap::new(),
            bounces: BTreeMap::new(),
            players: [None; PLAYERS],
            actions: Actions::new(),
            settings,
            events: Vec::new(),
            next_key: 1,
        }
    }

    /// Allocate a new entity key (never reused, survives resets)
    pub fn next_key(&mut self) -> Key {
        let key = Key(self.next_key);
        self.next_key += 1;
        key
    }

    pub fn store(&self, kind: BodyKind) -> &Arena<Body> {
        match kind {
            BodyKind::Puck => &self.pucks,
            BodyKind::Paddle => &self.paddles,
            BodyKind::Obstacle => &self.obstacles,
            BodyKind::Extra(_) => &self.extras,
            BodyKind::Force => &self.forces,
            BodyKind::Shield => &self.shields,
        }
    }

    pub fn store_mut(&mut self, kind: BodyKind) -> &mut Arena<Body> {
        match kind {
            BodyKind::Puck => &mut self.pucks,
            BodyKind::Paddle => &mut self.paddles,
            BodyKind::Obstacle => &mut self.obstacles,
            BodyKind::Extra(_) => &mut self.extras,
            BodyKind::Force => &mut self.forces,
            BodyKind::Shield => &mut self.shields,
        }
    }

    fn stores(&self) -> [&Arena<Body>; 6] {
        [
            &self.pucks,
            &self.paddles,
            &self.obstacles,
            &self.extras,
            &self.forces,
            &self.shields,
        ]
    }

    /// Every body in every arena
    pub fn bodies(&self) -> impl Iterator<Item = (Key, &Body)> {
        self.stores().into_iter().flat_map(|store| store.iter())
    }

    pub fn bodies_mut(&mut self) -> impl Iterator<Item = (Key, &mut Body)> {
        [
            &mut self.pucks,
            &mut self.paddles,
            &mut self.obstacles,
            &mut self.extras,
            &mut self.forces,
            &mut self.shields,
        ]
        .into_iter()
        .flat_map(|store| store.iter_mut())
    }

    /// Insert a body into the arena for its kind
    pub fn add(&mut self, body: Body) -> Key {
        let key = self.next_key();
        self.store_mut(body.kind).set(key, body);
        key
    }

    /// Look a body up in whichever arena holds it
    pub fn body(&self, key: Key) -> Result<&Body, ArenaError> {
        self.stores()
            .into_iter()
            .find_map(|store| store.get(key).ok())
            .ok_or(ArenaError::NotFound(key))
    }

    pub fn body_mut(&mut self, key: Key) -> Result<&mut Body, ArenaError> {
        let kind = self.body(key)?.kind;
        self.store_mut(kind).get_mut(key)
    }

    /// Remove a body right away (never call while iterating a store)
    pub fn remove(&mut self, key: Key) -> Option<Body> {
        let kind = self.body(key).ok()?.kind;
        let body = self.store_mut(kind).del(key);
        self.last_hit.remove(&key);
        self.bounces.remove(&key);
        self.last_hit.retain(|_, paddle| *paddle != key);
        for slot in &mut self.players {
            if *slot == Some(key) {
                *slot = None;
            }
        }
        body
    }

    /// Number of live bodies across all arenas
    pub fn body_count(&self) -> usize {
        self.stores().iter().map(|s| s.len()).sum()
    }

    /// The scoring puck: lowest key without PASS_THROUGH
    pub fn primary_puck(&self) -> Option<Key> {
        self.pucks
            .iter()
            .filter(|(_, b)| !b.removed && !b.flags.contains(BodyFlags::PASS_THROUGH))
            .map(|(k, _)| k)
            .min()
    }

    pub fn paddle_of(&self, player: u8) -> Option<Key> {
        self.players.get(player as usize).copied().flatten()
    }

    pub fn transition(&mut self, to: GamePhase) -> Result<(), PhaseError> {
        let from = self.phase;
        if !from.can_transition(to) {
            return Err(PhaseError::Illegal { from, to });
        }
        if matches!(to, GamePhase::NextLevel | GamePhase::GameOver) {
            self.score = [0; PLAYERS];
        }
        self.phase = to;
        self.events.push(GameEvent::PhaseChanged { from, to });
        log::info!("phase {:?} -> {:?} at frame {}", from, to, self.frame);
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    /// Clear all entities and pending actions and reseed for `level`
    ///
    /// The phase and the key counter are kept.
    pub fn reset(&mut self, level: u32) {
        self.level = level;
        for kind in [
            BodyKind::Puck,
            BodyKind::Paddle,
            BodyKind::Obstacle,
            BodyKind::Extra(ExtraKind::Shield),
            BodyKind::Force,
            BodyKind::Shield,
        ] {
            self.store_mut(kind).empty();
        }
        self.last_hit.clear();
        self.bounces.clear();
        self.players = [None; PLAYERS];
        self.actions.clear();
        self.rng = Pcg32::seed_from_u64(round_seed(self.seed, level, self.round));
        self.puck_speed = self.settings.puck_start_speed;
    }

    /// Begin a match from Init or Preview
    pub fn start(&mut self) -> Result<(), PhaseError> {
        self.transition(GamePhase::Starting)?;
        self.score = [0; PLAYERS];
        self.round = 0;
        self.reset(0);
        self.setup_round();
        Ok(())
    }

    /// Attract mode: a self-serving round where goals never score
    pub fn preview(&mut self) -> Result<(), PhaseError> {
        self.transition(GamePhase::Preview)?;
        self.reset(self.level);
        self.setup_round();
        Ok(())
    }

    /// Spawn paddles and the puck, schedule the serve and extras
    pub fn setup_round(&mut self) {
        let s = &self.settings;
        let paddle_size = DVec2::new(s.paddle_width, s.paddle_height);
        let center_x = s.arena_width * 0.5;
        let lanes = [s.paddle_margin, s.arena_height - s.paddle_margin];
        let puck_size = DVec2::splat(s.puck_size);
        let center = DVec2::new(center_x, s.arena_height * 0.5);
        let (serve_delay, extra_interval) = (s.serve_delay_frames, s.extra_interval_frames);

        for (player, lane) in lanes.into_iter().enumerate() {
            let mut flags = BodyFlags::DYNAMIC;
            flags.set_bounce(BounceModel::Steer);
            let paddle = Body::new(
                BodyKind::Paddle,
                Polygon::rect(DVec2::new(center_x, lane), paddle_size),
                flags,
            )
            .with_owner(player as u8);
            self.players[player] = Some(self.add(paddle));
        }

        self.add(Body::new(
            BodyKind::Puck,
            Polygon::rect(center, puck_size),
            BodyFlags::DYNAMIC,
        ));

        self.actions.after(self.frame, serve_delay, GameAction::Serve);
        if extra_interval > 0 {
            self.actions
                .every(self.frame, extra_interval, GameAction::SpawnExtra);
        }
    }

    /// Launch the primary puck toward the receiving player
    pub fn serve(&mut self) {
        let Some(key) = self.primary_puck() else {
            return;
        };
        let angle = self.rng.random_range(-0.4..0.4_f64);
        let toward = if self.receiver == 0 { -1.0 } else { 1.0 };
        let velocity = DVec2::new(angle.sin(), angle.cos() * toward) * self.puck_speed;
        if let Ok(puck) = self.pucks.get_mut(key) {
            puck.set_velocity(velocity);
        }
    }

    /// Static obstacle with a bounce model
    pub fn add_obstacle(&mut self, shape: Polygon, model: BounceModel, destroy: bool) -> Key {
        let mut flags = BodyFlags::STATIC;
        flags.set_bounce(model);
        if destroy {
            flags.insert(BodyFlags::DESTROY);
        }
        self.add(Body::new(BodyKind::Obstacle, shape, flags))
    }

    /// Force emitter pulling (positive strength) or pushing pucks within `reach`
    pub fn add_force(&mut self, position: DVec2, strength: f64, reach: f64) -> Key {
        let mut body = Body::new(
            BodyKind::Force,
            Polygon::rect(position, DVec2::splat(2.0)),
            BodyFlags::STATIC,
        );
        body.set_data("strength", strength);
        body.set_data("reach", reach);
        self.add(body)
    }

    /// Drop an extra at a random spot in the middle band
    pub fn spawn_extra(&mut self) -> Key {
        let s = &self.settings;
        let size = DVec2::splat(s.puck_size * 1.5);
        let (width, height) = (s.arena_width, s.arena_height);
        let lifetime = s.extra_lifetime_frames;

        let x = self.rng.random_range(0.2..0.8_f64) * width;
        let y = self.rng.random_range(0.35..0.65_f64) * height;
        let kind = if self.rng.random_bool(0.5) {
            ExtraKind::Shield
        } else {
            ExtraKind::MultiPuck
        };
        let drift = DVec2::new(self.rng.random_range(-1.0..1.0_f64), 0.0);

        let mut extra = Body::new(
            BodyKind::Extra(kind),
            Polygon::rect(DVec2::new(x, y), size),
            BodyFlags::DYNAMIC,
        )
        .with_velocity(drift);
        extra.damping = 0.97;
        let key = self.add(extra);
        self.actions.after(self.frame, lifetime, GameAction::Expire(key));
        key
    }

    /// Shield across the front of `player`'s goal
    pub fn spawn_shield(&mut self, player: u8) -> Key {
        let s = &self.settings;
        let y = if player == 0 {
            s.paddle_margin * 0.3
        } else {
            s.arena_height - s.paddle_margin * 0.3
        };
        let shape = Polygon::rect(
            DVec2::new(s.arena_width * 0.5, y),
            DVec2::new(s.arena_width, s.paddle_height * 0.5),
        );
        let frames = s.shield_frames;
        let mut flags = BodyFlags::STATIC | BodyFlags::DESTROY;
        flags.set_bounce(BounceModel::Reflect);
        let key = self.add(Body::new(BodyKind::Shield, shape, flags).with_owner(player));
        self.actions.after(self.frame, frames, GameAction::Expire(key));
        key
    }

    /// Short-lived ghost puck that never scores
    pub fn spawn_ghost_puck(&mut self, position: DVec2, velocity: DVec2) -> Key {
        let s = &self.settings;
        let frames = s.multi_puck_frames;
        let shape = Polygon::rect(position, DVec2::splat(s.puck_size));
        let flags = BodyFlags::DYNAMIC | BodyFlags::GHOST | BodyFlags::PASS_THROUGH;
        let key = self.add(Body::new(BodyKind::Puck, shape, flags).with_velocity(velocity));
        self.actions.after(self.frame, frames, GameAction::Expire(key));
        key
    }

    /// Award the point against `loser` and move to the matching phase
    pub fn concede(&mut self, loser: u8) {
        let pause = self.settings.round_pause_frames;
        self.receiver = loser;

        if self.phase == GamePhase::Preview {
            self.actions.clear();
            self.actions.after(self.frame, pause, GameAction::BeginRound);
            return;
        }
        if self.phase != GamePhase::Playing {
            return;
        }

        let winner = (1 - loser.min(1)) as usize;
        self.score[winner] += 1;
        log::info!(
            "player {} scores ({}:{}) level {} round {}",
            winner,
            self.score[0],
            self.score[1],
            self.level,
            self.round
        );

        let next = if self.score[winner] >= self.settings.winning_score {
            if self.level + 1 >= self.settings.levels {
                GamePhase::GameOver
            } else {
                GamePhase::NextLevel
            }
        } else {
            GamePhase::NextRound
        };
        if let Err(err) = self.transition(next) {
            log::warn!("concede: {}", err);
        }

        self.actions.clear();
        if next != GamePhase::GameOver {
            self.actions.after(self.frame, pause, GameAction::BeginRound);
        }
    }

    /// Tear down the finished round and set up the next one
    pub fn begin_round(&mut self) {
        match self.phase {
            GamePhase::NextRound => self.round += 1,
            GamePhase::NextLevel => {
                self.level += 1;
                self.round = 0;
            }
            GamePhase::Preview => {
                self.reset(self.level);
                self.setup_round();
                return;
            }
            other => {
                log::warn!("begin_round ignored in {:?}", other);
                return;
            }
        }
        self.reset(self.level);
        if let Err(err) = self.transition(GamePhase::Starting) {
            log::warn!("begin_round: {}", err);
        }
        self.setup_round();
    }

    /// Order-independent digest of everything that affects the simulation
    ///
    /// Floats are quantized so tiny epsilon differences do not register.
    pub fn hash(&self) -> u64 {
        let mut h = mix(self.seed);
        for value in [
            self.frame,
            self.phase.tag(),
            self.level as u64,
            self.round as u64,
            self.score[0] as u64,
            self.score[1] as u64,
            self.receiver as u64,
            quantize(self.puck_speed) as u64,
            self.rng.clone().next_u64(),
        ] {
            h = mix(h ^ value);
        }

        let mut bodies = 0u64;
        for store in self.stores() {
            for (key, body) in store.iter() {
                bodies = bodies.wrapping_add(hash_body(key, body));
            }
        }

        let mut aux = 0u64;
        for (puck, paddle) in &self.last_hit {
            aux = aux.wrapping_add(mix(mix(puck.0 as u64) ^ paddle.0 as u64));
        }
        for (puck, count) in &self.bounces {
            aux = aux.wrapping_add(mix(mix(puck.0 as u64 | 1 << 40) ^ *count as u64));
        }

        let mut actions = 0u64;
        for (due, action) in self.actions.iter() {
            actions = actions.wrapping_add(mix(mix(due) ^ action.tag()));
        }

        mix(h ^ mix(bodies) ^ mix(aux).rotate_left(17) ^ mix(actions).rotate_left(31))
    }

    /// JSON snapshot for diagnostics
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

fn round_seed(seed: u64, level: u32, round: u32) -> u64 {
    mix(seed ^ mix((level as u64) << 32 | round as u64))
}

/// SplitMix64 finalizer
#[inline]
fn mix(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

fn hash_body(key: Key, body: &Body) -> u64 {
    let mut h = mix(key.0 as u64);
    for value in [
        body.kind.tag(),
        body.flags.bits() as u64,
        body.owner.map_or(u64::MAX, u64::from),
        quantize(body.current.x) as u64,
        quantize(body.current.y) as u64,
        quantize(body.previous.x) as u64,
        quantize(body.previous.y) as u64,
        quantize(body.velocity.x) as u64,
        quantize(body.velocity.y) as u64,
        quantize(body.damping) as u64,
        body.removed as u64,
    ] {
        h = mix(h ^ value);
    }
    if let Some(seek) = body.seek {
        h = mix(h ^ quantize(seek.target.x) as u64);
        h = mix(h ^ quantize(seek.target.y) as u64);
        h = mix(h ^ seek.frames as u64);
    }
    for (name, value) in &body.data {
        let name_hash = name
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
                (acc ^ b as u64).wrapping_mul(0x0100_0000_01b3)
            });
        h = mix(h ^ name_hash ^ quantize(*value) as u64);
    }
    h
}
