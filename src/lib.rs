//! Lockstep Pong - deterministic two-player arcade core
//!
//! Core modules:
//! - `sim`: Deterministic simulation (geometry, bodies, collisions, world state)
//! - `net`: Input recording, wire codec, lockstep reconciliation, latency probing
//! - `settings`: Data-driven tuning constants

pub mod net;
pub mod settings;
pub mod sim;

pub use net::{Lockstep, NetError, Session};
pub use settings::Settings;
pub use sim::{GamePhase, World, step};

/// Game configuration constants
pub mod consts {
    /// Fixed simulation timestep (60 Hz, one network frame per step)
    pub const SIM_DT: f64 = 1.0 / 60.0;
    /// Maximum substeps per frame to prevent spiral of death
    pub const MAX_SUBSTEPS: u32 = 8;

    /// Playfield dimensions (y up, player 0 defends y = 0)
    pub const ARENA_WIDTH: f64 = 533.0;
    pub const ARENA_HEIGHT: f64 = 800.0;

    /// Paddle defaults
    pub const PADDLE_WIDTH: f64 = 80.0;
    pub const PADDLE_HEIGHT: f64 = 12.0;
    /// Distance between a goal line and the paddle center
    pub const PADDLE_MARGIN: f64 = 30.0;

    /// Puck defaults (units per step)
    pub const PUCK_SIZE: f64 = 14.0;
    pub const PUCK_START_SPEED: f64 = 6.0;
    pub const PUCK_MAX_SPEED: f64 = 14.0;

    /// Number of players in a match
    pub const PLAYERS: usize = 2;
}

/// Quantize a float to a fixed grid so tiny epsilon drift hashes identically
#[inline]
pub fn quantize(value: f64) -> i64 {
    (value * 1000.0).round() as i64
}
